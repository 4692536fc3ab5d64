//! Store host: binds a Store to the relay of the same process.
//!
//! - Control commands that reach the relay as destination are applied to
//!   the store. For `Connect`, the route is the command's return path plus
//!   the address, i.e. the way back to the web worker that sent it.
//! - Forward batches are sent from the relay along their stored route, cut
//!   so every packet fits the mesh packet limit.
//! - Envelopes only passing through are intercepted and forwarded.

use std::sync::Arc;

use tokio::sync::mpsc;

use courier_core::error::Result;
use courier_core::protocol::control::{encode_batch, Control, MessageId};
use courier_core::protocol::{Encoding, Flags, Header, HopId, Payload, HEADER_LEN};

use crate::mesh::{Relay, RelayEvent};
use crate::store::{Forward, Store};

pub struct StoreHost {
    relay: Arc<Relay>,
    store: Arc<Store>,
}

impl StoreHost {
    /// Takes over routing on `relay`: transit envelopes surface as
    /// `Request` events and are passed on from [`StoreHost::on_relay_event`].
    pub fn new(relay: Arc<Relay>, store: Arc<Store>) -> Self {
        relay.set_intercept(true);
        Self { relay, store }
    }

    /// Pump relay events and store forwards until both channels close.
    pub async fn run(
        self,
        mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
        mut forwards: mpsc::UnboundedReceiver<Forward>,
    ) {
        loop {
            tokio::select! {
                Some(ev) = relay_events.recv() => self.on_relay_event(ev),
                Some(fwd) = forwards.recv() => self.on_forward(fwd),
                else => break,
            }
        }
        tracing::info!(relay = %self.relay.identity(), "store host stopped");
    }

    pub fn on_relay_event(&self, ev: RelayEvent) {
        match ev {
            RelayEvent::Message {
                payload,
                return_path,
                ..
            } => {
                if let Err(e) = self.apply(&payload, return_path) {
                    tracing::warn!(relay = %self.relay.identity(), error = %e, "dropping control command");
                }
            }
            RelayEvent::Request { envelope } => {
                tracing::trace!(relay = %self.relay.identity(), next = ?envelope.next_hop(), "transit");
                if let Err(e) = self.relay.forward(envelope) {
                    tracing::warn!(relay = %self.relay.identity(), error = %e, "dropping envelope");
                }
            }
        }
    }

    pub fn on_forward(&self, fwd: Forward) {
        let address = fwd.address.clone();
        let limit = self.relay.max_packet_bytes().saturating_sub(envelope_overhead(&fwd.route));
        let (batches, oversized) = fwd.split(limit);

        if !oversized.is_empty() {
            // Never deliverable over this mesh; keeping them would block the queue.
            let ids: Vec<MessageId> = oversized.iter().map(|m| m.id).collect();
            tracing::warn!(address = %address, ids = ?ids, limit, "dropping messages larger than a packet");
            self.store.confirm(&address, &ids);
        }

        for batch in batches {
            let res = encode_batch(&batch.messages).and_then(|payload| {
                let header = Header::for_stack(batch.route.len())?
                    .with_encoding(Encoding::Json)
                    .with_flags(Flags::AUTO_DECODE);
                self.relay.send(batch.route, payload, Some(header))
            });

            if let Err(e) = res {
                // Unconfirmed messages stay queued; the next connect redelivers them.
                tracing::warn!(address = %address, error = %e, "forward not sent");
                return;
            }
        }
    }

    fn apply(&self, payload: &Payload, return_path: Vec<HopId>) -> Result<()> {
        let cmd: Control = payload.parse_json()?;
        match cmd {
            Control::Connect { address, policy } => {
                let mut route = return_path;
                route.push(address);
                self.store.connect_address(route, policy)?;
            }
            Control::Disconnect { address } => self.store.disconnect_address(&address),
            Control::Send { address, messages } => self.store.send(&address, messages),
            Control::Broadcast { messages } => self.store.broadcast(messages),
            Control::Confirm { address, ids } => self.store.confirm(&address, &ids),
        }
        Ok(())
    }
}

/// Packet bytes around the batch payload for a forward along `route`.
fn envelope_overhead(route: &[HopId]) -> usize {
    let hops: usize = route.iter().map(|h| 4 + h.len()).sum();
    2 + hops + 4 + 4 + HEADER_LEN
}
