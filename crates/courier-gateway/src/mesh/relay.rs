//! Relay: source-routed envelope forwarding.
//!
//! Routing per received envelope:
//! 1. If `REPLY_EXPECTED`, the sender joins the front of the return path.
//! 2. Every leading occurrence of our identity is popped from the stack
//!    (one cursor step each).
//! 3. Cursor zero: we are the destination, surface a `Message`.
//! 4. Otherwise forward to the link named by the next hop, or surface a
//!    `Request` when interception is on. Envelopes this relay originates
//!    itself are never intercepted.
//!
//! No relay knows where an address lives; the path travels in the envelope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use courier_core::error::{CourierError, Result};
use courier_core::protocol::frames::Frames;
use courier_core::protocol::payload::auto_decode;
use courier_core::protocol::{Envelope, Flags, Header, HopId, Payload, DEFAULT_HOP_BUDGET};

use crate::config::MeshSection;
use crate::mesh::link::{handshake, spawn_link, BoxStream, Endpoint, LinkEvent, LinkHandle, Listener};

#[derive(Debug)]
pub enum RelayEvent {
    /// This relay is the destination.
    Message {
        payload: Payload,
        return_path: Vec<HopId>,
        header: Header,
    },
    /// Not for us, surfaced because interception is on. Answer with
    /// [`Relay::reply`] or pass along with [`Relay::forward`].
    Request { envelope: Envelope },
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct PeerLink {
    peer: HopId,
    link_id: u64,
}

pub struct Relay {
    identity: HopId,
    mesh: MeshSection,
    links: DashMap<HopId, LinkHandle>,
    peers: DashMap<String, PeerLink>,
    /// Reader task of every attached link, inbound and outbound.
    readers: DashMap<u64, AbortHandle>,
    intercept: AtomicBool,
    stopped: AtomicBool,
    link_events: mpsc::UnboundedSender<LinkEvent>,
    events: mpsc::UnboundedSender<RelayEvent>,
    listener: Mutex<Option<AbortHandle>>,
}

impl Relay {
    /// Create a relay and its single event subscriber.
    ///
    /// Must be called inside a tokio runtime: inbound traffic from all links
    /// is processed by one spawned task.
    pub fn new(
        identity: impl Into<HopId>,
        mesh: MeshSection,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RelayEvent>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();

        let relay = Arc::new(Self {
            identity: identity.into(),
            mesh,
            links: DashMap::new(),
            peers: DashMap::new(),
            readers: DashMap::new(),
            intercept: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            link_events: link_tx,
            events: ev_tx,
            listener: Mutex::new(None),
        });

        tokio::spawn(Self::run(Arc::downgrade(&relay), link_rx));
        (relay, ev_rx)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Surface non-destination envelopes as `Request` instead of forwarding.
    pub fn set_intercept(&self, on: bool) {
        self.intercept.store(on, Ordering::Relaxed);
    }

    pub fn is_linked(&self, hop: &str) -> bool {
        self.links.contains_key(hop)
    }

    /// Largest packet a link of this relay accepts.
    pub fn max_packet_bytes(&self) -> usize {
        self.mesh.max_packet_bytes
    }

    /// Open the router side. Returns the bound endpoint.
    pub async fn bind(self: &Arc<Self>, endpoint: &str) -> Result<Endpoint> {
        let ep: Endpoint = endpoint.parse()?;
        let listener = Listener::bind(&ep).await?;
        let local = listener.local_endpoint()?;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let Some(relay) = weak.upgrade() else { break };
                tokio::spawn(async move {
                    if let Err(e) = relay.attach(stream).await {
                        tracing::warn!(relay = %relay.identity, error = %e, "inbound link rejected");
                    }
                });
            }
        });

        if let Ok(mut slot) = self.listener.lock() {
            if let Some(prev) = slot.replace(task.abort_handle()) {
                prev.abort();
            }
        }
        tracing::info!(relay = %self.identity, endpoint = %local, "relay bound");
        Ok(local)
    }

    /// Connect to a peer relay. Returns the peer identity.
    pub async fn connect(self: &Arc<Self>, endpoint: &str) -> Result<HopId> {
        let ep: Endpoint = endpoint.parse()?;
        let stream = ep.dial().await?;
        let (link_id, peer) = self.attach(stream).await?;

        if let Some(prev) = self.peers.insert(
            endpoint.to_owned(),
            PeerLink {
                peer: peer.clone(),
                link_id,
            },
        ) {
            self.drop_link(&prev.peer, prev.link_id);
        }
        tracing::info!(relay = %self.identity, peer = %peer, endpoint = %ep, "peer connected");
        Ok(peer)
    }

    /// Drop the peer link opened for `endpoint`.
    pub fn disconnect(&self, endpoint: &str) -> bool {
        let Some((_, link)) = self.peers.remove(endpoint) else {
            return false;
        };
        self.drop_link(&link.peer, link.link_id);
        tracing::info!(relay = %self.identity, peer = %link.peer, "peer disconnected");
        true
    }

    /// Stop listening and drop every link. Nothing is routed afterwards.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        for entry in self.readers.iter() {
            entry.value().abort();
        }
        self.readers.clear();
        self.peers.clear();
        self.links.clear();
        tracing::info!(relay = %self.identity, "relay shut down");
    }

    /// Originate an envelope from this relay.
    ///
    /// Without a header: `cursor = stack.len()`, default hop budget, unknown
    /// encoding, no flags.
    pub fn send(&self, stack: Vec<HopId>, payload: Bytes, header: Option<Header>) -> Result<()> {
        let header = match header {
            Some(h) => h,
            None => Header::for_stack(stack.len())?,
        };
        let env = Envelope::new(stack, payload, header)?;
        self.route(env, false)
    }

    /// Answer along an accumulated return path.
    ///
    /// Our identity is re-prefixed and stripped again like any inbound hop,
    /// so the cursor counts exactly the hops back to the requester. The hop
    /// budget starts over.
    pub fn reply(&self, return_path: Vec<HopId>, payload: Bytes, header: Header) -> Result<()> {
        let mut header = header;
        header.hop_budget = DEFAULT_HOP_BUDGET;
        header.flags.remove(Flags::REPLY_EXPECTED);
        header.flags.remove(Flags::DESTINATION_REACHED);
        header.flags.insert(Flags::IS_RESPONSE);

        let mut stack = Vec::with_capacity(return_path.len() + 1);
        stack.push(self.identity.clone());
        stack.extend(return_path);

        let env = Envelope::new(stack, payload, header)?;
        self.route(env, false)
    }

    /// Hand an envelope to the link named by its next hop.
    pub fn forward(&self, mut env: Envelope) -> Result<()> {
        let next = env
            .next_hop()
            .ok_or_else(|| CourierError::InvalidRoute("nothing left to forward to".into()))?
            .to_owned();

        if env.header.hop_budget == 0 {
            return Err(CourierError::TransportSend(format!(
                "hop budget exhausted before {next}"
            )));
        }
        env.header.hop_budget -= 1;

        if self.stopped.load(Ordering::Relaxed) {
            return Err(CourierError::TransportSend("relay is shut down".into()));
        }
        let link = self
            .links
            .get(&next)
            .map(|l| l.value().clone())
            .ok_or_else(|| CourierError::TransportSend(format!("no link to {next}")))?;

        tracing::trace!(relay = %self.identity, next = %next, cursor = env.header.cursor, "forward");
        link.try_send(env.into_frames())
    }

    async fn run(relay: Weak<Self>, mut rx: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(ev) = rx.recv().await {
            let Some(relay) = relay.upgrade() else { break };
            match ev {
                LinkEvent::Frames { from, frames } => relay.on_frames(&from, frames),
                LinkEvent::Closed { peer, link_id } => {
                    relay.readers.remove(&link_id);
                    if relay.links.remove_if(&peer, |_, h| h.id == link_id).is_some() {
                        tracing::info!(relay = %relay.identity, peer = %peer, "link closed");
                    }
                }
            }
        }
    }

    async fn attach(&self, stream: BoxStream) -> Result<(u64, HopId)> {
        let (peer, rd, wr) = handshake(stream, &self.identity, self.mesh.max_packet_bytes).await?;
        if self.stopped.load(Ordering::Relaxed) {
            return Err(CourierError::TransportSend("relay is shut down".into()));
        }
        let (handle, reader) = spawn_link(peer.clone(), rd, wr, &self.mesh, self.link_events.clone());
        let link_id = handle.id;

        self.readers.insert(link_id, reader);
        if self.links.insert(peer.clone(), handle).is_some() {
            tracing::debug!(relay = %self.identity, peer = %peer, "link replaced");
        }
        Ok((link_id, peer))
    }

    fn drop_link(&self, peer: &str, link_id: u64) {
        if let Some((_, reader)) = self.readers.remove(&link_id) {
            reader.abort();
        }
        self.links.remove_if(peer, |_, h| h.id == link_id);
    }

    fn on_frames(&self, from: &str, frames: Frames) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        let mut env = match Envelope::from_frames(frames) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(relay = %self.identity, from = %from, error = %e, "dropping malformed envelope");
                return;
            }
        };

        if env.header.flags.contains(Flags::REPLY_EXPECTED) {
            env.return_path.insert(0, from.to_owned());
        }

        if let Err(e) = self.route(env, true) {
            tracing::warn!(relay = %self.identity, from = %from, error = %e, "dropping envelope");
        }
    }

    fn route(&self, mut env: Envelope, inbound: bool) -> Result<()> {
        env.strip_self(&self.identity);

        if env.arrived() {
            env.header.flags.insert(Flags::DESTINATION_REACHED);
            let payload = auto_decode(&env.header, env.payload)?;
            self.emit(RelayEvent::Message {
                payload,
                return_path: env.return_path,
                header: env.header,
            });
            return Ok(());
        }

        if inbound && self.intercept.load(Ordering::Relaxed) {
            self.emit(RelayEvent::Request { envelope: env });
            return Ok(());
        }

        self.forward(env)
    }

    fn emit(&self, ev: RelayEvent) {
        if self.events.send(ev).is_err() {
            tracing::debug!(relay = %self.identity, "relay event dropped: no subscriber");
        }
    }
}
