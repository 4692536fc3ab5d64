//! Leaf client: one non-routing connection into the relay mesh.
//!
//! Used by web workers to submit store commands and receive delivery
//! batches. Sends are fire-and-forget: failures are logged and dropped,
//! retrying is up to the producer.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use courier_core::error::Result;
use courier_core::protocol::frames::Frames;
use courier_core::protocol::payload::auto_decode;
use courier_core::protocol::{Envelope, Flags, Header, HopId, Payload};

use crate::config::MeshSection;
use crate::mesh::link::{handshake, spawn_link, Endpoint, LinkEvent, LinkHandle};

#[derive(Debug)]
pub enum LeafEvent {
    Message {
        /// Stack entries left after our own identity, e.g. `["sess/abc"]`.
        prefix: Vec<HopId>,
        payload: Payload,
        return_path: Vec<HopId>,
        header: Header,
    },
    /// The relay link is gone. No reconnect is attempted.
    Disconnected,
}

pub struct LeafClient {
    identity: HopId,
    relay: HopId,
    link: LinkHandle,
    reader: AbortHandle,
}

impl LeafClient {
    pub async fn connect(
        identity: impl Into<HopId>,
        endpoint: &str,
        mesh: &MeshSection,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<LeafEvent>)> {
        let identity = identity.into();
        let ep: Endpoint = endpoint.parse()?;
        let stream = ep.dial().await?;
        let (relay, rd, wr) = handshake(stream, &identity, mesh.max_packet_bytes).await?;

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (link, reader) = spawn_link(relay.clone(), rd, wr, mesh, link_tx);

        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run(identity.clone(), link_rx, ev_tx));

        tracing::info!(leaf = %identity, relay = %relay, endpoint = %ep, "leaf connected");
        Ok((
            Arc::new(Self {
                identity,
                relay,
                link,
                reader,
            }),
            ev_rx,
        ))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Identity announced by the relay we are attached to.
    pub fn relay_identity(&self) -> &str {
        &self.relay
    }

    /// Transmit `stack ++ [payload] ++ [header]` to our relay.
    pub fn send(&self, stack: Vec<HopId>, payload: Bytes, header: Option<Header>) {
        let res = match header {
            Some(h) => Ok(h),
            None => Header::for_stack(stack.len()),
        }
        .and_then(|h| Envelope::new(stack, payload, h))
        .and_then(|env| self.link.try_send(env.into_frames()));

        if let Err(e) = res {
            tracing::warn!(leaf = %self.identity, error = %e, "leaf send failed");
        }
    }

    async fn run(
        identity: HopId,
        mut rx: mpsc::UnboundedReceiver<LinkEvent>,
        events: mpsc::UnboundedSender<LeafEvent>,
    ) {
        while let Some(ev) = rx.recv().await {
            let out = match ev {
                LinkEvent::Frames { from, frames } => match inbound(&identity, &from, frames) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(leaf = %identity, from = %from, error = %e, "dropping inbound envelope");
                        continue;
                    }
                },
                LinkEvent::Closed { peer, .. } => {
                    tracing::error!(leaf = %identity, relay = %peer, "relay link lost");
                    let _ = events.send(LeafEvent::Disconnected);
                    break;
                }
            };
            if events.send(out).is_err() {
                break;
            }
        }
    }
}

impl Drop for LeafClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn inbound(identity: &str, from: &str, frames: Frames) -> Result<LeafEvent> {
    let mut env = Envelope::from_frames(frames)?;
    if env.header.flags.contains(Flags::REPLY_EXPECTED) {
        env.return_path.insert(0, from.to_owned());
    }
    env.strip_self(identity);

    let payload = auto_decode(&env.header, env.payload)?;
    Ok(LeafEvent::Message {
        prefix: env.stack,
        payload,
        return_path: env.return_path,
        header: env.header,
    })
}
