//! Web-worker side of the store control protocol.

use std::sync::Arc;

use bytes::Bytes;

use courier_core::error::Result;
use courier_core::protocol::control::{Control, DisconnectPolicy, MessageId};
use courier_core::protocol::{Encoding, Flags, Header, HopId};

use crate::mesh::LeafClient;
use crate::session::ResolvedSession;

/// Store commands issued on behalf of a session. Fire-and-forget.
pub trait StoreLink: Send + Sync {
    fn connect(&self, session: &ResolvedSession, policy: DisconnectPolicy);

    fn disconnect(&self, session: &ResolvedSession);

    fn confirm(&self, session: &ResolvedSession, ids: Vec<MessageId>);
}

/// Sends [`Control`] envelopes through the process leaf client.
pub struct MeshStoreLink {
    leaf: Arc<LeafClient>,
}

impl MeshStoreLink {
    pub fn new(leaf: Arc<LeafClient>) -> Self {
        Self { leaf }
    }

    /// Producer entry: queue messages for `address` in the store at `store_route`.
    pub fn send(&self, store_route: &[HopId], address: &str, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        self.command(
            store_route,
            &Control::Send {
                address: address.to_owned(),
                messages,
            },
        );
    }

    pub fn broadcast(&self, store_route: &[HopId], messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        self.command(store_route, &Control::Broadcast { messages });
    }

    fn command(&self, store_route: &[HopId], cmd: &Control) {
        match encode_command(store_route, cmd) {
            Ok((header, payload)) => self.leaf.send(store_route.to_vec(), payload, Some(header)),
            Err(e) => tracing::warn!(leaf = %self.leaf.identity(), error = %e, "store command not sent"),
        }
    }
}

/// `REPLY_EXPECTED` makes the relays record the way back to this leaf.
pub fn encode_command(store_route: &[HopId], cmd: &Control) -> Result<(Header, Bytes)> {
    let header = Header::for_stack(store_route.len())?
        .with_encoding(Encoding::Json)
        .with_flags(Flags::REPLY_EXPECTED | Flags::AUTO_DECODE);
    Ok((header, cmd.to_bytes()?))
}

impl StoreLink for MeshStoreLink {
    fn connect(&self, session: &ResolvedSession, policy: DisconnectPolicy) {
        self.command(
            &session.store_route,
            &Control::Connect {
                address: session.address.clone(),
                policy,
            },
        );
    }

    fn disconnect(&self, session: &ResolvedSession) {
        self.command(
            &session.store_route,
            &Control::Disconnect {
                address: session.address.clone(),
            },
        );
    }

    fn confirm(&self, session: &ResolvedSession, ids: Vec<MessageId>) {
        if ids.is_empty() {
            return;
        }
        self.command(
            &session.store_route,
            &Control::Confirm {
                address: session.address.clone(),
                ids,
            },
        );
    }
}
