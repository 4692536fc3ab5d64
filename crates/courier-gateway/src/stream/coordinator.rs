use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;

use courier_core::protocol::control::{decode_batch, DisconnectPolicy, MessageId, Pending};

use crate::mesh::LeafEvent;
use crate::session::{ResolvedSession, SessionLookup, SessionResolver};
use crate::stream::link::StoreLink;
use crate::transport::host::TransportHost;

struct Registered {
    host: Weak<dyn TransportHost>,
    session: ResolvedSession,
}

fn same_host(a: &Arc<dyn TransportHost>, b: &Weak<dyn TransportHost>) -> bool {
    Arc::as_ptr(a) as *const () == Weak::as_ptr(b) as *const ()
}

/// Registry of live transport hosts:
/// - `address -> host` (weak; the connection handler owns the host)
/// - at most one host per address, a newer one replaces and closes the older
pub struct StreamCoordinator {
    resolver: Arc<dyn SessionResolver>,
    store: Arc<dyn StoreLink>,
    hosts: DashMap<String, Registered>,
}

impl StreamCoordinator {
    pub fn new(resolver: Arc<dyn SessionResolver>, store: Arc<dyn StoreLink>) -> Self {
        Self {
            resolver,
            store,
            hosts: DashMap::new(),
        }
    }

    /// Resolve the host's session and make its address reachable.
    ///
    /// Returns the session address when the host was registered. On `None`
    /// the host has already been answered and closed.
    pub async fn handle_request(&self, host: Arc<dyn TransportHost>) -> Option<String> {
        let session = match self.resolver.resolve(host.session_key()).await {
            Ok(SessionLookup::Active(session)) => session,
            Ok(SessionLookup::Expired { status, notice }) => {
                tracing::debug!(session = %host.session_key(), %status, "session expired");
                host.end_session(status, &notice);
                return None;
            }
            Err(e) => {
                tracing::warn!(session = %host.session_key(), error = %e, "session resolution failed");
                host.server_error(&e.to_string());
                return None;
            }
        };

        let address = session.address.clone();
        let prior = self.hosts.insert(
            address.clone(),
            Registered {
                host: Arc::downgrade(&host),
                session: session.clone(),
            },
        );
        if let Some(prior) = prior {
            if let Some(old) = prior.host.upgrade() {
                if !same_host(&old, &Arc::downgrade(&host)) {
                    tracing::debug!(address = %address, "replacing transport host");
                    old.close();
                }
            }
        }

        let ids = host.take_confirm_ids();
        if !ids.is_empty() {
            self.store.confirm(&session, ids);
        }
        self.store.connect(&session, host.disconnect_policy());

        tracing::debug!(address = %address, transport = host.kind().as_str(), "transport host attached");
        Some(address)
    }

    /// Confirms from a host that is still current for `address`.
    pub fn confirm(&self, address: &str, host: &Arc<dyn TransportHost>, ids: Vec<MessageId>) {
        let session = match self.hosts.get(address) {
            Some(r) if same_host(host, &r.host) => r.session.clone(),
            _ => {
                tracing::debug!(address = %address, "confirm from stale host ignored");
                return;
            }
        };
        self.store.confirm(&session, ids);
    }

    /// Unregister `host` if it is still current for `address`.
    pub fn release(&self, address: &str, host: &Arc<dyn TransportHost>) {
        let Some((_, reg)) = self.hosts.remove_if(address, |_, r| same_host(host, &r.host)) else {
            return;
        };
        if host.disconnect_policy() != DisconnectPolicy::Always {
            self.store.disconnect(&reg.session);
        }
        tracing::debug!(address = %address, "transport host released");
    }

    /// Hand `batch` to the live host of `address`. False when there is none.
    pub fn deliver(&self, address: &str, batch: &[Pending]) -> bool {
        let host = self.hosts.get(address).and_then(|r| r.host.upgrade());
        match host {
            Some(host) if !host.is_closed() => {
                host.deliver(batch);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.hosts.contains_key(address)
    }

    /// Route delivery batches arriving at the leaf to their hosts.
    pub async fn run_deliveries(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LeafEvent>) {
        while let Some(ev) = events.recv().await {
            match ev {
                LeafEvent::Message {
                    prefix, payload, ..
                } => {
                    let Some(address) = prefix.last() else {
                        tracing::debug!("delivery without address");
                        continue;
                    };
                    match decode_batch(&payload) {
                        Ok(batch) => {
                            if !self.deliver(address, &batch) {
                                // Unconfirmed messages stay in the store.
                                tracing::debug!(address = %address, "no live host for delivery");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(address = %address, error = %e, "bad delivery batch");
                        }
                    }
                }
                LeafEvent::Disconnected => {
                    tracing::error!("leaf disconnected, deliveries stopped");
                    break;
                }
            }
        }
    }
}

/// Releases a registered host when its connection handler finishes.
pub struct ReleaseGuard {
    coordinator: Arc<StreamCoordinator>,
    host: Arc<dyn TransportHost>,
    address: String,
}

impl ReleaseGuard {
    pub fn new(coordinator: Arc<StreamCoordinator>, host: Arc<dyn TransportHost>, address: String) -> Self {
        Self {
            coordinator,
            host,
            address,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.host.close();
        self.coordinator.release(&self.address, &self.host);
    }
}
