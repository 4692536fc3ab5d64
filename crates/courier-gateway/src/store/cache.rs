use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant};

use courier_core::error::{CourierError, Result};
use courier_core::protocol::control::{DisconnectPolicy, MessageId, Pending};
use courier_core::protocol::HopId;

/// One forward batch, addressed along the route stored at emission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub address: String,
    pub route: Vec<HopId>,
    pub messages: Vec<Pending>,
}

impl Forward {
    /// `[id, payload, id, payload, ...]` as strings.
    pub fn flatten(&self) -> Vec<String> {
        self.messages
            .iter()
            .flat_map(|m| [m.id.to_string(), m.payload.clone()])
            .collect()
    }

    /// Cut into batches whose `[id, payload, ...]` encoding stays within
    /// `max_bytes`, keeping id order. Messages that can never fit are
    /// returned separately.
    pub fn split(self, max_bytes: usize) -> (Vec<Forward>, Vec<Pending>) {
        if self.messages.is_empty() {
            return (vec![self], Vec::new());
        }

        let mut batches = Vec::new();
        let mut oversized = Vec::new();
        let mut current: Vec<Pending> = Vec::new();
        let mut used = 2;

        for m in self.messages {
            let cost = batch_cost(&m);
            if cost + 2 > max_bytes {
                oversized.push(m);
                continue;
            }
            if !current.is_empty() && used + cost > max_bytes {
                batches.push(std::mem::take(&mut current));
                used = 2;
            }
            used += cost;
            current.push(m);
        }
        if !current.is_empty() {
            batches.push(current);
        }

        let batches = batches
            .into_iter()
            .map(|messages| Forward {
                address: self.address.clone(),
                route: self.route.clone(),
                messages,
            })
            .collect();
        (batches, oversized)
    }
}

/// Bytes one message adds to an encoded batch, separators included.
fn batch_cost(m: &Pending) -> usize {
    let payload = serde_json::to_string(&m.payload)
        .map(|s| s.len())
        .unwrap_or(m.payload.len() * 6 + 2);
    m.id.to_string().len() + payload + 2
}

struct StoreEntry {
    route: Option<Vec<HopId>>,
    policy: DisconnectPolicy,
    messages: BTreeMap<MessageId, String>,
    counter: MessageId,
    expires_at: Instant,
}

impl StoreEntry {
    fn new(expires_at: Instant) -> Self {
        Self {
            route: None,
            policy: DisconnectPolicy::Never,
            messages: BTreeMap::new(),
            counter: 0,
            expires_at,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Per-process buffered delivery cache.
///
/// Keyed by address; every access refreshes the entry TTL. Forward batches
/// go to the single receiver returned by [`Store::new`].
pub struct Store {
    entries: DashMap<String, StoreEntry>,
    ttl: Duration,
    forwards: mpsc::UnboundedSender<Forward>,
    reaper: Mutex<Option<AbortHandle>>,
}

impl Store {
    pub fn new(ttl: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Forward>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            entries: DashMap::new(),
            ttl,
            forwards: tx,
            reaper: Mutex::new(None),
        });
        (store, rx)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Periodically drop expired entries.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(store) = weak.upgrade() else { break };
                let reaped = store.reap();
                if reaped > 0 {
                    tracing::debug!(reaped, left = store.entries.len(), "store entries expired");
                }
            }
        });

        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(prev) = slot.replace(task.abort_handle()) {
                prev.abort();
            }
        }
    }

    /// Remove expired entries now. Returns how many were dropped.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Mark an address reachable along `route` (last element is the address).
    pub fn connect_address(&self, route: Vec<HopId>, policy: DisconnectPolicy) -> Result<()> {
        let Some(address) = route.last().cloned() else {
            return Err(CourierError::InvalidRoute("route must not be empty".into()));
        };

        let mut entry = self.entry(&address);
        tracing::debug!(address = %address, policy = %policy, hops = route.len(), "address connected");
        entry.route = Some(route);
        entry.policy = policy;
        self.forward_entry(&address, &mut entry);
        Ok(())
    }

    /// Drop reachability but keep queued messages.
    pub fn disconnect_address(&self, address: &str) {
        if let Some(mut entry) = self.existing(address) {
            if entry.route.take().is_some() {
                tracing::debug!(address = %address, "address disconnected");
            }
        }
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.existing(address)
            .map(|e| e.route.is_some())
            .unwrap_or(false)
    }

    pub fn manages_address(&self, address: &str) -> bool {
        self.existing(address).is_some()
    }

    /// Queue messages under fresh ids; forwards right away if connected.
    pub fn send(&self, address: &str, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }

        let mut entry = self.entry(address);
        for m in messages {
            entry.counter += 1;
            let id = entry.counter;
            entry.messages.insert(id, m);
        }
        self.forward_entry(address, &mut entry);
    }

    pub fn forward(&self, address: &str) {
        if let Some(mut entry) = self.existing(address) {
            self.forward_entry(address, &mut entry);
        }
    }

    /// Drop acknowledged ids; the rest stay queued for redelivery.
    pub fn confirm(&self, address: &str, ids: &[MessageId]) {
        let Some(mut entry) = self.existing(address) else {
            tracing::debug!(address = %address, "confirm for unmanaged address");
            return;
        };
        for id in ids {
            entry.messages.remove(id);
        }
    }

    /// `send` to every managed address.
    pub fn broadcast(&self, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        let now = Instant::now();
        let addresses: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        for address in addresses {
            self.send(&address, messages.clone());
        }
    }

    /// Number of managed addresses (expired but unreaped entries included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn close(&self) {
        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.entries.clear();
    }

    /// Get or create, replacing an expired entry, and refresh the TTL.
    fn entry(&self, address: &str) -> RefMut<'_, String, StoreEntry> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(address.to_owned())
            .or_insert_with(|| StoreEntry::new(now + self.ttl));
        if entry.is_expired(now) {
            *entry = StoreEntry::new(now);
        }
        entry.expires_at = now + self.ttl;
        entry
    }

    /// Existing, unexpired entry with its TTL refreshed.
    fn existing(&self, address: &str) -> Option<RefMut<'_, String, StoreEntry>> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(address)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(address, |_, e| e.is_expired(now));
            return None;
        }
        entry.expires_at = now + self.ttl;
        Some(entry)
    }

    fn forward_entry(&self, address: &str, entry: &mut StoreEntry) {
        let Some(route) = entry.route.clone() else {
            return;
        };

        if entry.messages.is_empty() {
            if entry.policy == DisconnectPolicy::Always {
                self.emit(Forward {
                    address: address.to_owned(),
                    route,
                    messages: Vec::new(),
                });
                entry.route = None;
            }
            return;
        }

        let messages = entry
            .messages
            .iter()
            .map(|(id, payload)| Pending::new(*id, payload.clone()))
            .collect();
        self.emit(Forward {
            address: address.to_owned(),
            route,
            messages,
        });

        if entry.policy != DisconnectPolicy::Never {
            entry.route = None;
        }
    }

    fn emit(&self, fwd: Forward) {
        tracing::trace!(address = %fwd.address, count = fwd.messages.len(), "forward");
        if self.forwards.send(fwd).is_err() {
            tracing::warn!("forward dropped: store has no subscriber");
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}
