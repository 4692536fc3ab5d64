use std::time::Duration;

use serde::Deserialize;
use courier_core::error::{CourierError, Result};

/// Session lifetime assumed when none is configured.
const FALLBACK_SESSION_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub version: u32,

    /// Relay + store host role.
    #[serde(default)]
    pub relay: Option<RelaySection>,

    #[serde(default)]
    pub store: StoreSection,

    /// Leaf client + HTTP/WebSocket delivery role.
    #[serde(default)]
    pub web: Option<WebSection>,

    #[serde(default)]
    pub mesh: MeshSection,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(CourierError::BadRequest(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if self.relay.is_none() && self.web.is_none() {
            return Err(CourierError::BadRequest(
                "at least one of relay or web must be configured".into(),
            ));
        }

        if let Some(relay) = &self.relay {
            relay.validate()?;
        }
        if let Some(web) = &self.web {
            web.validate()?;
        }
        self.store.validate()?;
        self.mesh.validate()?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    pub identity: String,

    #[serde(default = "default_relay_bind")]
    pub bind: String,

    /// Peer relay endpoints to connect to at startup.
    #[serde(default)]
    pub peers: Vec<String>,
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        if self.identity.is_empty() {
            return Err(CourierError::BadRequest("relay.identity must not be empty".into()));
        }
        Ok(())
    }
}

fn default_relay_bind() -> String {
    "tcp://0.0.0.0:7700".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Session lifetime from the session module, if known.
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,

    #[serde(default = "default_ttl_margin_secs")]
    pub ttl_margin_secs: u64,

    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            session_ttl_secs: None,
            ttl_margin_secs: default_ttl_margin_secs(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

impl StoreSection {
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == Some(0) {
            return Err(CourierError::BadRequest(
                "store.session_ttl_secs must be positive".into(),
            ));
        }
        if !(100..=600000).contains(&self.reap_interval_ms) {
            return Err(CourierError::BadRequest(
                "store.reap_interval_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    /// Entry TTL: session lifetime plus safety margin.
    pub fn ttl(&self) -> Duration {
        let session = self.session_ttl_secs.unwrap_or(FALLBACK_SESSION_TTL_SECS);
        Duration::from_secs(session.saturating_add(self.ttl_margin_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

fn default_ttl_margin_secs() -> u64 {
    60
}
fn default_reap_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Leaf identity on the mesh.
    pub identity: String,

    /// Relay endpoint the leaf client connects to.
    pub relay: String,

    /// Hops from the leaf's relay to the store relay.
    pub store_route: Vec<String>,

    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Session keys accepted by the in-memory resolver.
    #[serde(default)]
    pub sessions: Vec<String>,
}

impl WebSection {
    pub fn validate(&self) -> Result<()> {
        if self.identity.is_empty() {
            return Err(CourierError::BadRequest("web.identity must not be empty".into()));
        }
        if self.store_route.is_empty() {
            return Err(CourierError::BadRequest("web.store_route must not be empty".into()));
        }
        if !(1000..=300000).contains(&self.heartbeat_ms) {
            return Err(CourierError::BadRequest(
                "web.heartbeat_ms must be between 1000 and 300000".into(),
            ));
        }
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(CourierError::BadRequest(
                "web.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(CourierError::BadRequest(
                "web.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(CourierError::BadRequest(
                "web.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_heartbeat_ms() -> u64 {
    30000
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshSection {
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,

    /// Outbound queue depth per link.
    #[serde(default = "default_link_queue")]
    pub link_queue: usize,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            max_packet_bytes: default_max_packet_bytes(),
            link_queue: default_link_queue(),
        }
    }
}

impl MeshSection {
    pub fn validate(&self) -> Result<()> {
        if !(1024..=64 * 1024 * 1024).contains(&self.max_packet_bytes) {
            return Err(CourierError::BadRequest(
                "mesh.max_packet_bytes must be between 1KiB and 64MiB".into(),
            ));
        }
        if self.link_queue == 0 {
            return Err(CourierError::BadRequest("mesh.link_queue must be positive".into()));
        }
        Ok(())
    }
}

fn default_max_packet_bytes() -> usize {
    1024 * 1024
}
fn default_link_queue() -> usize {
    1024
}
