//! Session resolution seam.
//!
//! Mapping a client-presented session key to an address and to the store
//! that buffers its messages belongs to the session module of the game
//! server. The gateway only consumes [`SessionResolver`]; the in-memory
//! implementation serves development setups and tests.

use async_trait::async_trait;
use axum::http::StatusCode;
use dashmap::DashSet;

use courier_core::error::Result;
use courier_core::protocol::control::Pending;
use courier_core::protocol::HopId;

/// Address prefix for player sessions.
pub const SESSION_ADDRESS_PREFIX: &str = "sess/";

pub fn session_address(session_key: &str) -> String {
    format!("{SESSION_ADDRESS_PREFIX}{session_key}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub address: String,
    /// Hops from our relay to the store relay owning `address`.
    pub store_route: Vec<HopId>,
}

#[derive(Debug, Clone)]
pub enum SessionLookup {
    Active(ResolvedSession),
    /// The session no longer exists. `notice` holds final events for the
    /// client, e.g. a forced logout.
    Expired { status: StatusCode, notice: Vec<Pending> },
}

#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, session_key: &str) -> Result<SessionLookup>;
}

/// Known keys resolve to `sess/<key>` on one fixed store route.
pub struct InMemorySessions {
    keys: DashSet<String>,
    store_route: Vec<HopId>,
}

impl InMemorySessions {
    pub fn new(store_route: Vec<HopId>) -> Self {
        Self {
            keys: DashSet::new(),
            store_route,
        }
    }

    pub fn insert(&self, session_key: impl Into<String>) {
        self.keys.insert(session_key.into());
    }

    pub fn remove(&self, session_key: &str) -> bool {
        self.keys.remove(session_key).is_some()
    }
}

#[async_trait]
impl SessionResolver for InMemorySessions {
    async fn resolve(&self, session_key: &str) -> Result<SessionLookup> {
        if self.keys.contains(session_key) {
            return Ok(SessionLookup::Active(ResolvedSession {
                address: session_address(session_key),
                store_route: self.store_route.clone(),
            }));
        }
        Ok(SessionLookup::Expired {
            status: StatusCode::UNAUTHORIZED,
            notice: vec![Pending::new(
                0,
                r#"{"event":"session.unset","reason":"expired"}"#,
            )],
        })
    }
}
