//! Store control contract.
//!
//! Web workers drive a remote store by sending [`Control`] commands (JSON) to
//! the store relay with `REPLY_EXPECTED` set, so the accumulated return path
//! becomes the route back to them. The store answers with delivery batches
//! flattened as `[id, payload, id, payload, ...]`.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CourierError, Result};
use crate::protocol::payload::Payload;

/// Per-address monotonic message id.
pub type MessageId = u64;

/// Whether reachability is dropped after a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectPolicy {
    /// Stay reachable until explicitly disconnected (WebSocket).
    Never,
    /// Forward on every connect, even empty, then disconnect (short polling).
    Always,
    /// Disconnect after the first non-empty forward (long polling).
    OnDelivery,
}

impl DisconnectPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectPolicy::Never => "never",
            DisconnectPolicy::Always => "always",
            DisconnectPolicy::OnDelivery => "on-delivery",
        }
    }
}

impl fmt::Display for DisconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisconnectPolicy {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "never" => Ok(DisconnectPolicy::Never),
            "always" => Ok(DisconnectPolicy::Always),
            "on-delivery" | "ondelivery" => Ok(DisconnectPolicy::OnDelivery),
            other => Err(CourierError::InvalidRoute(format!(
                "unknown disconnect policy: {other}"
            ))),
        }
    }
}

/// One buffered message awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub id: MessageId,
    /// JSON text as handed to `send`.
    pub payload: String,
}

impl Pending {
    pub fn new(id: MessageId, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// Command applied by a store host. The route for `Connect` is the return
/// path the command travelled plus `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Control {
    Connect {
        address: String,
        policy: DisconnectPolicy,
    },
    Disconnect {
        address: String,
    },
    Send {
        address: String,
        messages: Vec<String>,
    },
    Broadcast {
        messages: Vec<String>,
    },
    Confirm {
        address: String,
        ids: Vec<MessageId>,
    },
}

impl Control {
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| CourierError::Internal(format!("control encode failed: {e}")))
    }
}

/// Flatten a batch to `[id, payload, ...]` JSON.
pub fn encode_batch(messages: &[Pending]) -> Result<Bytes> {
    let mut flat = Vec::with_capacity(messages.len() * 2);
    for m in messages {
        flat.push(Value::from(m.id));
        flat.push(Value::String(m.payload.clone()));
    }
    serde_json::to_vec(&flat)
        .map(Bytes::from)
        .map_err(|e| CourierError::Internal(format!("batch encode failed: {e}")))
}

pub fn decode_batch(payload: &Payload) -> Result<Vec<Pending>> {
    let flat: Vec<Value> = payload.parse_json()?;
    if flat.len() % 2 != 0 {
        return Err(CourierError::MalformedPayload(
            "batch must hold id/payload pairs".into(),
        ));
    }

    flat.chunks_exact(2)
        .map(|pair| match pair {
            [Value::Number(id), Value::String(body)] => id
                .as_u64()
                .map(|id| Pending::new(id, body.clone()))
                .ok_or_else(|| CourierError::MalformedPayload(format!("bad id {id}"))),
            _ => Err(CourierError::MalformedPayload(
                "batch pair must be [number, string]".into(),
            )),
        })
        .collect()
}
