use std::str::FromStr;
use std::sync::Mutex;

use axum::http::StatusCode;

use courier_core::error::{CourierError, Result};
use courier_core::protocol::control::{DisconnectPolicy, MessageId, Pending};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    LongPolling,
    ShortPolling,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::LongPolling => "longpolling",
            TransportKind::ShortPolling => "shortpolling",
            TransportKind::WebSocket => "websocket",
        }
    }
}

impl FromStr for TransportKind {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "longpolling" => Ok(TransportKind::LongPolling),
            "shortpolling" => Ok(TransportKind::ShortPolling),
            "websocket" => Ok(TransportKind::WebSocket),
            other => Err(CourierError::BadRequest(format!("unsupported transport: {other}"))),
        }
    }
}

/// One live end-user connection bound to a session.
///
/// Connection setup differs per variant, so `set_connection` lives on the
/// concrete types.
pub trait TransportHost: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn session_key(&self) -> &str;

    /// Ids the client piggy-backed on its request. Consumed once.
    fn take_confirm_ids(&self) -> Vec<MessageId>;

    /// How the store treats reachability after forwarding to this host.
    fn disconnect_policy(&self) -> DisconnectPolicy;

    fn deliver(&self, batch: &[Pending]);

    /// The session is gone: hand over final events with `status` and close.
    fn end_session(&self, status: StatusCode, notice: &[Pending]);

    fn server_error(&self, reason: &str);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Confirm ids carried by the connecting request.
#[derive(Debug, Default)]
pub struct ConfirmIds(Mutex<Vec<MessageId>>);

impl ConfirmIds {
    pub fn new(ids: Vec<MessageId>) -> Self {
        Self(Mutex::new(ids))
    }

    pub fn take(&self) -> Vec<MessageId> {
        self.0
            .lock()
            .map(|mut ids| std::mem::take(&mut *ids))
            .unwrap_or_default()
    }
}
