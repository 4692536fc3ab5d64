//! HTTP polling transports.
//!
//! Long polling holds the request until something is delivered or the
//! heartbeat fires (204, client reconnects). Short polling answers every
//! request at once, 204 when nothing is pending.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Duration;

use courier_core::error::CourierError;
use courier_core::protocol::control::{DisconnectPolicy, MessageId, Pending};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::stream::ReleaseGuard;
use crate::transport::codec::{delivery_body, parse_confirm_ids};
use crate::transport::host::{ConfirmIds, TransportHost, TransportKind};

/// Final answer for one polling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Option<String>,
}

impl PollReply {
    pub fn empty() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            content_type: "application/json",
            body: None,
        }
    }

    pub fn batch(status: StatusCode, batch: &[Pending]) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: (!batch.is_empty()).then(|| delivery_body(batch)),
        }
    }

    pub fn text(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Some(msg.to_owned()),
        }
    }
}

impl IntoResponse for PollReply {
    fn into_response(self) -> Response {
        let headers = [(header::CONTENT_TYPE, self.content_type)];
        match self.body {
            Some(body) => (self.status, headers, body).into_response(),
            None => (self.status, headers).into_response(),
        }
    }
}

/// Pending HTTP response; answered at most once.
#[derive(Default)]
struct ReplySlot(Mutex<Option<oneshot::Sender<PollReply>>>);

impl ReplySlot {
    fn set(&self, tx: oneshot::Sender<PollReply>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(tx);
        }
    }

    fn respond(&self, reply: PollReply) -> bool {
        let tx = self.0.lock().ok().and_then(|mut slot| slot.take());
        match tx {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    fn drop_reply(&self) {
        if let Ok(mut slot) = self.0.lock() {
            slot.take();
        }
    }

    fn is_open(&self) -> bool {
        self.0
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

pub struct LongPollHost {
    session_key: String,
    confirm_ids: ConfirmIds,
    reply: ReplySlot,
    heartbeat: Duration,
    timer: Mutex<Option<AbortHandle>>,
}

impl LongPollHost {
    pub fn new(session_key: impl Into<String>, confirm_ids: Vec<MessageId>, heartbeat: Duration) -> Self {
        Self {
            session_key: session_key.into(),
            confirm_ids: ConfirmIds::new(confirm_ids),
            reply: ReplySlot::default(),
            heartbeat,
            timer: Mutex::new(None),
        }
    }

    /// Attach the request and start the heartbeat timer.
    pub fn set_connection(self: &Arc<Self>, tx: oneshot::Sender<PollReply>) {
        self.reply.set(tx);

        let weak = Arc::downgrade(self);
        let heartbeat = self.heartbeat;
        let task = tokio::spawn(async move {
            tokio::time::sleep(heartbeat).await;
            if let Some(host) = weak.upgrade() {
                tracing::trace!(session = %host.session_key, "long-poll heartbeat");
                host.reply.respond(PollReply::empty());
                host.close();
            }
        });

        if let Ok(mut slot) = self.timer.lock() {
            if let Some(prev) = slot.replace(task.abort_handle()) {
                prev.abort();
            }
        }
    }
}

impl TransportHost for LongPollHost {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn session_key(&self) -> &str {
        &self.session_key
    }

    fn take_confirm_ids(&self) -> Vec<MessageId> {
        self.confirm_ids.take()
    }

    fn disconnect_policy(&self) -> DisconnectPolicy {
        DisconnectPolicy::OnDelivery
    }

    fn deliver(&self, batch: &[Pending]) {
        if batch.is_empty() {
            return;
        }
        self.reply.respond(PollReply::batch(StatusCode::OK, batch));
        self.close();
    }

    fn end_session(&self, status: StatusCode, notice: &[Pending]) {
        self.reply.respond(PollReply::batch(status, notice));
        self.close();
    }

    fn server_error(&self, reason: &str) {
        self.reply
            .respond(PollReply::text(StatusCode::INTERNAL_SERVER_ERROR, reason));
        self.close();
    }

    fn close(&self) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.reply.drop_reply();
    }

    fn is_closed(&self) -> bool {
        !self.reply.is_open()
    }
}

pub struct ShortPollHost {
    session_key: String,
    confirm_ids: ConfirmIds,
    reply: ReplySlot,
}

impl ShortPollHost {
    pub fn new(session_key: impl Into<String>, confirm_ids: Vec<MessageId>) -> Self {
        Self {
            session_key: session_key.into(),
            confirm_ids: ConfirmIds::new(confirm_ids),
            reply: ReplySlot::default(),
        }
    }

    pub fn set_connection(&self, tx: oneshot::Sender<PollReply>) {
        self.reply.set(tx);
    }
}

impl TransportHost for ShortPollHost {
    fn kind(&self) -> TransportKind {
        TransportKind::ShortPolling
    }

    fn session_key(&self) -> &str {
        &self.session_key
    }

    fn take_confirm_ids(&self) -> Vec<MessageId> {
        self.confirm_ids.take()
    }

    fn disconnect_policy(&self) -> DisconnectPolicy {
        DisconnectPolicy::Always
    }

    fn deliver(&self, batch: &[Pending]) {
        let reply = if batch.is_empty() {
            PollReply::empty()
        } else {
            PollReply::batch(StatusCode::OK, batch)
        };
        self.reply.respond(reply);
        self.close();
    }

    fn end_session(&self, status: StatusCode, notice: &[Pending]) {
        self.reply.respond(PollReply::batch(status, notice));
        self.close();
    }

    fn server_error(&self, reason: &str) {
        self.reply
            .respond(PollReply::text(StatusCode::INTERNAL_SERVER_ERROR, reason));
        self.close();
    }

    fn close(&self) {
        self.reply.drop_reply();
    }

    fn is_closed(&self) -> bool {
        !self.reply.is_open()
    }
}

// --------------------
// HTTP entry
// --------------------
#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(default, rename = "sessionKey")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default, rename = "confirmIds")]
    pub confirm_ids: Option<String>,
}

pub async fn poll(State(app): State<AppState>, method: Method, Query(q): Query<PollQuery>) -> Response {
    if method == Method::HEAD {
        return (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")]).into_response();
    }

    let Some(session_key) = q.session_key.filter(|k| !k.is_empty()) else {
        return ApiError(CourierError::BadRequest("sessionKey is required".into())).into_response();
    };

    let requested = q.transport.as_deref().unwrap_or("longpolling");
    let kind = match requested.parse::<TransportKind>() {
        Ok(k @ (TransportKind::LongPolling | TransportKind::ShortPolling)) => k,
        Ok(TransportKind::WebSocket) => {
            return ApiError(CourierError::BadRequest(format!(
                "unsupported transport: {requested}"
            )))
            .into_response()
        }
        Err(e) => return ApiError(e).into_response(),
    };

    let confirm_ids = q
        .confirm_ids
        .as_deref()
        .map(parse_confirm_ids)
        .unwrap_or_default();
    let heartbeat = app.heartbeat();

    let (tx, rx) = oneshot::channel();
    let host: Arc<dyn TransportHost> = match kind {
        TransportKind::ShortPolling => {
            let h = Arc::new(ShortPollHost::new(session_key, confirm_ids));
            h.set_connection(tx);
            h
        }
        _ => {
            let h = Arc::new(LongPollHost::new(session_key, confirm_ids, heartbeat));
            h.set_connection(tx);
            h
        }
    };

    let coordinator = app.coordinator();
    let _guard = coordinator
        .handle_request(Arc::clone(&host))
        .await
        .map(|address| ReleaseGuard::new(Arc::clone(&coordinator), Arc::clone(&host), address));

    // Short polls have no heartbeat; the deadline only covers a store that never answers.
    let reply = match kind {
        TransportKind::ShortPolling => match tokio::time::timeout(heartbeat, rx).await {
            Ok(r) => r.ok(),
            Err(_) => None,
        },
        _ => rx.await.ok(),
    };

    reply.unwrap_or_else(PollReply::empty).into_response()
}
