//! WebSocket transport.
//!
//! - Upgrade HTTP -> WS, session key from the query string
//! - Lifecycle: ping/pong + idle timeout
//! - Inbound text frames carry comma-separated confirm ids
//! - Outbound deliveries are text frames with the JSON delivery body

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};

use courier_core::protocol::control::{DisconnectPolicy, MessageId, Pending};

use crate::app_state::AppState;
use crate::stream::ReleaseGuard;
use crate::transport::codec::{delivery_body, parse_confirm_ids};
use crate::transport::host::{ConfirmIds, TransportHost, TransportKind};

const CLOSE_SERVER_ERROR: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(default, rename = "confirmIds")]
    pub confirm_ids: Option<String>,
}

/// Application close code for a session ended with HTTP-like `status`.
pub fn session_close_code(status: StatusCode) -> u16 {
    4000 + status.as_u16() % 1000
}

pub struct WsHost {
    session_key: String,
    confirm_ids: ConfirmIds,
    out: Mutex<Option<mpsc::Sender<Message>>>,
    closed: Notify,
}

impl WsHost {
    pub fn new(session_key: impl Into<String>, confirm_ids: Vec<MessageId>) -> Self {
        Self {
            session_key: session_key.into(),
            confirm_ids: ConfirmIds::new(confirm_ids),
            out: Mutex::new(None),
            closed: Notify::new(),
        }
    }

    /// Outbound half of the socket, drained by the session loop.
    pub fn set_connection(&self, tx: mpsc::Sender<Message>) {
        if let Ok(mut out) = self.out.lock() {
            *out = Some(tx);
        }
    }

    fn push(&self, msg: Message) -> bool {
        let sent = match self.out.lock() {
            Ok(out) => out.as_ref().is_some_and(|tx| tx.try_send(msg).is_ok()),
            Err(_) => false,
        };
        if !sent {
            tracing::warn!(session = %self.session_key, "ws outbound queue unavailable");
        }
        sent
    }

    fn close_with(&self, frame: Option<CloseFrame<'static>>) {
        let tx = self.out.lock().ok().and_then(|mut out| out.take());
        if let Some(tx) = tx {
            let _ = tx.try_send(Message::Close(frame));
            self.closed.notify_one();
        }
    }

    /// Resolves once the host has been closed, even if its close frame
    /// could not be queued.
    pub async fn closed(&self) {
        self.closed.notified().await
    }
}

impl TransportHost for WsHost {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn session_key(&self) -> &str {
        &self.session_key
    }

    fn take_confirm_ids(&self) -> Vec<MessageId> {
        self.confirm_ids.take()
    }

    fn disconnect_policy(&self) -> DisconnectPolicy {
        DisconnectPolicy::Never
    }

    fn deliver(&self, batch: &[Pending]) {
        if batch.is_empty() {
            return;
        }
        if !self.push(Message::Text(delivery_body(batch))) {
            self.close();
        }
    }

    fn end_session(&self, status: StatusCode, notice: &[Pending]) {
        if !notice.is_empty() {
            self.push(Message::Text(delivery_body(notice)));
        }
        self.close_with(Some(CloseFrame {
            code: session_close_code(status),
            reason: Cow::Borrowed("session ended"),
        }));
    }

    fn server_error(&self, reason: &str) {
        self.close_with(Some(CloseFrame {
            code: CLOSE_SERVER_ERROR,
            reason: Cow::Owned(reason.to_owned()),
        }));
    }

    fn close(&self) {
        self.close_with(None);
    }

    fn is_closed(&self) -> bool {
        self.out
            .lock()
            .map(|out| out.as_ref().map_or(true, |tx| tx.is_closed()))
            .unwrap_or(true)
    }
}

// --------------------
// Entry
// --------------------
pub async fn ws_upgrade(
    State(app): State<AppState>,
    ws: WebSocketUpgrade,
    Query(q): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(app, q, socket))
}

// --------------------
// Core session loop
// --------------------
async fn run_session(app: AppState, q: WsQuery, socket: WebSocket) {
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(1024);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let confirm_ids = q
        .confirm_ids
        .as_deref()
        .map(parse_confirm_ids)
        .unwrap_or_default();
    let ws_host = Arc::new(WsHost::new(q.session_key, confirm_ids));
    ws_host.set_connection(out_tx.clone());
    let host: Arc<dyn TransportHost> = ws_host.clone();

    let coordinator = app.coordinator();
    let guard = coordinator
        .handle_request(Arc::clone(&host))
        .await
        .map(|address| ReleaseGuard::new(Arc::clone(&coordinator), Arc::clone(&host), address));

    // Resolution failed: flush whatever the host queued (close frame) and leave.
    let Some(guard) = guard else {
        drop(out_tx);
        while let Some(m) = out_rx.recv().await {
            if ws_tx.send(m).await.is_err() {
                break;
            }
        }
        return;
    };

    let ping_every = app.ping_interval();
    let idle_timeout = app.idle_timeout();
    let mut ping_tick = tokio::time::interval(ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            // host closed (replaced, ended, or its queue overflowed)
            _ = ws_host.closed() => {
                let flush = flush_until_close(&mut ws_tx, &mut out_rx);
                if tokio::time::timeout(idle_timeout, flush).await.is_err() {
                    tracing::debug!(session = %host.session_key(), "ws close flush timed out");
                }
                break;
            }

            // outbound writer
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(m) => {
                        let closing = matches!(m, Message::Close(_));
                        if ws_tx.send(m).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break; };
                let Ok(msg) = incoming else { break; };

                last_activity = Instant::now();

                match msg {
                    Message::Text(s) => {
                        let ids = parse_confirm_ids(&s);
                        if !ids.is_empty() {
                            coordinator.confirm(guard.address(), &host, ids);
                        }
                    }
                    Message::Binary(_) => {
                        tracing::debug!(session = %host.session_key(), "ignoring binary frame");
                    }
                    Message::Ping(payload) => {
                        let _ = out_tx.try_send(Message::Pong(payload));
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }

            // ping
            _ = ping_tick.tick() => {
                let _ = out_tx.try_send(Message::Ping(Vec::new()));
            }

            // idle timeout
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if last_activity.elapsed() >= idle_timeout {
                    tracing::debug!(session = %host.session_key(), "ws idle timeout");
                    break;
                }
            }
        }
    }

    host.close();
    drop(guard);
}

/// Send what the host queued before closing, then a close frame if the
/// queue did not end with one.
async fn flush_until_close<S>(ws_tx: &mut S, out_rx: &mut mpsc::Receiver<Message>)
where
    S: Sink<Message> + Unpin,
{
    while let Ok(m) = out_rx.try_recv() {
        let closing = matches!(m, Message::Close(_));
        if ws_tx.send(m).await.is_err() || closing {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}
