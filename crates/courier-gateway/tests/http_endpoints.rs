#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex, OnceLock, Weak};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::time::Duration;
use tower::ServiceExt;

use courier_core::protocol::control::{DisconnectPolicy, MessageId, Pending};
use courier_gateway::app_state::{AppState, Timings};
use courier_gateway::router::build_router;
use courier_gateway::session::{InMemorySessions, ResolvedSession};
use courier_gateway::stream::{StoreLink, StreamCoordinator};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Connect(String, DisconnectPolicy),
    Disconnect(String),
    Confirm(String, Vec<MessageId>),
}

/// Store stand-in: answers every connect with whatever is queued.
#[derive(Default)]
struct QueueLink {
    calls: Mutex<Vec<Call>>,
    queued: Mutex<Vec<Pending>>,
    coordinator: OnceLock<Weak<StreamCoordinator>>,
}

impl QueueLink {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn queue(&self, m: Pending) {
        self.queued.lock().unwrap().push(m);
    }
}

impl StoreLink for QueueLink {
    fn connect(&self, session: &ResolvedSession, policy: DisconnectPolicy) {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Connect(session.address.clone(), policy));

        let batch: Vec<Pending> = self.queued.lock().unwrap().drain(..).collect();
        if batch.is_empty() && policy != DisconnectPolicy::Always {
            return;
        }
        let coordinator = self.coordinator.get().cloned();
        let address = session.address.clone();
        tokio::spawn(async move {
            if let Some(c) = coordinator.and_then(|w| w.upgrade()) {
                c.deliver(&address, &batch);
            }
        });
    }

    fn disconnect(&self, session: &ResolvedSession) {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Disconnect(session.address.clone()));
    }

    fn confirm(&self, session: &ResolvedSession, ids: Vec<MessageId>) {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Confirm(session.address.clone(), ids));
    }
}

fn app(heartbeat: Duration) -> (Router, Arc<QueueLink>) {
    let sessions = Arc::new(InMemorySessions::new(vec!["relay-s".into()]));
    sessions.insert("abc");
    let link = Arc::new(QueueLink::default());
    let coordinator = Arc::new(StreamCoordinator::new(sessions, link.clone()));
    let _ = link.coordinator.set(Arc::downgrade(&coordinator));

    let timings = Timings {
        heartbeat,
        ping_interval: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(60),
    };
    (build_router(AppState::new(timings, coordinator)), link)
}

async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, Option<String>, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_owned());
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn head_answers_headers_only() {
    let (app, link) = app(Duration::from_secs(5));
    let (status, content_type, body) = call(app, Method::HEAD, "/v1/msgstream").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert!(body.is_empty());
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn unknown_transport_is_plain_text_400() {
    let (app, link) = app(Duration::from_secs(5));
    let req = Request::builder()
        .uri("/v1/msgstream?sessionKey=abc&transport=carrier-pigeon")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(res.headers()["x-courier-error"], "BAD_REQUEST");
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn websocket_transport_is_refused_on_the_poll_route() {
    let (app, _link) = app(Duration::from_secs(5));
    let (status, _, body) = call(app, Method::GET, "/v1/msgstream?sessionKey=abc&transport=websocket").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("websocket"));
}

#[tokio::test]
async fn missing_session_key_is_rejected() {
    let (app, link) = app(Duration::from_secs(5));
    let (status, content_type, body) = call(app.clone(), Method::GET, "/v1/msgstream").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(content_type.unwrap().starts_with("text/plain"));
    assert!(body.contains("sessionKey"));

    let (status, _, _) = call(app, Method::GET, "/v1/msgstream?sessionKey=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn empty_short_poll_is_204_and_keeps_no_route() {
    let (app, link) = app(Duration::from_secs(5));
    let (status, _, body) = call(
        app,
        Method::GET,
        "/v1/msgstream?sessionKey=abc&transport=shortpolling",
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
    // Always-policy releases never disconnect.
    assert_eq!(
        link.calls(),
        vec![Call::Connect("sess/abc".into(), DisconnectPolicy::Always)]
    );
}

#[tokio::test]
async fn confirm_ids_are_forwarded_before_connect() {
    let (app, link) = app(Duration::from_secs(5));
    link.queue(Pending::new(5, r#"{"x":1}"#));

    let (status, content_type, body) = call(
        app,
        Method::GET,
        "/v1/msgstream?sessionKey=abc&transport=shortpolling&confirmIds=3,4",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, r#"{"5":{"x":1}}"#);

    let calls = link.calls();
    assert_eq!(calls[0], Call::Confirm("sess/abc".into(), vec![3, 4]));
    assert_eq!(calls[1], Call::Connect("sess/abc".into(), DisconnectPolicy::Always));
}

#[tokio::test]
async fn long_poll_defaults_and_releases_after_heartbeat() {
    let (app, link) = app(Duration::from_millis(100));
    let (status, _, body) = call(app, Method::GET, "/v1/msgstream?sessionKey=abc").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
    assert_eq!(
        link.calls(),
        vec![
            Call::Connect("sess/abc".into(), DisconnectPolicy::OnDelivery),
            Call::Disconnect("sess/abc".into()),
        ]
    );
}

#[tokio::test]
async fn unknown_session_gets_401_notice() {
    let (app, link) = app(Duration::from_secs(5));
    let (status, _, body) = call(app, Method::GET, "/v1/msgstream?sessionKey=nobody").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, r#"{"0":{"event":"session.unset","reason":"expired"}}"#);
    assert!(link.calls().is_empty());
}
