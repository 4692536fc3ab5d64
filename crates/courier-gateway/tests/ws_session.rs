#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use courier_core::protocol::control::{DisconnectPolicy, MessageId, Pending};
use courier_gateway::app_state::{AppState, Timings};
use courier_gateway::router::build_router;
use courier_gateway::session::{InMemorySessions, ResolvedSession};
use courier_gateway::stream::{StoreLink, StreamCoordinator};

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Connect(String, DisconnectPolicy),
    Disconnect(String),
    Confirm(String, Vec<MessageId>),
}

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

    async fn wait_for(&self, call: Call) {
        timeout(WAIT, async {
            while !self.calls().contains(&call) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never saw {call:?}, got {:?}", self.calls()));
    }
}

impl StoreLink for QueueLink {
    fn connect(&self, session: &ResolvedSession, policy: DisconnectPolicy) {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Connect(session.address.clone(), policy));

        let batch: Vec<Pending> = self.queued.lock().unwrap().drain(..).collect();
        if batch.is_empty() {
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

async fn serve() -> (SocketAddr, Arc<QueueLink>) {
    let sessions = Arc::new(InMemorySessions::new(vec!["relay-s".into()]));
    sessions.insert("abc");
    let link = Arc::new(QueueLink::default());
    let coordinator = Arc::new(StreamCoordinator::new(sessions, link.clone()));
    let _ = link.coordinator.set(Arc::downgrade(&coordinator));

    let timings = Timings {
        heartbeat: Duration::from_secs(30),
        ping_interval: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(60),
    };
    let app = build_router(AppState::new(timings, coordinator));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, link)
}

async fn open(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/v1/msgstream/ws?{query}"))
        .await
        .expect("upgrade");
    ws
}

/// Next frame that is not a ping or pong.
async fn next_frame(ws: &mut Client) -> Option<Message> {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(m)) => return Some(m),
                _ => return None,
            }
        }
    })
    .await
    .expect("frame in time")
}

#[tokio::test]
async fn streams_deliveries_and_forwards_text_confirms() {
    let (addr, link) = serve().await;
    link.queued.lock().unwrap().push(Pending::new(1, r#"{"x":1}"#));

    let mut ws = open(addr, "sessionKey=abc&confirmIds=7").await;
    match next_frame(&mut ws).await {
        Some(Message::Text(body)) => assert_eq!(body, r#"{"1":{"x":1}}"#),
        other => panic!("unexpected frame: {other:?}"),
    }
    let calls = link.calls();
    assert_eq!(calls[0], Call::Confirm("sess/abc".into(), vec![7]));
    assert_eq!(calls[1], Call::Connect("sess/abc".into(), DisconnectPolicy::Never));

    ws.send(Message::Text("1,2".into())).await.unwrap();
    link.wait_for(Call::Confirm("sess/abc".into(), vec![1, 2])).await;

    // Release on socket close drops the store route.
    ws.close(None).await.unwrap();
    link.wait_for(Call::Disconnect("sess/abc".into())).await;
}

#[tokio::test]
async fn unknown_session_gets_notice_then_application_close() {
    let (addr, link) = serve().await;
    let mut ws = open(addr, "sessionKey=nobody").await;

    match next_frame(&mut ws).await {
        Some(Message::Text(body)) => {
            assert_eq!(body, r#"{"0":{"event":"session.unset","reason":"expired"}}"#)
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    match next_frame(&mut ws).await {
        Some(Message::Close(Some(frame))) => assert_eq!(u16::from(frame.code), 4401),
        other => panic!("unexpected frame: {other:?}"),
    }
    assert!(link.calls().is_empty());
}

#[tokio::test]
async fn newer_socket_closes_the_older_one_without_disconnect() {
    let (addr, link) = serve().await;

    let mut first = open(addr, "sessionKey=abc").await;
    link.wait_for(Call::Connect("sess/abc".into(), DisconnectPolicy::Never)).await;

    let _second = open(addr, "sessionKey=abc").await;
    timeout(WAIT, async {
        while link.calls().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    match next_frame(&mut first).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("unexpected frame: {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!link
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Disconnect(_))));
}
