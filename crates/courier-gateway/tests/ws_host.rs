#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use axum::extract::ws::Message;
use axum::http::StatusCode;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use courier_core::protocol::control::{DisconnectPolicy, Pending};
use courier_gateway::transport::ws::session_close_code;
use courier_gateway::transport::{TransportHost, TransportKind, WsHost};

fn connected(key: &str) -> (WsHost, mpsc::Receiver<Message>) {
    let host = WsHost::new(key, vec![9]);
    let (tx, rx) = mpsc::channel(16);
    host.set_connection(tx);
    (host, rx)
}

#[test]
fn deliveries_stream_without_closing() {
    let (host, mut rx) = connected("k");
    assert_eq!(host.kind(), TransportKind::WebSocket);
    assert_eq!(host.disconnect_policy(), DisconnectPolicy::Never);
    assert_eq!(host.take_confirm_ids(), vec![9]);

    host.deliver(&[]);
    assert!(rx.try_recv().is_err());

    host.deliver(&[Pending::new(1, r#"{"a":1}"#)]);
    host.deliver(&[Pending::new(2, "2")]);
    assert!(!host.is_closed());

    match rx.try_recv().unwrap() {
        Message::Text(body) => assert_eq!(body, r#"{"1":{"a":1}}"#),
        other => panic!("unexpected frame: {other:?}"),
    }
    match rx.try_recv().unwrap() {
        Message::Text(body) => assert_eq!(body, r#"{"2":2}"#),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn end_session_sends_notice_then_application_close() {
    let (host, mut rx) = connected("k");
    host.end_session(StatusCode::UNAUTHORIZED, &[Pending::new(0, r#"{"event":"session.unset"}"#)]);

    assert!(matches!(rx.try_recv().unwrap(), Message::Text(_)));
    match rx.try_recv().unwrap() {
        Message::Close(Some(frame)) => assert_eq!(frame.code, 4401),
        other => panic!("unexpected frame: {other:?}"),
    }
    assert!(host.is_closed());
}

#[test]
fn server_error_closes_with_1011() {
    let (host, mut rx) = connected("k");
    host.server_error("backend down");
    match rx.try_recv().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, 1011);
            assert_eq!(frame.reason, "backend down");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn close_is_idempotent() {
    let (host, mut rx) = connected("k");
    host.close();
    host.close();
    assert!(matches!(rx.try_recv().unwrap(), Message::Close(None)));
    assert!(rx.try_recv().is_err());
    assert!(host.is_closed());

    // Deliveries after close go nowhere.
    host.deliver(&[Pending::new(1, "1")]);
}

#[test]
fn close_codes_map_http_status() {
    assert_eq!(session_close_code(StatusCode::UNAUTHORIZED), 4401);
    assert_eq!(session_close_code(StatusCode::GONE), 4410);
}

#[tokio::test]
async fn full_queue_closes_the_host_and_wakes_the_session() {
    let host = WsHost::new("k", Vec::new());
    let (tx, mut rx) = mpsc::channel(1);
    // The session loop keeps its own sender for pings and pongs.
    let session_tx = tx.clone();
    host.set_connection(tx);

    host.deliver(&[Pending::new(1, "1")]);
    host.deliver(&[Pending::new(2, "2")]);

    timeout(Duration::from_secs(1), host.closed())
        .await
        .expect("session loop woken");
    assert!(host.is_closed());
    assert!(!session_tx.is_closed());
    assert!(matches!(rx.try_recv().unwrap(), Message::Text(_)));
}

#[tokio::test]
async fn end_session_wakes_the_session_loop() {
    let (host, _rx) = connected("k");
    host.end_session(StatusCode::GONE, &[]);
    timeout(Duration::from_secs(1), host.closed())
        .await
        .expect("session loop woken");
}
