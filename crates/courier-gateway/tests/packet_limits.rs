#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

use courier_core::protocol::control::{decode_batch, DisconnectPolicy, Pending};
use courier_core::protocol::frames::decode_frames;
use courier_core::protocol::{Encoding, Flags, Header, Payload};
use courier_gateway::config::MeshSection;
use courier_gateway::mesh::link::{read_packet, write_packet};
use courier_gateway::mesh::{LeafClient, LeafEvent, Relay, RelayEvent};
use courier_gateway::session::ResolvedSession;
use courier_gateway::store::{Forward, Store, StoreHost};
use courier_gateway::stream::{MeshStoreLink, StoreLink};

const WAIT: Duration = Duration::from_secs(5);

fn small_mesh() -> MeshSection {
    MeshSection {
        max_packet_bytes: 1024,
        ..MeshSection::default()
    }
}

async fn wait_linked(relay: &Relay, peer: &str) {
    timeout(WAIT, async {
        while !relay.is_linked(peer) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("link established");
}

fn quoted(len: usize) -> String {
    format!("\"{}\"", "a".repeat(len))
}

#[tokio::test]
async fn oversized_packet_is_skipped_and_stream_stays_aligned() {
    let (mut a, mut b) = tokio::io::duplex(64 * 1024);

    a.write_u32(2000).await.unwrap();
    a.write_all(&[7u8; 2000]).await.unwrap();
    write_packet(&mut a, &[Bytes::from_static(b"ok")]).await.unwrap();

    let err = read_packet(&mut b, 1024).await.expect_err("over the limit");
    assert_eq!(err.client_code().as_str(), "MALFORMED");

    let packet = read_packet(&mut b, 1024).await.unwrap().expect("next packet");
    assert_eq!(decode_frames(packet).unwrap(), vec![Bytes::from_static(b"ok")]);
}

#[tokio::test]
async fn oversized_send_is_dropped_without_losing_the_link() {
    let (relay, mut events) = Relay::new("r1", small_mesh());
    let ep = relay.bind("tcp://127.0.0.1:0").await.unwrap().to_string();
    let (leaf, mut leaf_events) = LeafClient::connect("leaf", &ep, &small_mesh()).await.unwrap();
    wait_linked(&relay, "leaf").await;

    leaf.send(vec!["r1".into()], Bytes::from(vec![b'x'; 4096]), None);

    let header = Header::for_stack(1)
        .unwrap()
        .with_encoding(Encoding::Utf8)
        .with_flags(Flags::AUTO_DECODE);
    leaf.send(vec!["r1".into()], Bytes::from_static(b"small"), Some(header));

    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        RelayEvent::Message { payload, .. } => assert_eq!(payload, Payload::Text("small".into())),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(relay.is_linked("leaf"));
    assert!(leaf_events.try_recv().is_err());
}

#[test]
fn forward_split_keeps_order_within_the_limit() {
    let fwd = Forward {
        address: "sess/k".into(),
        route: vec!["web-1".into(), "sess/k".into()],
        messages: (1..=4).map(|id| Pending::new(id, quoted(300))).collect(),
    };
    let (batches, oversized) = fwd.split(990);
    assert!(oversized.is_empty());
    assert_eq!(batches.len(), 2);
    let ids: Vec<u64> = batches
        .iter()
        .flat_map(|b| b.messages.iter().map(|m| m.id))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    for b in &batches {
        let encoded = courier_core::protocol::control::encode_batch(&b.messages).unwrap();
        assert!(encoded.len() <= 990);
        assert_eq!(b.route, vec!["web-1".to_string(), "sess/k".to_string()]);
    }

    let fwd = Forward {
        address: "sess/k".into(),
        route: vec!["sess/k".into()],
        messages: vec![Pending::new(1, quoted(2000)), Pending::new(2, "1")],
    };
    let (batches, oversized) = fwd.split(990);
    assert_eq!(oversized.len(), 1);
    assert_eq!(oversized[0].id, 1);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].messages, vec![Pending::new(2, "1")]);

    // An empty release batch is still one forward.
    let fwd = Forward {
        address: "sess/k".into(),
        route: vec!["sess/k".into()],
        messages: Vec::new(),
    };
    assert_eq!(fwd.split(990).0.len(), 1);
}

#[tokio::test]
async fn store_backlog_over_packet_limit_is_delivered_in_batches() {
    let (relay, relay_events) = Relay::new("relay-s", small_mesh());
    let ep = relay.bind("tcp://127.0.0.1:0").await.unwrap().to_string();
    let (store, forwards) = Store::new(Duration::from_secs(60));
    tokio::spawn(StoreHost::new(Arc::clone(&relay), Arc::clone(&store)).run(relay_events, forwards));

    let (leaf, mut leaf_events) = LeafClient::connect("web-1", &ep, &small_mesh()).await.unwrap();
    wait_linked(&relay, "web-1").await;
    let link = MeshStoreLink::new(leaf);
    let session = ResolvedSession {
        address: "sess/k".into(),
        store_route: vec!["relay-s".into()],
    };

    // One command per message keeps each control packet under the limit.
    for _ in 0..4 {
        link.send(&session.store_route, "sess/k", vec![quoted(300)]);
    }
    link.connect(&session, DisconnectPolicy::Never);

    let mut ids = Vec::new();
    while ids.len() < 4 {
        match timeout(WAIT, leaf_events.recv()).await.unwrap().unwrap() {
            LeafEvent::Message { payload, .. } => {
                ids.extend(decode_batch(&payload).unwrap().into_iter().map(|m| m.id));
            }
            LeafEvent::Disconnected => panic!("relay link lost"),
        }
    }
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert!(relay.is_linked("web-1"));

    // A message that can never fit is dropped; the next one still arrives.
    store.confirm("sess/k", &[1, 2, 3, 4]);
    store.send("sess/k", vec![quoted(2000), "1".into()]);

    match timeout(WAIT, leaf_events.recv()).await.unwrap().unwrap() {
        LeafEvent::Message { payload, .. } => {
            let batch = decode_batch(&payload).unwrap();
            assert_eq!(batch, vec![Pending::new(6, "1")]);
        }
        LeafEvent::Disconnected => panic!("relay link lost"),
    }
    assert!(relay.is_linked("web-1"));
}
