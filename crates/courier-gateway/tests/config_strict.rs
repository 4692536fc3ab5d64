#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use courier_gateway::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
relay:
  identity: "relay-a"
  peerz: ["tcp://10.0.0.2:7700"] # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_relay_config() {
    let ok = r#"
version: 1
relay:
  identity: "relay-a"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);

    let relay = cfg.relay.expect("relay section");
    assert_eq!(relay.identity, "relay-a");
    assert_eq!(relay.bind, "tcp://0.0.0.0:7700");
    assert!(relay.peers.is_empty());
    assert!(cfg.web.is_none());
}

#[test]
fn store_ttl_falls_back_to_thirty_minutes_plus_margin() {
    let cfg = config::load_from_str("version: 1\nrelay:\n  identity: r\n").unwrap();
    assert_eq!(cfg.store.ttl(), Duration::from_secs(30 * 60 + 60));

    let cfg = config::load_from_str(
        "version: 1\nrelay:\n  identity: r\nstore:\n  session_ttl_secs: 600\n  ttl_margin_secs: 5\n",
    )
    .unwrap();
    assert_eq!(cfg.store.ttl(), Duration::from_secs(605));
}

#[test]
fn web_section_defaults() {
    let ok = r#"
version: 1
web:
  identity: "web-1"
  relay: "tcp://127.0.0.1:7700"
  store_route: ["relay-a"]
"#;
    let cfg = config::load_from_str(ok).unwrap();
    let web = cfg.web.unwrap();
    assert_eq!(web.listen, "0.0.0.0:8080");
    assert_eq!(web.heartbeat_ms, 30000);
    assert!(web.sessions.is_empty());
}

#[test]
fn rejects_config_without_any_role() {
    let err = config::load_from_str("version: 1\n").expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn rejects_empty_store_route() {
    let bad = r#"
version: 1
web:
  identity: "web-1"
  relay: "tcp://127.0.0.1:7700"
  store_route: []
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn rejects_idle_timeout_not_above_ping() {
    let bad = r#"
version: 1
web:
  identity: "web-1"
  relay: "tcp://127.0.0.1:7700"
  store_route: ["relay-a"]
  ping_interval_ms: 20000
  idle_timeout_ms: 20000
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn rejects_unknown_version() {
    let err = config::load_from_str("version: 2\nrelay:\n  identity: r\n").expect_err("must fail");
    assert!(err.to_string().contains("version"));
}

#[test]
fn shipped_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../courier.yaml");
    let cfg = config::load_from_file(path).expect("sample config");
    assert_eq!(cfg.web.unwrap().sessions, vec!["dev".to_string()]);
}
