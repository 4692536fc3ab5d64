//! Client-facing wire format shared by every transport.
//!
//! - Delivery body: `{"<id>": <payload>, ...}` in id order. Payloads are
//!   embedded as raw JSON; a payload that is not valid JSON is sent as a
//!   JSON string instead.
//! - Confirmations: comma-separated ids (`"1,2,5"`).

use serde_json::value::RawValue;
use serde_json::Value;

use courier_core::protocol::control::{MessageId, Pending};

pub fn delivery_body(batch: &[Pending]) -> String {
    let mut out = String::with_capacity(2 + batch.iter().map(|m| m.payload.len() + 8).sum::<usize>());
    out.push('{');
    for (i, m) in batch.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        out.push_str(&m.id.to_string());
        out.push_str("\":");
        match RawValue::from_string(m.payload.clone()) {
            Ok(raw) => out.push_str(raw.get()),
            Err(_) => out.push_str(&Value::String(m.payload.clone()).to_string()),
        }
    }
    out.push('}');
    out
}

/// Unparseable entries are skipped.
pub fn parse_confirm_ids(s: &str) -> Vec<MessageId> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| match p.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::debug!(entry = %p, "ignoring bad confirm id");
                None
            }
        })
        .collect()
}
