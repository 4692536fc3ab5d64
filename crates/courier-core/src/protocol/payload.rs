//! Payload encodings. Dispatch is purely on `Header::encoding`.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CourierError, Result};
use crate::protocol::header::{Encoding, Flags, Header};

/// Payload as surfaced to a destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Not decoded (no `AUTO_DECODE` flag).
    Raw(Bytes),
    Text(String),
    Json(Value),
}

impl Payload {
    /// Parse as a typed JSON value regardless of how it was surfaced.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        let res = match self {
            Payload::Raw(b) => serde_json::from_slice(b),
            Payload::Text(s) => serde_json::from_str(s),
            Payload::Json(v) => T::deserialize(v),
        };
        res.map_err(|e| CourierError::MalformedPayload(format!("json: {e}")))
    }
}

pub fn serialize_payload<T: Serialize + ?Sized>(header: &Header, value: &T) -> Result<Bytes> {
    match header.encoding {
        Encoding::Utf8 => match serde_json::to_value(value) {
            Ok(Value::String(s)) => Ok(Bytes::from(s)),
            Ok(_) => Err(CourierError::UnsupportedEncoding(
                "utf8 payload must be a string".into(),
            )),
            Err(e) => Err(CourierError::MalformedPayload(format!("utf8: {e}"))),
        },
        Encoding::Json => serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CourierError::MalformedPayload(format!("json: {e}"))),
        Encoding::Packed => postcard::to_allocvec(value)
            .map(Bytes::from)
            .map_err(|e| CourierError::MalformedPayload(format!("binary-packed: {e}"))),
        other => Err(CourierError::UnsupportedEncoding(other.as_str().into())),
    }
}

pub fn deserialize_payload<T: DeserializeOwned>(header: &Header, bytes: &[u8]) -> Result<T> {
    match header.encoding {
        Encoding::Utf8 => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| CourierError::MalformedPayload(format!("utf8: {e}")))?;
            serde_json::from_value(Value::String(s.to_owned()))
                .map_err(|e| CourierError::MalformedPayload(format!("utf8: {e}")))
        }
        Encoding::Json => serde_json::from_slice(bytes)
            .map_err(|e| CourierError::MalformedPayload(format!("json: {e}"))),
        Encoding::Packed => postcard::from_bytes(bytes)
            .map_err(|e| CourierError::MalformedPayload(format!("binary-packed: {e}"))),
        other => Err(CourierError::UnsupportedEncoding(other.as_str().into())),
    }
}

/// Decode a payload for a destination when the header asks for it.
///
/// Binary-packed payloads need a target type, so they cannot be auto-decoded.
pub fn auto_decode(header: &Header, bytes: Bytes) -> Result<Payload> {
    if !header.flags.contains(Flags::AUTO_DECODE) {
        return Ok(Payload::Raw(bytes));
    }
    match header.encoding {
        Encoding::Utf8 => deserialize_payload(header, &bytes).map(Payload::Text),
        Encoding::Json => deserialize_payload(header, &bytes).map(Payload::Json),
        other => Err(CourierError::UnsupportedEncoding(format!(
            "cannot auto-decode {}",
            other.as_str()
        ))),
    }
}
