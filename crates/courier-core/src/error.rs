//! Shared error type across courier crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed message.
    BadRequest,
    /// Envelope could not be parsed or decoded.
    Malformed,
    /// Payload encoding not supported for this operation.
    UnsupportedEncoding,
    /// Store API misuse (empty route, unknown policy).
    InvalidRoute,
    /// Listener could not bind its endpoint.
    BindConflict,
    /// A link or transport refused the message.
    TransportSend,
    /// Session lookup failed.
    SessionResolution,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in logs and JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::Malformed => "MALFORMED",
            ClientCode::UnsupportedEncoding => "UNSUPPORTED_ENCODING",
            ClientCode::InvalidRoute => "INVALID_ROUTE",
            ClientCode::BindConflict => "BIND_CONFLICT",
            ClientCode::TransportSend => "TRANSPORT_SEND",
            ClientCode::SessionResolution => "SESSION_RESOLUTION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, CourierError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("bind conflict: {0}")]
    BindConflict(String),
    #[error("transport send failed: {0}")]
    TransportSend(String),
    #[error("session resolution failed: {0}")]
    SessionResolution(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl CourierError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            CourierError::BadRequest(_) => ClientCode::BadRequest,
            CourierError::MalformedHeader(_)
            | CourierError::MalformedEnvelope(_)
            | CourierError::MalformedPayload(_) => ClientCode::Malformed,
            CourierError::UnsupportedEncoding(_) => ClientCode::UnsupportedEncoding,
            CourierError::InvalidRoute(_) => ClientCode::InvalidRoute,
            CourierError::BindConflict(_) => ClientCode::BindConflict,
            CourierError::TransportSend(_) => ClientCode::TransportSend,
            CourierError::SessionResolution(_) => ClientCode::SessionResolution,
            CourierError::Internal(_) => ClientCode::Internal,
        }
    }
}
