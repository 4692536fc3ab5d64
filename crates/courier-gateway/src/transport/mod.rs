//! Transport hosts: long polling, short polling and WebSocket.
//!
//! All three share the delivery body format in [`codec`] and implement
//! [`host::TransportHost`] so the stream coordinator can drive them alike.

pub mod codec;
pub mod host;
pub mod poll;
pub mod ws;

pub use host::{TransportHost, TransportKind};
pub use poll::{LongPollHost, PollReply, ShortPollHost};
pub use ws::WsHost;
