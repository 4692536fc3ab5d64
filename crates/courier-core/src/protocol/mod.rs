//! Protocol modules (envelope header, frame sets, payload encodings, store control).
//!
//! - `header`: the fixed 4-byte routing header trailing every envelope.
//! - `frames`: length-prefixed frame-set packets as they travel on a link.
//! - `envelope`: frame list <-> `{stack, payload, return_path, header}`.
//! - `payload`: encoding dispatch (utf8 / json / binary-packed).
//! - `control`: store commands and delivery batches carried as payloads.
//!
//! All parsers are panic-free: malformed input is reported as `CourierError`
//! instead of panicking or indexing raw buffers.

pub mod control;
pub mod envelope;
pub mod frames;
pub mod header;
pub mod payload;

pub use envelope::{Envelope, HopId};
pub use header::{Encoding, Flags, Header, DEFAULT_HOP_BUDGET, HEADER_LEN};
pub use payload::Payload;
