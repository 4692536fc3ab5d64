//! courier core: wire envelope, frame codec, payload encodings and the store
//! control contract shared by relays, leaf clients and store hosts.
//!
//! This crate carries no transport or runtime dependencies so the same
//! parsing code runs in every mesh node and in test tooling.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Every inbound
//! packet is hostile until parsed: malformed input surfaces as
//! `CourierError` and the caller drops that packet only.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{CourierError, Result};
