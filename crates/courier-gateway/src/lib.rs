//! Courier gateway library entry.
//!
//! Wires the relay mesh, the message store, the transport hosts and the
//! stream coordinator into a runnable node. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod error;
pub mod mesh;
pub mod node;
pub mod router;
pub mod session;
pub mod store;
pub mod stream;
pub mod transport;
