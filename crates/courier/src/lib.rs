//! Top-level facade crate for courier.
//!
//! Re-exports the protocol core and the gateway library so users can depend on a single crate.

pub mod core {
    pub use courier_core::*;
}

pub mod gateway {
    pub use courier_gateway::*;
}
