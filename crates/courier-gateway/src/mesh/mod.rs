//! Relay mesh: links, relays and leaf clients.

pub mod leaf;
pub mod link;
pub mod relay;

pub use leaf::{LeafClient, LeafEvent};
pub use link::Endpoint;
pub use relay::{Relay, RelayEvent};
