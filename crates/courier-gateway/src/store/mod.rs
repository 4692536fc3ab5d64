//! Message store: TTL-bounded per-address buffers with disconnect policies,
//! plus the host that binds it to a relay.

mod cache;
pub mod host;

pub use cache::{Forward, Store};
pub use host::StoreHost;
