//! Stream coordination: binds live transport hosts to resolved sessions and
//! to the store that buffers their messages.

mod coordinator;
pub mod link;

pub use coordinator::{ReleaseGuard, StreamCoordinator};
pub use link::{MeshStoreLink, StoreLink};
