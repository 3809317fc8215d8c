//! Filesystem primitives used by the engine: hardlinks and the state lock.
pub mod error;
pub mod hardlink;
pub mod helpers;
pub mod lock;

pub use error::LinkError;
pub use hardlink::{LinkManager, MAX_TRACKED_SIZE, is_linked};
pub use lock::StateLock;
