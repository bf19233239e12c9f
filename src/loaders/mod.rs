//! Loader wrappers that protect the origin from concurrent misses.
//!
//! The wrappers stack: `SuppressedLoader<_, _, DistributedLockLoader<_, _, Origin>>`
//! merges concurrent loads inside one process before any of them goes to the
//! lock service, and the distributed lock lets one process load at a time.

pub mod distributed;
pub mod suppressed;

pub use distributed::{DistributedLockLoader, LockKeyFn};
pub use suppressed::SuppressedLoader;
