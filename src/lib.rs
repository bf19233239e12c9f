//! loader-cache - A read-through cache with stampede protection for Rust
//!
//! This library provides:
//! - A typed [`Store`] interface with an in-process (Moka) and a Redis backend
//! - Read-through loading of misses via a pluggable [`Loader`]
//! - Coalescing of concurrent loads of the same key within one process
//! - Cross-process mutual exclusion of loads via a distributed lock
//!
//! # Example
//!
//! ```ignore
//! use loader_cache::{
//!     DistributedLockLoader, FnLoader, LocalStore, LocalStoreConfig, MemoryLock, Store,
//!     SuppressedLoader,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let origin = FnLoader::new(|id: u64| async move { db::find_user(id).await });
//!
//!     // Coalesce locally, then lock across processes before hitting the origin.
//!     let loader = SuppressedLoader::new(
//!         DistributedLockLoader::new(origin, MemoryLock::default())
//!             .with_expiry(Duration::from_secs(1)),
//!     );
//!
//!     let users: LocalStore<u64, User> = LocalStore::new(LocalStoreConfig {
//!         ttl: Duration::from_secs(5),
//!         ..Default::default()
//!     })
//!     .with_loader(loader);
//!
//!     // Misses go through the loader once, hits are served from memory.
//!     let user = users.get(&123).await.unwrap();
//! }
//! ```

pub mod codec;
mod error;
pub mod fill;
mod loader;
pub mod loaders;
pub mod lock;
mod store;
pub mod stores;

// Re-export public API
pub use codec::{KeyDecoder, KeyEncoder, ValueCodec};
pub use error::{BoxError, CacheError, Result};
pub use fill::{FillSource, KeyedLocks, get_or_fill};
pub use loader::{FnLoader, Loader, LoaderAllFn, LoaderFn};
pub use loaders::{DistributedLockLoader, LockKeyFn, SuppressedLoader};
pub use lock::{DistributedLock, LockGuard, LockMutex, LockOptions, MemoryLock, RedisLock};
pub use store::{KeyVal, Store};
pub use stores::local::{LocalStore, LocalStoreConfig};
pub use stores::redis::{RedisStore, RedisStoreConfig};
