//! Store implementations.

pub mod local;
pub mod redis;

pub use local::{LocalStore, LocalStoreConfig};
pub use redis::{RedisStore, RedisStoreConfig};
