use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// A single field/value pair of a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> KeyVal<K, V> {
    pub fn new(key: K, value: V) -> Self {
        KeyVal { key, value }
    }
}

/// A store is a common interface for reading and writing key-value pairs.
///
/// On a miss, `get`, `hget` and `hget_all` delegate to the store's configured
/// [`Loader`](crate::Loader), if any, and never bypass it. Without a loader a
/// miss is reported as [`CacheError::KeyNotFound`](crate::CacheError::KeyNotFound).
///
/// Backend errors are returned to the caller as they are; stores never retry.
/// A `ttl` of [`Duration::ZERO`] means "no expiry" everywhere in this trait.
#[async_trait]
pub trait Store<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// A name for logging.
    ///
    /// # Example
    /// - "local"
    /// - "redis"
    fn name(&self) -> &'static str;

    /// Return the stored value, loading it on a miss.
    ///
    /// A value produced by the loader is cached with the store's default ttl
    /// before it is returned. A loader error is returned and nothing is cached.
    async fn get(&self, key: &K) -> Result<V>;

    /// Store the value, replacing any previous entry.
    async fn set(&self, key: &K, value: V, ttl: Duration) -> Result<()>;

    /// Store the value only if the key is absent. Returns whether it was stored.
    async fn set_nx(&self, key: &K, value: V, ttl: Duration) -> Result<bool>;

    /// Remove the keys. Absent keys are not an error.
    async fn delete(&self, keys: &[K]) -> Result<()>;

    /// Atomically add `delta` to a numeric value, starting from 0 if absent.
    async fn incr(&self, key: &K, delta: i64) -> Result<i64>;

    /// Change the remaining lifetime of an existing key.
    async fn expire(&self, key: &K, ttl: Duration) -> Result<()>;

    /// Remaining lifetime of a key. `None` if the key never expires.
    async fn ttl(&self, key: &K) -> Result<Option<Duration>>;

    /// Set fields of the hash stored at `key`.
    async fn hset(&self, key: &K, fields: Vec<KeyVal<K, V>>) -> Result<()>;

    /// Read one field of a hash, loading the field on a miss.
    async fn hget(&self, key: &K, field: &K) -> Result<V>;

    /// Read a whole hash, loading it with `Loader::load_all` on a miss.
    async fn hget_all(&self, key: &K) -> Result<HashMap<K, V>>;

    /// Remove fields from a hash.
    async fn hdel(&self, key: &K, fields: &[K]) -> Result<()>;

    /// Liveness probe of the backing medium.
    async fn ping(&self) -> Result<()>;

    /// Release underlying resources. The store must not be used afterwards.
    async fn close(&self);
}
