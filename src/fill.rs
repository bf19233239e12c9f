//! Read-through with double-checked locking for sources that populate their
//! own cache.
//!
//! Unlike [`Loader`](crate::Loader), a [`FillSource`] does not return the
//! loaded value: `fill` writes it into the cache and the caller re-reads it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::error::{CacheError, Result};

/// A cache paired with the origin that fills it.
#[async_trait]
pub trait FillSource<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Read `key` from the cache.
    async fn cached(&self, key: &K) -> Option<V>;

    /// Load `key` from the origin and write it into the cache.
    async fn fill(&self, key: &K) -> Result<()>;
}

type Slots<K> = HashMap<K, Arc<tokio::sync::Mutex<()>>>;

/// Set of async mutexes, one per key, created on demand and dropped when no
/// one holds or waits for them.
pub struct KeyedLocks<K> {
    slots: Mutex<Slots<K>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        KeyedLocks {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots<K>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let slot = Arc::clone(self.slots().entry(key.clone()).or_default());

        // Created before waiting so a cancelled waiter still drops its slot.
        let mut keyed = KeyedGuard {
            locks: self,
            key: key.clone(),
            guard: None,
        };
        keyed.guard = Some(slot.lock_owned().await);
        keyed
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key of a [`KeyedLocks`].
pub struct KeyedGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.locks.slots();
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

/// Return the cached value for `key`, filling the cache from the origin on a
/// miss.
///
/// Concurrent misses for the same key are serialized through `locks`; the
/// cache is checked again once the lock is held, so only the first caller
/// fills. A fill that succeeds but leaves nothing in the cache is an error.
pub async fn get_or_fill<K, V, S>(key: &K, source: &S, locks: &KeyedLocks<K>) -> Result<V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    S: FillSource<K, V> + ?Sized,
{
    if let Some(value) = source.cached(key).await {
        return Ok(value);
    }

    let _guard = locks.lock(key).await;

    if let Some(value) = source.cached(key).await {
        return Ok(value);
    }

    tracing::debug!("cache miss, filling from origin");
    source.fill(key).await?;

    source
        .cached(key)
        .await
        .ok_or_else(|| CacheError::load_msg("value missing from cache after fill"))
}
