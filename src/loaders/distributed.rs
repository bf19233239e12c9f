use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{KeyEncoder, display_encoder};
use crate::error::{CacheError, Result};
use crate::loader::Loader;
use crate::lock::{DistributedLock, LockGuard};
use crate::store::Store;

/// Maps an encoded cache key to the name of its lock.
pub type LockKeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

const DEFAULT_EXPIRY: Duration = Duration::from_secs(8);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Loader wrapper that holds a distributed lock on the key while the inner
/// loader runs, so at most one process loads a given key at a time.
///
/// `load` and `load_all` lock the same name for a key. The lock is released
/// when the inner call finishes, fails, panics or is cancelled; a release
/// failure is logged and never replaces the inner result.
pub struct DistributedLockLoader<K, V, L> {
    inner: L,
    lock: Arc<dyn DistributedLock>,
    lock_key: LockKeyFn,
    encode: KeyEncoder<K>,
    expiry: Duration,
    acquire_timeout: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, L> DistributedLockLoader<K, V, L>
where
    K: Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: Loader<K, V>,
{
    pub fn new<D>(inner: L, lock: D) -> Self
    where
        D: DistributedLock + 'static,
    {
        DistributedLockLoader {
            inner,
            lock: Arc::new(lock),
            lock_key: Arc::new(|key: &str| key.to_string()),
            encode: display_encoder(),
            expiry: DEFAULT_EXPIRY,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            _value: PhantomData,
        }
    }
}

impl<K, V, L> DistributedLockLoader<K, V, L> {
    /// Derive lock names from encoded keys with `lock_key`.
    pub fn with_lock_key(mut self, lock_key: LockKeyFn) -> Self {
        self.lock_key = lock_key;
        self
    }

    pub fn with_key_encoder(mut self, encode: KeyEncoder<K>) -> Self {
        self.encode = encode;
        self
    }

    /// How long the lock is held at most if never released.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Upper bound on the time spent waiting for the lock.
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    async fn lock(&self, key: &K) -> Result<LockGuard> {
        let name = (self.lock_key)(&(self.encode)(key));
        let mut mutex = self.lock.mutex(&name, self.expiry);

        match tokio::time::timeout(self.acquire_timeout, mutex.acquire()).await {
            Ok(Ok(())) => {
                tracing::trace!(lock = mutex.name(), "lock acquired");
                Ok(LockGuard::new(mutex))
            }
            Ok(Err(e)) => {
                tracing::warn!(lock = mutex.name(), error = %e, "acquire lock failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(lock = mutex.name(), "acquire lock timed out");
                Err(CacheError::LockAcquisitionFailed(format!(
                    "lock '{}' not acquired within {:?}",
                    mutex.name(),
                    self.acquire_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<K, V, L> Loader<K, V> for DistributedLockLoader<K, V, L>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: Loader<K, V>,
{
    async fn load(&self, store: &dyn Store<K, V>, key: &K) -> Result<V> {
        let guard = self.lock(key).await?;
        let result = self.inner.load(store, key).await;
        guard.release().await;
        result
    }

    async fn load_all(&self, store: &dyn Store<K, V>, key: &K) -> Result<HashMap<K, V>> {
        let guard = self.lock(key).await?;
        let result = self.inner.load_all(store, key).await;
        guard.release().await;
        result
    }
}
