//! Client side of a distributed mutual-exclusion lock.
//!
//! A [`DistributedLock`] hands out one [`LockMutex`] per lock attempt. The
//! mutex is held until released or until its expiry passes, whichever comes
//! first; the expiry bounds how long a crashed holder can block others.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use memory::MemoryLock;
pub use redis::RedisLock;

/// One lock attempt on a named lock.
#[async_trait]
pub trait LockMutex: Send + Sync {
    /// Full lock name, including prefix and suffix.
    fn name(&self) -> &str;

    /// Acquire the lock, retrying within the mutex's own retry budget.
    ///
    /// Fails with [`CacheError::LockAcquisitionFailed`](crate::CacheError::LockAcquisitionFailed)
    /// when the lock stays taken. Callers bound the total wait by dropping the future.
    async fn acquire(&mut self) -> Result<()>;

    /// Release the lock. `Ok(false)` if it was no longer held by this mutex,
    /// e.g. because it expired.
    async fn release(&mut self) -> Result<bool>;
}

/// Factory for named, expiring lock mutexes backed by a shared service.
pub trait DistributedLock: Send + Sync {
    fn mutex(&self, key: &str, expiry: Duration) -> Box<dyn LockMutex>;
}

/// Naming and retry options shared by the lock backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Prepended to every lock name.
    pub prefix: String,
    /// Appended to every lock name.
    pub suffix: String,
    /// Attempts made by `acquire` before giving up.
    pub tries: u32,
    /// Pause between two attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            prefix: String::new(),
            suffix: "_lock".to_string(),
            tries: 32,
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl LockOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Canonical lock name: `{prefix}:{key}:{suffix}`, skipping empty parts.
    pub fn lock_name(&self, key: &str) -> String {
        [self.prefix.as_str(), key, self.suffix.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Holds an acquired lock and guarantees it gets released.
///
/// Call [`LockGuard::release`] on the normal path. If the guard is dropped
/// instead (the holding future was cancelled or panicked), the release is
/// spawned on the current tokio runtime. A failed release is logged, never
/// returned; the lock expiry covers that case.
pub struct LockGuard {
    mutex: Option<Box<dyn LockMutex>>,
}

impl LockGuard {
    pub fn new(mutex: Box<dyn LockMutex>) -> Self {
        LockGuard { mutex: Some(mutex) }
    }

    pub async fn release(mut self) {
        if let Some(mut mutex) = self.mutex.take() {
            release_logged(mutex.as_mut()).await;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(mut mutex) = self.mutex.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_logged(mutex.as_mut()).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    lock = mutex.name(),
                    "Unlock failed: no runtime available, lock is left to expire"
                );
            }
        }
    }
}

async fn release_logged(mutex: &mut dyn LockMutex) {
    match mutex.release().await {
        Ok(true) => tracing::trace!(lock = mutex.name(), "lock released"),
        Ok(false) => tracing::error!(
            lock = mutex.name(),
            "Unlock failed: lock was no longer held"
        ),
        Err(e) => tracing::error!(lock = mutex.name(), error = %e, "Unlock failed"),
    }
}
