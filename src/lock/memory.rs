use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{DistributedLock, LockMutex, LockOptions};
use crate::error::{CacheError, Result};

struct Holder {
    token: Uuid,
    until: Instant,
}

type Holders = Arc<Mutex<HashMap<String, Holder>>>;

fn holders(held: &Holders) -> MutexGuard<'_, HashMap<String, Holder>> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process lock service with the same contract as [`RedisLock`](super::RedisLock).
///
/// Clones share the same lock table, so several loaders holding a clone
/// behave like separate processes talking to one lock service.
#[derive(Clone, Default)]
pub struct MemoryLock {
    held: Holders,
    options: LockOptions,
}

impl MemoryLock {
    pub fn new(options: LockOptions) -> Self {
        MemoryLock {
            held: Holders::default(),
            options,
        }
    }

    /// Whether the lock for `key` is currently held and unexpired.
    pub fn is_locked(&self, key: &str) -> bool {
        let name = self.options.lock_name(key);
        holders(&self.held)
            .get(&name)
            .is_some_and(|holder| holder.until > Instant::now())
    }
}

impl DistributedLock for MemoryLock {
    fn mutex(&self, key: &str, expiry: Duration) -> Box<dyn LockMutex> {
        Box::new(MemoryMutex {
            held: Arc::clone(&self.held),
            name: self.options.lock_name(key),
            token: Uuid::new_v4(),
            expiry,
            tries: self.options.tries.max(1),
            retry_delay: self.options.retry_delay,
        })
    }
}

struct MemoryMutex {
    held: Holders,
    name: String,
    token: Uuid,
    expiry: Duration,
    tries: u32,
    retry_delay: Duration,
}

impl MemoryMutex {
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut held = holders(&self.held);

        if held.get(&self.name).is_some_and(|holder| holder.until > now) {
            return false;
        }

        held.insert(
            self.name.clone(),
            Holder {
                token: self.token,
                until: now + self.expiry,
            },
        );
        true
    }
}

#[async_trait]
impl LockMutex for MemoryMutex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&mut self) -> Result<()> {
        for attempt in 0..self.tries {
            if self.try_acquire() {
                return Ok(());
            }
            if attempt + 1 < self.tries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(CacheError::LockAcquisitionFailed(format!(
            "lock '{}' is already taken",
            self.name
        )))
    }

    async fn release(&mut self) -> Result<bool> {
        let now = Instant::now();
        let mut held = holders(&self.held);

        match held.get(&self.name) {
            Some(holder) if holder.token == self.token && holder.until > now => {
                held.remove(&self.name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
