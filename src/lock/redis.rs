use async_trait::async_trait;
use redis::Script;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use uuid::Uuid;

use super::{DistributedLock, LockMutex, LockOptions};
use crate::error::{CacheError, Result};

/// Deletes the lock only if it still carries our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Single-instance Redis lock: `SET name token NX PX expiry`.
///
/// Each mutex uses a random token, so a mutex whose lock expired and was
/// taken by someone else cannot release the new holder's lock.
#[derive(Clone)]
pub struct RedisLock {
    connection: MultiplexedConnection,
    options: LockOptions,
    release: Script,
}

impl RedisLock {
    pub fn new(connection: MultiplexedConnection, options: LockOptions) -> Self {
        RedisLock {
            connection,
            options,
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

impl DistributedLock for RedisLock {
    fn mutex(&self, key: &str, expiry: Duration) -> Box<dyn LockMutex> {
        Box::new(RedisMutex {
            connection: self.connection.clone(),
            release: self.release.clone(),
            name: self.options.lock_name(key),
            token: Uuid::new_v4().to_string(),
            expiry,
            tries: self.options.tries.max(1),
            retry_delay: self.options.retry_delay,
        })
    }
}

struct RedisMutex {
    connection: MultiplexedConnection,
    release: Script,
    name: String,
    token: String,
    expiry: Duration,
    tries: u32,
    retry_delay: Duration,
}

impl RedisMutex {
    async fn try_acquire(&mut self) -> redis::RedisResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.name)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg((self.expiry.as_millis() as u64).max(1))
            .query_async(&mut self.connection)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl LockMutex for RedisMutex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&mut self) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..self.tries {
            match self.try_acquire().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(lock = %self.name, error = %e, "lock attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt + 1 < self.tries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let reason = match last_error {
            Some(e) => format!("lock '{}': {}", self.name, e),
            None => format!("lock '{}' is already taken", self.name),
        };
        Err(CacheError::LockAcquisitionFailed(reason))
    }

    async fn release(&mut self) -> Result<bool> {
        let deleted: i64 = self
            .release
            .key(&self.name)
            .arg(&self.token)
            .invoke_async(&mut self.connection)
            .await
            .map_err(|e| CacheError::LockReleaseFailed(format!("lock '{}': {}", self.name, e)))?;
        Ok(deleted == 1)
    }
}
