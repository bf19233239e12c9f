use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::codec::{KeyDecoder, KeyEncoder, display_encoder, parse_decoder};
use crate::error::{CacheError, Result};
use crate::loader::Loader;
use crate::store::{KeyVal, Store};

const TIER: &str = "local";

/// Configuration for LocalStore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Default time to live for values produced by the loader.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How often expired entries are swept out.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        LocalStoreConfig {
            max_capacity: 10_000,
            ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// A value together with its own deadline.
#[derive(Clone)]
struct Item<T> {
    value: T,
    deadline: Option<Instant>,
}

impl<T> Item<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Item {
            value,
            deadline: deadline_after(ttl),
        }
    }
}

fn deadline_after(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

/// Makes moka expire each item at its own deadline.
struct ItemExpiry;

impl<T> moka::Expiry<String, Item<T>> for ItemExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        item: &Item<T>,
        created_at: Instant,
    ) -> Option<Duration> {
        item.deadline
            .map(|deadline| deadline.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        item: &Item<T>,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        item.deadline
            .map(|deadline| deadline.saturating_duration_since(updated_at))
    }
}

type Fields<V> = HashMap<String, V>;

/// In-process store backed by Moka.
///
/// Entries carry their own deadline, so `set`, `expire` and `ttl` work per
/// key. Expired entries are never returned and are swept out in the
/// background every `cleanup_interval`.
///
/// `incr` is not supported: values are typed, not counters.
pub struct LocalStore<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: Cache<String, Item<V>>,
    hashes: Cache<String, Item<Fields<V>>>,
    ttl: Duration,
    loader: Option<Arc<dyn Loader<K, V>>>,
    encode: KeyEncoder<K>,
    decode: KeyDecoder<K>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<K, V> LocalStore<K, V>
where
    K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new LocalStore with the given configuration.
    ///
    /// The cleanup task is spawned on the current tokio runtime. Outside a
    /// runtime expired entries are still never served, only swept lazily.
    ///
    /// # Example
    /// ```ignore
    /// let store = LocalStore::new(LocalStoreConfig {
    ///     ttl: Duration::from_secs(5),
    ///     ..Default::default()
    /// })
    /// .with_loader(SuppressedLoader::new(UserLoader::new(db)));
    /// ```
    pub fn new(config: LocalStoreConfig) -> Self
    where
        K: Display + FromStr,
    {
        let entries = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(ItemExpiry)
            .build();
        let hashes = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(ItemExpiry)
            .build();

        let sweeper = spawn_sweeper(entries.clone(), hashes.clone(), config.cleanup_interval);

        LocalStore {
            entries,
            hashes,
            ttl: config.ttl,
            loader: None,
            encode: display_encoder(),
            decode: parse_decoder(),
            sweeper: Mutex::new(sweeper),
            closed: AtomicBool::new(false),
        }
    }

    /// Use `loader` to fill misses.
    pub fn with_loader<L>(mut self, loader: L) -> Self
    where
        L: Loader<K, V> + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn with_key_encoder(mut self, encode: KeyEncoder<K>) -> Self {
        self.encode = encode;
        self
    }

    pub fn with_key_decoder(mut self, decode: KeyDecoder<K>) -> Self {
        self.decode = decode;
        self
    }

    /// Number of plain and hash entries currently held (for monitoring/debugging).
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count() + self.hashes.entry_count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    async fn load(&self, key: &K) -> Result<V> {
        let Some(loader) = &self.loader else {
            return Err(CacheError::KeyNotFound);
        };
        loader.load(self, key).await
    }

    async fn load_all(&self, key: &K) -> Result<HashMap<K, V>> {
        let Some(loader) = &self.loader else {
            return Err(CacheError::KeyNotFound);
        };
        loader.load_all(self, key).await
    }

    async fn deadline_of(&self, cache_key: &str) -> Option<Option<Instant>> {
        if let Some(item) = self.entries.get(cache_key).await {
            return Some(item.deadline);
        }
        self.hashes.get(cache_key).await.map(|item| item.deadline)
    }
}

fn spawn_sweeper<V, H>(
    entries: Cache<String, Item<V>>,
    hashes: Cache<String, Item<H>>,
    period: Duration,
) -> Option<JoinHandle<()>>
where
    V: Clone + Send + Sync + 'static,
    H: Clone + Send + Sync + 'static,
{
    if period.is_zero() {
        return None;
    }

    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no tokio runtime, local store cleanup task not started");
        return None;
    };

    Some(handle.spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            entries.run_pending_tasks().await;
            hashes.run_pending_tasks().await;
            tracing::trace!(
                entries = entries.entry_count(),
                hashes = hashes.entry_count(),
                "swept expired local entries"
            );
        }
    }))
}

impl<K, V> Drop for LocalStore<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let sweeper = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = sweeper.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl<K, V> Store<K, V> for LocalStore<K, V>
where
    K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        TIER
    }

    async fn get(&self, key: &K) -> Result<V> {
        self.ensure_open()?;
        let cache_key = (self.encode)(key);

        if let Some(item) = self.entries.get(&cache_key).await {
            return Ok(item.value);
        }

        tracing::debug!(key = %cache_key, "local cache miss");
        let value = self.load(key).await?;
        self.entries
            .insert(cache_key, Item::new(value.clone(), self.ttl))
            .await;

        Ok(value)
    }

    async fn set(&self, key: &K, value: V, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        self.entries
            .insert((self.encode)(key), Item::new(value, ttl))
            .await;
        Ok(())
    }

    async fn set_nx(&self, key: &K, value: V, ttl: Duration) -> Result<bool> {
        self.ensure_open()?;
        let entry = self
            .entries
            .entry((self.encode)(key))
            .or_insert_with(async move { Item::new(value, ttl) })
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, keys: &[K]) -> Result<()> {
        self.ensure_open()?;
        for key in keys {
            let cache_key = (self.encode)(key);
            self.entries.invalidate(&cache_key).await;
            self.hashes.invalidate(&cache_key).await;
        }
        Ok(())
    }

    async fn incr(&self, _key: &K, _delta: i64) -> Result<i64> {
        self.ensure_open()?;
        Err(CacheError::Unsupported {
            tier: TIER,
            operation: "incr",
        })
    }

    async fn expire(&self, key: &K, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        let cache_key = (self.encode)(key);
        let deadline = deadline_after(ttl);

        if let Some(mut item) = self.entries.get(&cache_key).await {
            item.deadline = deadline;
            self.entries.insert(cache_key, item).await;
            return Ok(());
        }
        if let Some(mut item) = self.hashes.get(&cache_key).await {
            item.deadline = deadline;
            self.hashes.insert(cache_key, item).await;
            return Ok(());
        }

        Err(CacheError::KeyNotFound)
    }

    async fn ttl(&self, key: &K) -> Result<Option<Duration>> {
        self.ensure_open()?;
        match self.deadline_of(&(self.encode)(key)).await {
            Some(deadline) => {
                Ok(deadline.map(|deadline| deadline.saturating_duration_since(Instant::now())))
            }
            None => Err(CacheError::KeyNotFound),
        }
    }

    async fn hset(&self, key: &K, fields: Vec<KeyVal<K, V>>) -> Result<()> {
        self.ensure_open()?;
        if fields.is_empty() {
            return Ok(());
        }

        let cache_key = (self.encode)(key);
        let mut item = self.hashes.get(&cache_key).await.unwrap_or(Item {
            value: HashMap::new(),
            deadline: None,
        });
        for field in fields {
            item.value.insert((self.encode)(&field.key), field.value);
        }
        self.hashes.insert(cache_key, item).await;

        Ok(())
    }

    async fn hget(&self, key: &K, field: &K) -> Result<V> {
        self.ensure_open()?;
        let cache_key = (self.encode)(key);
        let field_key = (self.encode)(field);

        if let Some(item) = self.hashes.get(&cache_key).await
            && let Some(value) = item.value.get(&field_key)
        {
            return Ok(value.clone());
        }

        tracing::debug!(key = %cache_key, field = %field_key, "local hash field miss");
        let value = self.load(field).await?;
        // A hash created by the fill expires like any other loaded value.
        let mut item = self
            .hashes
            .get(&cache_key)
            .await
            .unwrap_or_else(|| Item::new(HashMap::new(), self.ttl));
        item.value.insert(field_key, value.clone());
        self.hashes.insert(cache_key, item).await;

        Ok(value)
    }

    async fn hget_all(&self, key: &K) -> Result<HashMap<K, V>> {
        self.ensure_open()?;
        let cache_key = (self.encode)(key);

        if let Some(item) = self.hashes.get(&cache_key).await
            && !item.value.is_empty()
        {
            let mut result = HashMap::with_capacity(item.value.len());
            for (field, value) in item.value {
                let Some(decoded) = (self.decode)(&field) else {
                    return Err(CacheError::Unmarshal(format!(
                        "invalid hash field '{}' in '{}'",
                        field, cache_key
                    )));
                };
                result.insert(decoded, value);
            }
            return Ok(result);
        }

        tracing::debug!(key = %cache_key, "local hash miss");
        let loaded = self.load_all(key).await?;
        let hash = loaded
            .iter()
            .map(|(field, value)| ((self.encode)(field), value.clone()))
            .collect();
        self.hashes.insert(cache_key, Item::new(hash, self.ttl)).await;

        Ok(loaded)
    }

    async fn hdel(&self, key: &K, fields: &[K]) -> Result<()> {
        self.ensure_open()?;
        let cache_key = (self.encode)(key);

        let Some(mut item) = self.hashes.get(&cache_key).await else {
            return Ok(());
        };
        for field in fields {
            item.value.remove(&(self.encode)(field));
        }

        if item.value.is_empty() {
            self.hashes.invalidate(&cache_key).await;
        } else {
            self.hashes.insert(cache_key, item).await;
        }

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let task = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }

        self.entries.invalidate_all();
        self.hashes.invalidate_all();
        tracing::info!("local store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::FnLoader;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn store() -> LocalStore<String, String> {
        LocalStore::new(LocalStoreConfig::default())
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = store();
        let key = "key1".to_string();

        // No loader configured
        let err = store.get(&key).await.unwrap_err();
        assert!(err.is_not_found());

        store
            .set(&key, "value1".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), "value1");

        store.delete(&[key.clone(), "absent".to_string()]).await.unwrap();
        assert!(store.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_served() {
        let store = store();
        let key = "short".to_string();

        store
            .set(&key, "value".to_string(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), "value");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_set_nx() {
        let store = store();
        let key = "nx".to_string();

        assert!(store.set_nx(&key, "first".to_string(), Duration::ZERO).await.unwrap());
        assert!(!store.set_nx(&key, "second".to_string(), Duration::ZERO).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let store = store();
        let key = "ttl".to_string();

        store.set(&key, "value".to_string(), Duration::ZERO).await.unwrap();
        assert_eq!(store.ttl(&key).await.unwrap(), None);

        store.expire(&key, Duration::from_secs(30)).await.unwrap();
        let remaining = store.ttl(&key).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(25));

        let missing = "missing".to_string();
        assert!(store.ttl(&missing).await.unwrap_err().is_not_found());
        assert!(store.expire(&missing, Duration::from_secs(1)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_incr_is_unsupported() {
        let store = store();
        let err = store.incr(&"counter".to_string(), 1).await.unwrap_err();
        assert!(matches!(err, CacheError::Unsupported { operation: "incr", .. }));
    }

    #[tokio::test]
    async fn test_get_miss_loads_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let store = store().with_loader(FnLoader::new(move |key: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(format!("loaded:{}", key))
            }
        }));

        let key = "user:1".to_string();
        assert_eq!(store.get(&key).await.unwrap(), "loaded:user:1");
        assert_eq!(store.get(&key).await.unwrap(), "loaded:user:1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let remaining = store.ttl(&key).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(5 * 60));
    }

    #[tokio::test]
    async fn test_loader_writes_into_the_missing_store() {
        let store = store().with_loader(FnLoader::<String, String>::with_store(|store, key| {
            async move {
                let value = format!("loaded:{key}");
                store
                    .set(&format!("alias:{key}"), value.clone(), Duration::from_secs(30))
                    .await?;
                Ok::<_, CacheError>(value)
            }
            .boxed()
        }));

        assert_eq!(store.get(&"user:1".to_string()).await.unwrap(), "loaded:user:1");

        let alias = "alias:user:1".to_string();
        assert_eq!(store.get(&alias).await.unwrap(), "loaded:user:1");
        let remaining = store.ttl(&alias).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(25));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let store = store().with_loader(FnLoader::new(move |_key: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(CacheError::load_msg("failed"))
            }
        }));

        let key = "broken".to_string();
        assert!(store.get(&key).await.unwrap_err().to_string().contains("failed"));
        assert!(store.ttl(&key).await.unwrap_err().is_not_found());
        assert!(store.get(&key).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = store();
        let key = "settings".to_string();

        store
            .hset(
                &key,
                vec![
                    KeyVal::new("theme".to_string(), "dark".to_string()),
                    KeyVal::new("lang".to_string(), "en".to_string()),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.hget(&key, &"theme".to_string()).await.unwrap(), "dark");

        let all = store.hget_all(&key).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["lang"], "en");

        store.hdel(&key, &["theme".to_string()]).await.unwrap();
        assert!(
            store
                .hget(&key, &"theme".to_string())
                .await
                .unwrap_err()
                .is_not_found()
        );

        store.hdel(&key, &["lang".to_string()]).await.unwrap();
        assert!(store.hget_all(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_hget_all_miss_uses_load_all() {
        let store = store().with_loader(
            FnLoader::new(|_key: String| async { Err(CacheError::KeyNotFound) }).with_load_all(
                |_key: String| async {
                    Ok(HashMap::from([
                        ("field1".to_string(), "John Doe".to_string()),
                        ("field2".to_string(), "Jane Doe".to_string()),
                    ]))
                },
            ),
        );

        let key = "people".to_string();
        let all = store.hget_all(&key).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.hget(&key, &"field2".to_string()).await.unwrap(), "Jane Doe");
    }

    #[tokio::test]
    async fn test_hget_miss_caches_hash_with_default_ttl() {
        let store = LocalStore::new(LocalStoreConfig {
            ttl: Duration::from_secs(5),
            ..Default::default()
        })
        .with_loader(FnLoader::new(|field: String| async move {
            Ok(format!("loaded:{field}"))
        }));

        let key = "profile".to_string();
        assert_eq!(
            store.hget(&key, &"name".to_string()).await.unwrap(),
            "loaded:name"
        );

        let remaining = store.ttl(&key).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));

        // Filling another field keeps the hash deadline.
        store.expire(&key, Duration::from_secs(60)).await.unwrap();
        store.hget(&key, &"email".to_string()).await.unwrap();
        let remaining = store.ttl(&key).await.unwrap().unwrap();
        assert!(remaining > Duration::from_secs(55));
        assert_eq!(store.hget_all(&key).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = store();
        store.ping().await.unwrap();
        store.close().await;

        assert!(matches!(store.ping().await, Err(CacheError::Closed)));
        assert!(matches!(
            store.get(&"key".to_string()).await,
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            store.incr(&"counter".to_string(), 1).await,
            Err(CacheError::Closed)
        ));
    }
}
