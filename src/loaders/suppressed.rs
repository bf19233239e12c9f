use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::codec::{KeyEncoder, display_encoder};
use crate::error::Result;
use crate::loader::Loader;
use crate::store::Store;

type Outcome<T> = Option<Result<T>>;

struct Call<T> {
    id: u64,
    rx: watch::Receiver<Outcome<T>>,
}

enum Role<T> {
    Leader(watch::Sender<Outcome<T>>, u64),
    Follower(watch::Receiver<Outcome<T>>),
}

/// In-flight call registry. At most one call per key runs at a time; every
/// caller that arrives while it runs receives a clone of its outcome.
struct Group<T> {
    calls: Mutex<HashMap<String, Call<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Group {
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> Group<T>
where
    T: Clone + Send + Sync,
{
    fn calls(&self) -> MutexGuard<'_, HashMap<String, Call<T>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, key: &str) -> Role<T> {
        let mut calls = self.calls();

        // A closed sender means the leader is gone without an outcome.
        if let Some(call) = calls.get(key)
            && call.rx.has_changed().is_ok()
        {
            return Role::Follower(call.rx.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        calls.insert(key.to_string(), Call { id, rx });
        Role::Leader(tx, id)
    }

    async fn run<F, Fut>(&self, key: String, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (tx, id) = loop {
            match self.join(&key) {
                Role::Leader(tx, id) => break (tx, id),
                Role::Follower(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    if let Some(result) = outcome {
                        return result;
                    }
                    tracing::debug!(key = %key, "in-flight load abandoned, retrying");
                }
            }
        };

        // Declared after `tx`, so the entry is gone before followers are woken
        // by a dropped sender.
        let _flight = Flight {
            group: self,
            key: &key,
            id,
        };

        let result = work().await;
        tx.send_replace(Some(result.clone()));
        result
    }
}

/// Removes the registry entry when the leader finishes, is cancelled or panics.
struct Flight<'a, T>
where
    T: Clone + Send + Sync,
{
    group: &'a Group<T>,
    key: &'a str,
    id: u64,
}

impl<T> Drop for Flight<'_, T>
where
    T: Clone + Send + Sync,
{
    fn drop(&mut self) {
        let mut calls = self.group.calls();
        if calls.get(self.key).is_some_and(|call| call.id == self.id) {
            calls.remove(self.key);
        }
    }
}

/// Loader wrapper that merges concurrent loads of the same key into one call
/// to the inner loader.
///
/// Single-value loads and hash loads are tracked separately, so a `load`
/// and a `load_all` for the same key never share a result. Only calls that
/// overlap in time are merged; results are not remembered once the call
/// completes.
///
/// Dropping the caller that runs the inner load cancels it. Waiting callers
/// then start over and one of them runs a fresh load.
pub struct SuppressedLoader<K, V, L> {
    inner: L,
    encode: KeyEncoder<K>,
    single: Group<V>,
    all: Group<HashMap<K, V>>,
}

impl<K, V, L> SuppressedLoader<K, V, L>
where
    K: Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: Loader<K, V>,
{
    pub fn new(inner: L) -> Self {
        SuppressedLoader {
            inner,
            encode: display_encoder(),
            single: Group::default(),
            all: Group::default(),
        }
    }
}

impl<K, V, L> SuppressedLoader<K, V, L> {
    /// Replace how keys are turned into call identities.
    pub fn with_key_encoder(mut self, encode: KeyEncoder<K>) -> Self {
        self.encode = encode;
        self
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<K, V, L> Loader<K, V> for SuppressedLoader<K, V, L>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    L: Loader<K, V>,
{
    async fn load(&self, store: &dyn Store<K, V>, key: &K) -> Result<V> {
        let call = (self.encode)(key);
        self.single
            .run(call, || self.inner.load(store, key))
            .await
    }

    async fn load_all(&self, store: &dyn Store<K, V>, key: &K) -> Result<HashMap<K, V>> {
        let call = (self.encode)(key);
        self.all
            .run(call, || self.inner.load_all(store, key))
            .await
    }
}
