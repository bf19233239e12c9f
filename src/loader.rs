//! The loader protocol used to fill cache misses.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{CacheError, Result};
use crate::store::Store;

/// Handles loading of missing data.
///
/// Loaders are invoked by a [`Store`] on a miss. They may read from the store
/// or write the loaded value back into it for future hits.
///
/// Absence must be reported as an error (usually
/// [`CacheError::KeyNotFound`]). A successfully returned value is treated as a
/// hit and cached.
#[async_trait]
pub trait Loader<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Load the value associated with `key`.
    async fn load(&self, store: &dyn Store<K, V>, key: &K) -> Result<V>;

    /// Load all fields of the hash associated with `key`.
    async fn load_all(&self, store: &dyn Store<K, V>, key: &K) -> Result<HashMap<K, V>>;
}

#[async_trait]
impl<K, V, L> Loader<K, V> for Arc<L>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: Loader<K, V> + ?Sized,
{
    async fn load(&self, store: &dyn Store<K, V>, key: &K) -> Result<V> {
        (**self).load(store, key).await
    }

    async fn load_all(&self, store: &dyn Store<K, V>, key: &K) -> Result<HashMap<K, V>> {
        (**self).load_all(store, key).await
    }
}

type LoadFn<K, V> =
    Arc<dyn for<'a> Fn(&'a dyn Store<K, V>, K) -> BoxFuture<'a, Result<V>> + Send + Sync>;
type LoadAllFn<K, V> = Arc<
    dyn for<'a> Fn(&'a dyn Store<K, V>, K) -> BoxFuture<'a, Result<HashMap<K, V>>> + Send + Sync,
>;

/// Adapter turning an async function into a single-value loader.
///
/// Hash loads report [`CacheError::KeyNotFound`].
pub struct LoaderFn<K, V>(LoadFn<K, V>)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static;

impl<K, V> LoaderFn<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Wrap a function that only needs the key.
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        Self::with_store(move |_store, key| load(key).boxed())
    }

    /// Wrap a function that also receives the store that missed, e.g. to
    /// write back under its own expiry.
    pub fn with_store<F>(load: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Store<K, V>, K) -> BoxFuture<'a, Result<V>>
            + Send
            + Sync
            + 'static,
    {
        LoaderFn(Arc::new(load))
    }
}

impl<K, V> Clone for LoaderFn<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        LoaderFn(Arc::clone(&self.0))
    }
}

#[async_trait]
impl<K, V> Loader<K, V> for LoaderFn<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn load(&self, store: &dyn Store<K, V>, key: &K) -> Result<V> {
        (self.0)(store, key.clone()).await
    }

    async fn load_all(&self, _store: &dyn Store<K, V>, _key: &K) -> Result<HashMap<K, V>> {
        Err(CacheError::KeyNotFound)
    }
}

/// Adapter turning an async function into a hash loader.
///
/// Single-value loads report [`CacheError::KeyNotFound`].
pub struct LoaderAllFn<K, V>(LoadAllFn<K, V>)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static;

impl<K, V> LoaderAllFn<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new<F, Fut>(load_all: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>>> + Send + 'static,
    {
        Self::with_store(move |_store, key| load_all(key).boxed())
    }

    pub fn with_store<F>(load_all: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Store<K, V>, K) -> BoxFuture<'a, Result<HashMap<K, V>>>
            + Send
            + Sync
            + 'static,
    {
        LoaderAllFn(Arc::new(load_all))
    }
}

impl<K, V> Clone for LoaderAllFn<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        LoaderAllFn(Arc::clone(&self.0))
    }
}

#[async_trait]
impl<K, V> Loader<K, V> for LoaderAllFn<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn load(&self, _store: &dyn Store<K, V>, _key: &K) -> Result<V> {
        Err(CacheError::KeyNotFound)
    }

    async fn load_all(&self, store: &dyn Store<K, V>, key: &K) -> Result<HashMap<K, V>> {
        (self.0)(store, key.clone()).await
    }
}

/// Loader built from a [`LoaderFn`] and an optional [`LoaderAllFn`].
///
/// Without a `load_all` function, hash loads report
/// [`CacheError::KeyNotFound`].
///
/// # Example
/// ```ignore
/// let loader = FnLoader::new(|id: u64| async move { db.find_user(id).await })
///     .with_load_all(|id: u64| async move { db.user_settings(id).await });
///
/// // Also cache the user under its email address.
/// let loader = FnLoader::with_store(|store, key: String| {
///     async move {
///         let user = db.find_user(&key).await?;
///         store.set(&user.email, user.clone(), Duration::from_secs(60)).await?;
///         Ok(user)
///     }
///     .boxed()
/// });
/// ```
pub struct FnLoader<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    load: LoaderFn<K, V>,
    load_all: Option<LoaderAllFn<K, V>>,
}

impl<K, V> Clone for FnLoader<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        FnLoader {
            load: self.load.clone(),
            load_all: self.load_all.clone(),
        }
    }
}

impl<K, V> FnLoader<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        LoaderFn::new(load).into()
    }

    /// Like [`FnLoader::new`], but `load` also receives the store.
    pub fn with_store<F>(load: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Store<K, V>, K) -> BoxFuture<'a, Result<V>>
            + Send
            + Sync
            + 'static,
    {
        LoaderFn::with_store(load).into()
    }

    pub fn with_load_all<F, Fut>(self, load_all: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>>> + Send + 'static,
    {
        self.with_load_all_fn(LoaderAllFn::new(load_all))
    }

    pub fn with_load_all_fn(mut self, load_all: LoaderAllFn<K, V>) -> Self {
        self.load_all = Some(load_all);
        self
    }
}

impl<K, V> From<LoaderFn<K, V>> for FnLoader<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn from(load: LoaderFn<K, V>) -> Self {
        FnLoader {
            load,
            load_all: None,
        }
    }
}

#[async_trait]
impl<K, V> Loader<K, V> for FnLoader<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn load(&self, store: &dyn Store<K, V>, key: &K) -> Result<V> {
        self.load.load(store, key).await
    }

    async fn load_all(&self, store: &dyn Store<K, V>, key: &K) -> Result<HashMap<K, V>> {
        match &self.load_all {
            Some(load_all) => load_all.load_all(store, key).await,
            None => Err(CacheError::KeyNotFound),
        }
    }
}
