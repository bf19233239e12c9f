//! Example demonstrating stampede protection with stacked loaders.
//!
//! Two simulated processes each run a local store whose loader is
//! `SuppressedLoader -> DistributedLockLoader -> origin`. A burst of
//! concurrent misses per process is merged locally, and the shared lock lets
//! only one process at a time reach the origin.
//!
//! Run with `RUST_LOG=loader_cache=debug` to see the lock and load events.

use loader_cache::{
    CacheError, DistributedLockLoader, FnLoader, LocalStore, LocalStoreConfig, MemoryLock, Store,
    SuppressedLoader,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Account {
    name: String,
    value: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let origin_calls = Arc::new(AtomicUsize::new(0));
    let origin = {
        let origin_calls = origin_calls.clone();
        FnLoader::new(move |key: String| {
            let origin_calls = origin_calls.clone();
            async move {
                origin_calls.fetch_add(1, Ordering::SeqCst);
                // Pretend the database is slow
                tokio::time::sleep(Duration::from_millis(200)).await;
                match key.as_str() {
                    "key" => Ok(Account {
                        name: "John Doe".to_string(),
                        value: 100,
                    }),
                    _ => Err(CacheError::KeyNotFound),
                }
            }
        })
    };

    // Shared between both "processes", like a Redis lock would be
    let lock = MemoryLock::default();

    let processes: Vec<Arc<LocalStore<String, Account>>> = (0..2)
        .map(|_| {
            let loader = SuppressedLoader::new(
                DistributedLockLoader::new(origin.clone(), lock.clone())
                    .with_expiry(Duration::from_secs(1)),
            );
            Arc::new(
                LocalStore::new(LocalStoreConfig {
                    ttl: Duration::from_secs(5),
                    ..Default::default()
                })
                .with_loader(loader),
            )
        })
        .collect();

    let mut handles = Vec::new();
    for store in &processes {
        for _ in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get(&"key".to_string()).await
            }));
        }
    }
    for handle in handles {
        handle.await??;
    }

    println!(
        "200 concurrent gets, {} origin calls",
        origin_calls.load(Ordering::SeqCst)
    );

    // Served from memory now
    let account = processes[0].get(&"key".to_string()).await?;
    println!("cached: {:?}", account);

    // Misses are never cached
    match processes[0].get(&"missing".to_string()).await {
        Err(e) => println!("missing: {}", e),
        Ok(account) => println!("unexpected: {:?}", account),
    }

    Ok(())
}
