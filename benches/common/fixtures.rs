use loader_cache::{CacheError, FnLoader};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchAccount {
    pub id: u64,
    pub name: String,
    pub balance: i64,
}

impl BenchAccount {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("Account {}", id),
            balance: (id % 1000) as i64,
        }
    }
}

/// Simulated origin with configurable latency
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<String, BenchAccount>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_accounts: usize, latency_ms: u64) -> Self {
        let data = (0..num_accounts)
            .map(|i| (format!("account:{}", i), BenchAccount::new(i as u64)))
            .collect();

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, key: &str) -> loader_cache::Result<BenchAccount> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        // Simulate origin latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data.get(key).cloned().ok_or(CacheError::KeyNotFound)
    }

    /// Loader reading from this database.
    pub fn loader(&self) -> FnLoader<String, BenchAccount> {
        let db = self.clone();
        FnLoader::new(move |key: String| {
            let db = db.clone();
            async move { db.get(&key).await }
        })
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }
}

/// Generate test keys for different workload patterns
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Generate sequential keys (for cold cache tests)
    pub fn sequential(&self) -> Vec<String> {
        (0..self.num_keys).map(|i| format!("account:{}", i)).collect()
    }

    /// Generate keys with Zipf distribution (realistic - few hot keys)
    pub fn zipf_random(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let hot = (self.num_keys / 5).max(1);

        (0..count)
            .map(|_| {
                // Simplified Zipf: 80% of requests go to 20% of keys
                let key_id = if rng.gen_bool(0.8) || hot == self.num_keys {
                    rng.gen_range(0..hot)
                } else {
                    rng.gen_range(hot..self.num_keys)
                };
                format!("account:{}", key_id)
            })
            .collect()
    }
}
