use std::env;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Simulated origin latency in milliseconds (from DB_LATENCY_MS env var, defaults to 20)
    pub db_latency_ms: u64,

    /// Concurrent callers per stampede (from BENCH_CALLERS env var, defaults to 64)
    pub callers: usize,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 20)
    pub sample_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            db_latency_ms: env_or("DB_LATENCY_MS", 20),
            callers: env_or("BENCH_CALLERS", 64),
            sample_size: env_or("BENCH_SAMPLE_SIZE", 20),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  DB Latency: {}ms", config.db_latency_ms);
        eprintln!("  Callers: {}", config.callers);
        eprintln!("  Sample Size: {}", config.sample_size);
        config
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
