//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheError, Result};

/// Largest TTL, in seconds, a configuration may name (100 years).
pub const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Configuration for a tiered cache.
///
/// Every field has a default, so a TOML document only needs to name the
/// options it overrides:
///
/// ```
/// use tiercache_core::CacheConfig;
///
/// let config = CacheConfig::from_toml_str(
///     r#"
///     shard_count = 8
///     hot_cache_capacity = 64
///     warming_enabled = false
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.shard_count, 8);
/// assert_eq!(config.hot_cache_capacity, 64);
/// assert_eq!(config.compression_threshold_bytes, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a write does not carry its own.
    pub default_ttl_seconds: u64,
    /// Number of distributed shards.
    pub shard_count: usize,
    /// Values larger than this are compressed before reaching the distributed layer.
    pub compression_threshold_bytes: usize,
    /// Maximum entries held by the hot (LFU) layer.
    pub hot_cache_capacity: usize,
    /// Maximum entries held by the standard (LRU) layer.
    pub standard_cache_capacity: usize,
    /// Enables warming sweeps and scheduled warming.
    pub warming_enabled: bool,
    /// Upper bound on how long an entry lives in the hot layer.
    pub hot_ttl_seconds: u64,
    /// Upper bound on how long an entry lives in the standard layer.
    pub standard_ttl_seconds: u64,
    /// Timeout applied to every distributed store call.
    pub store_timeout_ms: u64,
    /// Concurrent fetches within one warming batch.
    pub warming_concurrency: usize,
    /// A prefetch rule fires only when its probability exceeds this value.
    pub prefetch_min_probability: f64,
    /// Background prefetch workers.
    pub prefetch_workers: usize,
    /// Prefetch jobs that may wait for a worker before new ones are dropped.
    pub prefetch_queue_capacity: usize,
    /// Period of the maintenance loop that purges expired entries and
    /// retries tombstoned deletes.
    pub purge_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
            shard_count: 16,
            compression_threshold_bytes: 1024,
            hot_cache_capacity: 128,
            standard_cache_capacity: 1024,
            warming_enabled: true,
            hot_ttl_seconds: 60,
            standard_ttl_seconds: 600,
            store_timeout_ms: 250,
            warming_concurrency: 8,
            prefetch_min_probability: 0.5,
            prefetch_workers: 4,
            prefetch_queue_capacity: 256,
            purge_interval_ms: 30_000,
        }
    }
}

impl CacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: CacheConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            CacheError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(CacheError::InvalidConfig("shard_count must be > 0".into()));
        }
        if self.hot_cache_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "hot_cache_capacity must be > 0".into(),
            ));
        }
        if self.standard_cache_capacity < self.hot_cache_capacity {
            return Err(CacheError::InvalidConfig(format!(
                "standard_cache_capacity ({}) must be >= hot_cache_capacity ({})",
                self.standard_cache_capacity, self.hot_cache_capacity
            )));
        }
        if self.default_ttl_seconds == 0 {
            return Err(CacheError::InvalidConfig(
                "default_ttl_seconds must be > 0".into(),
            ));
        }
        for (name, seconds) in [
            ("default_ttl_seconds", self.default_ttl_seconds),
            ("hot_ttl_seconds", self.hot_ttl_seconds),
            ("standard_ttl_seconds", self.standard_ttl_seconds),
        ] {
            if seconds > MAX_TTL_SECONDS {
                return Err(CacheError::InvalidConfig(format!(
                    "{name} must be <= {MAX_TTL_SECONDS}, got {seconds}"
                )));
            }
        }
        if self.store_timeout_ms == 0 {
            return Err(CacheError::InvalidConfig("store_timeout_ms must be > 0".into()));
        }
        if self.purge_interval_ms == 0 {
            return Err(CacheError::InvalidConfig("purge_interval_ms must be > 0".into()));
        }
        if self.warming_concurrency == 0 || self.prefetch_workers == 0 {
            return Err(CacheError::InvalidConfig(
                "warming_concurrency and prefetch_workers must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.prefetch_min_probability) {
            return Err(CacheError::InvalidConfig(format!(
                "prefetch_min_probability must be within [0, 1], got {}",
                self.prefetch_min_probability
            )));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_ttl_seconds)
    }

    pub fn standard_ttl(&self) -> Duration {
        Duration::from_secs(self.standard_ttl_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_seconds = ttl.as_secs().max(1);
        self
    }

    /// Set the number of distributed shards.
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Set the compression threshold.
    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = bytes;
        self
    }

    /// Set both in-process capacities.
    pub fn with_capacities(mut self, hot: usize, standard: usize) -> Self {
        self.hot_cache_capacity = hot;
        self.standard_cache_capacity = standard;
        self
    }

    /// Enable or disable warming.
    pub fn with_warming(mut self, enabled: bool) -> Self {
        self.warming_enabled = enabled;
        self
    }

    /// Set the distributed call timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = (timeout.as_millis() as u64).max(1);
        self
    }

    /// Set the maintenance loop period.
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    /// Set the minimum prefetch probability.
    pub fn with_prefetch_min_probability(mut self, probability: f64) -> Self {
        self.prefetch_min_probability = probability;
        self
    }
}
