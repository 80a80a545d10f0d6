use crate::distributed::{BatchReport, DistributedCache};
use crate::fetcher::Fetcher;
use crate::invalidation::InvalidationManager;
use crate::single_flight::SingleFlight;
use crate::store::DistributedStore;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tiercache_core::{
    CacheConfig, CacheEntry, CacheError, HotCache, InvalidationStrategy, Layer, Result,
    SetOptions, StandardCache, StatsCollector, StatsSnapshot,
};
use tracing::{debug, info, trace, warn};

/// The three layers wired together.
///
/// A lookup walks L1 → L2 → distributed and copies a lower-layer hit into
/// the layers above it. A write goes to the distributed layer first and is
/// then installed into L1, L2 and the invalidation index together.
///
/// The engine is an ordinary value: build one per process (usually behind an
/// `Arc`) and pass it to whatever serves requests.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tiercache_async::{CacheEngine, MemoryStore};
/// use tiercache_core::{CacheConfig, SetOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = CacheConfig::default().with_shard_count(4);
/// let engine = CacheEngine::new(config, Arc::new(MemoryStore::new(4))).unwrap();
///
/// engine.set("user:1", "A", &SetOptions::new().tags(["user"])).await;
/// assert_eq!(engine.get("user:1").await.unwrap(), "A");
///
/// engine.invalidate_by_tag("user").await;
/// assert!(engine.get("user:1").await.is_none());
/// # }
/// ```
pub struct CacheEngine {
    config: CacheConfig,
    hot: Arc<HotCache>,
    standard: Arc<StandardCache>,
    distributed: Arc<DistributedCache>,
    invalidation: InvalidationManager,
    stats: Arc<StatsCollector>,
    flights: SingleFlight<Result<Bytes>>,
}

impl CacheEngine {
    /// # Errors
    ///
    /// `InvalidConfig` if `config` fails validation or the store serves a
    /// different shard count.
    pub fn new(config: CacheConfig, store: Arc<dyn DistributedStore>) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(StatsCollector::new());

        let hot = Arc::new(HotCache::with_stats(
            config.hot_cache_capacity,
            Some(config.hot_ttl()),
            stats.layer(Layer::Hot),
        ));
        let standard = Arc::new(StandardCache::with_stats(
            config.standard_cache_capacity,
            Some(config.standard_ttl()),
            stats.layer(Layer::Standard),
        ));
        let distributed = Arc::new(DistributedCache::new(
            store,
            config.shard_count,
            config.compression_threshold_bytes,
            config.store_timeout(),
            stats.layer(Layer::Distributed),
        )?);
        let invalidation = InvalidationManager::new(
            Arc::clone(&hot),
            Arc::clone(&standard),
            Arc::clone(&distributed),
        );

        info!(
            shards = config.shard_count,
            hot_capacity = config.hot_cache_capacity,
            standard_capacity = config.standard_cache_capacity,
            "cache engine ready"
        );

        Ok(Self {
            config,
            hot,
            standard,
            distributed,
            invalidation,
            stats,
            flights: SingleFlight::new(),
        })
    }

    /// Returns the cached value, or `None` on a miss.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    /// Like [`get`](Self::get) but returns the entry with its metadata.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let started = Instant::now();
        let found = self.lookup(key).await;
        if found.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        self.stats.record_latency(started.elapsed());
        found
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let epoch = self.invalidation.epoch();

        if let Some(entry) = self.hot.get(key) {
            trace!(key, layer = "hot", "hit");
            return Some(entry);
        }

        if let Some(entry) = self.standard.get(key) {
            trace!(key, layer = "standard", "hit");
            self.invalidation.backfill_hot(entry.clone(), epoch);
            return Some(entry);
        }

        if self.invalidation.is_tombstoned(key) {
            debug!(key, "distributed copy tombstoned, skipping");
            return None;
        }

        if let Some(entry) = self.distributed.get(key).await {
            trace!(key, layer = "distributed", "hit");
            self.invalidation.backfill(entry.clone(), epoch);
            return Some(entry);
        }

        debug!(key, "miss");
        self.invalidation.forget_if_expired(key);
        None
    }

    fn peek_local(&self, key: &str) -> Option<CacheEntry> {
        self.hot.peek(key).or_else(|| self.standard.peek(key))
    }

    /// Whether L1 or L2 holds a live copy. Does not count as an access.
    pub fn is_cached_locally(&self, key: &str) -> bool {
        self.peek_local(key).is_some()
    }

    /// Whether any layer holds a live copy. Does not count as an access.
    pub async fn contains(&self, key: &str) -> bool {
        self.is_cached_locally(key)
            || (!self.invalidation.is_tombstoned(key) && self.distributed.contains(key).await)
    }

    /// Returns the cached value or loads it with `fetcher` and caches it.
    ///
    /// Concurrent misses on the same key share one fetch. A fetcher error is
    /// returned to every caller waiting on that fetch; nothing is cached.
    ///
    /// # Errors
    ///
    /// `CacheError::Fetch` when the fetcher fails.
    pub async fn get_or_fetch(
        &self,
        key: &str,
        fetcher: &dyn Fetcher,
        options: &SetOptions,
    ) -> Result<Bytes> {
        let started = Instant::now();
        if let Some(entry) = self.lookup(key).await {
            self.stats.record_hit();
            self.stats.record_latency(started.elapsed());
            return Ok(entry.value);
        }
        self.stats.record_miss();

        let (outcome, led) = self
            .flights
            .run(key, || self.load(key, fetcher, options))
            .await;
        if !led {
            trace!(key, "joined in-flight load");
        }
        self.stats.record_latency(started.elapsed());
        outcome
    }

    async fn load(&self, key: &str, fetcher: &dyn Fetcher, options: &SetOptions) -> Result<Bytes> {
        // A load that finished just before this one started has already
        // populated the local layers
        if let Some(entry) = self.peek_local(key) {
            return Ok(entry.value);
        }

        let epoch = self.invalidation.epoch();
        let fetched = fetcher.fetch(key).await;
        self.stats.record_fetch(fetched.is_err());
        let value = match fetched {
            Ok(value) => value,
            Err(err) => {
                debug!(key, error = %err, "fetch failed");
                return Err(err.into());
            }
        };

        let entry = options.to_entry(key, value.clone(), self.config.default_ttl());
        self.write(entry, options.compress, Some(epoch)).await;
        Ok(value)
    }

    /// Writes `value` through every layer.
    ///
    /// Returns `false` if the write was aborted because the value could not
    /// be encoded. An unreachable distributed layer does not abort the write:
    /// L1 and L2 still receive it.
    pub async fn set(&self, key: &str, value: impl Into<Bytes>, options: &SetOptions) -> bool {
        let entry = options.to_entry(key, value.into(), self.config.default_ttl());
        self.write(entry, options.compress, None).await
    }

    async fn write(&self, mut entry: CacheEntry, compress: Option<bool>, epoch: Option<u64>) -> bool {
        if epoch.map_or(false, |epoch| epoch != self.invalidation.epoch()) {
            debug!(key = %entry.key, "invalidated while loading, not caching");
            return false;
        }

        let written = match self.distributed.set(&entry, compress).await {
            Ok(compressed) => {
                entry.compressed = compressed;
                true
            }
            Err(err @ CacheError::Serialization(_)) => {
                warn!(key = %entry.key, error = %err, "write aborted");
                return false;
            }
            Err(err) => {
                warn!(key = %entry.key, error = %err, "distributed write failed, caching locally");
                false
            }
        };

        let Some(epoch) = epoch else {
            self.invalidation.install(entry, written);
            return true;
        };

        let key = entry.key.clone();
        if self.invalidation.install_if_current(entry, written, epoch) {
            return true;
        }
        if written {
            self.invalidation.discard_unowned(&key).await;
        }
        false
    }

    /// Writes many values at once.
    ///
    /// Only keys the distributed layer accepted are installed locally; the
    /// report lists the rest with their errors.
    pub async fn set_batch<I, K, V>(&self, items: I, options: &SetOptions) -> BatchReport
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        let ttl = self.config.default_ttl();
        let entries: Vec<CacheEntry> = items
            .into_iter()
            .map(|(key, value)| options.to_entry(&key.into(), value.into(), ttl))
            .collect();

        let report = self.distributed.set_batch(&entries, options.compress).await;
        let accepted: HashSet<&str> = report.succeeded.iter().map(String::as_str).collect();
        for entry in entries {
            if accepted.contains(entry.key.as_str()) {
                self.invalidation.install(entry, true);
            }
        }
        report
    }

    /// Reads and deserializes a JSON value.
    ///
    /// A value that does not decode as `T` is evicted and reported as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_slice(&value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(key, error = %err, "evicting value that does not decode");
                self.invalidation.invalidate_key(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(encoded) => self.set(key, encoded, options).await,
            Err(err) => {
                warn!(key, error = %err, "write aborted, value does not encode");
                false
            }
        }
    }

    pub async fn invalidate_key(&self, key: &str) -> usize {
        self.invalidation.invalidate_key(key).await
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.invalidation.invalidate_by_tag(tag).await
    }

    /// # Errors
    ///
    /// `InvalidPattern` when `pattern` is not a valid regular expression.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        self.invalidation.invalidate_by_pattern(pattern).await
    }

    pub async fn invalidate_by_dependency(&self, dependency: &str) -> usize {
        self.invalidation.invalidate_by_dependency(dependency).await
    }

    pub async fn invalidate(&self, strategy: &InvalidationStrategy) -> Result<usize> {
        self.invalidation.invalidate(strategy).await
    }

    /// Hit rate, per-layer counters and shard distribution.
    pub async fn get_stats(&self) -> StatsSnapshot {
        let shards = self.distributed.get_stats().await.into();
        self.stats
            .snapshot(self.hot.len(), self.standard.len(), shards)
    }

    /// Eagerly drops expired entries from L1, L2 and the index.
    pub fn purge_expired(&self) -> usize {
        self.invalidation.purge_expired()
    }

    /// One maintenance pass: purges expired entries, then retries the
    /// distributed deletes of tombstoned keys. Returns `(purged, cleared)`.
    pub async fn maintain(&self) -> (usize, usize) {
        let purged = self.purge_expired();
        let cleared = self.invalidation.retry_tombstones().await;
        if purged > 0 || cleared > 0 {
            debug!(purged, cleared, "maintenance pass");
        }
        (purged, cleared)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    pub fn invalidation(&self) -> &InvalidationManager {
        &self.invalidation
    }

    pub fn hot(&self) -> &HotCache {
        &self.hot
    }

    pub fn standard(&self) -> &StandardCache {
        &self.standard
    }

    pub fn distributed(&self) -> &DistributedCache {
        &self.distributed
    }
}
