use crate::distributed::BatchReport;
use crate::engine::CacheEngine;
use crate::fetcher::Fetcher;
use crate::prefetch::{PredictivePrefetcher, PrefetchRule};
use crate::store::{DistributedStore, MemoryStore};
use crate::warmer::{CacheWarmer, WarmReport, WarmingStrategy};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tiercache_core::{CacheConfig, InvalidationStrategy, Result, SetOptions, StatsSnapshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The full cache: engine, warmer and prefetcher behind one handle.
///
/// Reads through [`get`](Self::get) and [`get_or_fetch`](Self::get_or_fetch)
/// also feed the prefetcher. Call [`shutdown`](Self::shutdown) to stop the
/// background work before dropping it.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use tiercache_async::TieredCache;
/// use tiercache_core::{CacheConfig, FetchError, SetOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = TieredCache::in_memory(CacheConfig::default()).unwrap();
///
/// let loader = |key: String| async move { Ok::<_, FetchError>(Bytes::from(format!("loaded {key}"))) };
/// let value = cache.get_or_fetch("user:1", &loader, &SetOptions::default()).await.unwrap();
/// assert_eq!(value, "loaded user:1");
/// assert!(cache.get("user:1").await.is_some());
///
/// cache.shutdown().await;
/// # }
/// ```
pub struct TieredCache {
    engine: Arc<CacheEngine>,
    warmer: Arc<CacheWarmer>,
    prefetcher: PredictivePrefetcher,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl TieredCache {
    /// # Errors
    ///
    /// `InvalidConfig` if `config` is rejected, the store's shard count does
    /// not match, or no Tokio runtime is running.
    pub fn new(config: CacheConfig, store: Arc<dyn DistributedStore>) -> Result<Self> {
        let engine = Arc::new(CacheEngine::new(config, store)?);
        let warmer = Arc::new(CacheWarmer::new(Arc::clone(&engine)));
        let prefetcher = PredictivePrefetcher::new(Arc::clone(&engine))?;
        Ok(Self {
            engine,
            warmer,
            prefetcher,
            maintenance: Mutex::new(None),
        })
    }

    /// Builds a cache whose distributed layer is an in-process [`MemoryStore`].
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new(config.shard_count));
        Self::new(config, store)
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let value = self.engine.get(key).await;
        self.prefetcher.predictive_prefetch(key);
        value
    }

    pub async fn get_or_fetch(
        &self,
        key: &str,
        fetcher: &dyn Fetcher,
        options: &SetOptions,
    ) -> Result<Bytes> {
        let value = self.engine.get_or_fetch(key, fetcher, options).await;
        self.prefetcher.predictive_prefetch(key);
        value
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>, options: &SetOptions) -> bool {
        self.engine.set(key, value, options).await
    }

    pub async fn set_batch<I, K, V>(&self, items: I, options: &SetOptions) -> BatchReport
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        self.engine.set_batch(items, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.engine.get_json(key).await;
        self.prefetcher.predictive_prefetch(key);
        value
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> bool {
        self.engine.set_json(key, value, options).await
    }

    pub async fn invalidate_key(&self, key: &str) -> usize {
        self.engine.invalidate_key(key).await
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.engine.invalidate_by_tag(tag).await
    }

    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        self.engine.invalidate_by_pattern(pattern).await
    }

    pub async fn invalidate_by_dependency(&self, dependency: &str) -> usize {
        self.engine.invalidate_by_dependency(dependency).await
    }

    pub async fn invalidate(&self, strategy: &InvalidationStrategy) -> Result<usize> {
        self.engine.invalidate(strategy).await
    }

    pub fn add_warming_strategy(&self, strategy: WarmingStrategy) {
        self.warmer.add_strategy(strategy);
    }

    pub async fn warm_strategy(&self, name: &str) -> Result<WarmReport> {
        self.warmer.warm_strategy(name).await
    }

    pub async fn warm_all(&self) -> Vec<WarmReport> {
        self.warmer.warm_all().await
    }

    pub fn add_prefetch_rule(&self, rule: PrefetchRule) {
        self.prefetcher.add_prefetch_rule(rule);
    }

    pub fn predictive_prefetch(&self, key: &str) -> usize {
        self.prefetcher.predictive_prefetch(key)
    }

    pub async fn get_stats(&self) -> StatsSnapshot {
        self.engine.get_stats().await
    }

    pub fn purge_expired(&self) -> usize {
        self.engine.purge_expired()
    }

    /// Starts the maintenance loop and scheduled warming for every strategy
    /// with an interval. Returns the number of warming schedules.
    ///
    /// Every `purge_interval_ms` the loop purges expired entries and retries
    /// tombstoned distributed deletes.
    pub fn start(&self) -> usize {
        let mut maintenance = self.maintenance.lock();
        if maintenance.is_none() {
            let engine = Arc::downgrade(&self.engine);
            let interval = self.engine.config().purge_interval();
            *maintenance = Some(tokio::spawn(run_maintenance(engine, interval)));
        }
        drop(maintenance);
        self.warmer.start_schedules()
    }

    /// Stops the maintenance loop and scheduled warming, and drains queued
    /// prefetches.
    pub async fn shutdown(&self) {
        self.stop_maintenance();
        self.warmer.stop();
        self.prefetcher.shutdown().await;
        info!("tiered cache shut down");
    }

    fn stop_maintenance(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn warmer(&self) -> &Arc<CacheWarmer> {
        &self.warmer
    }

    pub fn prefetcher(&self) -> &PredictivePrefetcher {
        &self.prefetcher
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        self.stop_maintenance();
    }
}

async fn run_maintenance(engine: Weak<CacheEngine>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(engine) = engine.upgrade() else { break };
        engine.maintain().await;
    }
    debug!("maintenance loop ends");
}
