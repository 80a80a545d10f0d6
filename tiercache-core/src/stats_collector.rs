use crate::{CacheStats, EvictionPolicy, LatencyStats, Layer, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Aggregates the counters of every layer into one report.
///
/// Each layer records into its own [`CacheStats`], obtained through
/// [`layer`](Self::layer) and shared with the layer at construction. The
/// collector itself tracks request-level outcomes: a `get` that is served by
/// any layer counts as one hit, a full miss as one miss.
///
/// # Thread Safety
///
/// Lock-free; every counter is atomic.
///
/// # Examples
///
/// ```
/// use tiercache_core::{Layer, ShardStats, StatsCollector};
/// use std::time::Duration;
///
/// let stats = StatsCollector::new();
/// stats.layer(Layer::Hot).record_hit();
/// stats.record_hit();
/// stats.record_latency(Duration::from_micros(40));
///
/// let snapshot = stats.snapshot(1, 0, ShardStats::default());
/// assert_eq!(snapshot.hits, 1);
/// assert_eq!(snapshot.per_layer.hot.hits, 1);
/// assert!((snapshot.hit_rate - 1.0).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Default)]
pub struct StatsCollector {
    hot: Arc<CacheStats>,
    standard: Arc<CacheStats>,
    distributed: Arc<CacheStats>,
    overall: CacheStats,
    latency: LatencyStats,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    warmed: AtomicU64,
    prefetched: AtomicU64,
}

/// What the distributed layer contributes to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Key count per shard, indexed by shard id
    pub distribution: Vec<u64>,
    pub errors: u64,
    pub compressed_writes: u64,
}

impl ShardStats {
    pub fn total_keys(&self) -> u64 {
        self.distribution.iter().sum()
    }
}

/// Counters of one layer at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: u64,
    pub policy: Option<EvictionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerLayerStats {
    pub hot: LayerSnapshot,
    pub standard: LayerSnapshot,
    pub distributed: LayerSnapshot,
}

/// Point-in-time view of the whole engine, ready for export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub per_layer: PerLayerStats,
    pub shard_distribution: Vec<u64>,
    pub total_keys: u64,
    pub average_latency_micros: f64,
    pub fetches: u64,
    pub fetch_errors: u64,
    pub warmed_keys: u64,
    pub prefetched_keys: u64,
    pub compressed_writes: u64,
    pub distributed_errors: u64,
}

impl StatsSnapshot {
    /// Pretty-printed JSON for dashboards.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of one layer, shared with that layer.
    pub fn layer(&self, layer: Layer) -> Arc<CacheStats> {
        match layer {
            Layer::Hot => Arc::clone(&self.hot),
            Layer::Standard => Arc::clone(&self.standard),
            Layer::Distributed => Arc::clone(&self.distributed),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.overall.record_hit();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.overall.record_miss();
    }

    #[inline]
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency.record(elapsed);
    }

    /// Records one origin fetch and whether it failed.
    pub fn record_fetch(&self, failed: bool) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.fetch_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_warmed(&self, keys: u64) {
        self.warmed.fetch_add(keys, Ordering::Relaxed);
    }

    pub fn record_prefetched(&self, keys: u64) {
        self.prefetched.fetch_add(keys, Ordering::Relaxed);
    }

    pub fn overall(&self) -> &CacheStats {
        &self.overall
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn warmed(&self) -> u64 {
        self.warmed.load(Ordering::Relaxed)
    }

    pub fn prefetched(&self) -> u64 {
        self.prefetched.load(Ordering::Relaxed)
    }

    /// Builds a snapshot from the live counters plus the layer sizes.
    pub fn snapshot(
        &self,
        hot_entries: usize,
        standard_entries: usize,
        shards: ShardStats,
    ) -> StatsSnapshot {
        let total_keys = shards.total_keys();
        StatsSnapshot {
            hit_rate: self.overall.hit_rate(),
            hits: self.overall.hits(),
            misses: self.overall.misses(),
            per_layer: PerLayerStats {
                hot: layer_snapshot(&self.hot, Layer::Hot, hot_entries as u64),
                standard: layer_snapshot(&self.standard, Layer::Standard, standard_entries as u64),
                distributed: layer_snapshot(&self.distributed, Layer::Distributed, total_keys),
            },
            total_keys,
            shard_distribution: shards.distribution,
            average_latency_micros: self.latency.average_micros(),
            fetches: self.fetches(),
            fetch_errors: self.fetch_errors(),
            warmed_keys: self.warmed(),
            prefetched_keys: self.prefetched(),
            compressed_writes: shards.compressed_writes,
            distributed_errors: shards.errors,
        }
    }

    /// Zeroes every counter. Layer sizes are not affected.
    pub fn reset(&self) {
        for layer in Layer::ALL {
            self.layer(layer).reset();
        }
        self.overall.reset();
        self.latency.reset();
        for counter in [&self.fetches, &self.fetch_errors, &self.warmed, &self.prefetched] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn layer_snapshot(stats: &CacheStats, layer: Layer, entries: u64) -> LayerSnapshot {
    LayerSnapshot {
        hits: stats.hits(),
        misses: stats.misses(),
        hit_rate: stats.hit_rate(),
        evictions: stats.evictions(),
        expirations: stats.expirations(),
        entries,
        policy: layer.eviction_policy(),
    }
}
