//! # Tiercache Core
//!
//! Synchronous building blocks for the tiercache engine.
//!
//! Nothing in this crate performs I/O or spawns tasks; the async pieces
//! (distributed layer, single-flight, warming, prefetch) live in
//! `tiercache-async` and are assembled from these parts.
//!
//! ## Features
//!
//! - **Hot layer (L1)**: small LFU cache with O(1) frequency buckets
//! - **Standard layer (L2)**: larger LRU cache with O(1) recency list
//! - **Arena storage**: dense slot arrays with a free-list, no pointer cycles
//! - **Invalidation index**: inverted tag and dependency indices
//! - **Statistics**: lock-free per-layer counters and exportable snapshots
//! - **Configuration**: TOML-loadable settings with validation
//!
//! ## Module Organization
//!
//! - [`cache_entry`] - Entry with expiry, tags, dependencies and access metadata
//! - [`hot_cache`] - Frequency-evicted L1
//! - [`standard_cache`] - Recency-evicted L2
//! - [`invalidation`] - Tag/dependency index and tombstones
//! - [`stats_collector`] - Aggregated statistics
//! - [`config`] - Engine configuration
//! - [`utils`] - Shard hashing and wall-clock helpers
//!
mod arena;
pub mod cache_entry;
pub mod config;
pub mod error;
mod eviction_policy;
pub mod hot_cache;
pub mod invalidation;
pub mod standard_cache;
mod stats;
pub mod stats_collector;
pub mod utils;

pub use cache_entry::{CacheEntry, SetOptions};
pub use config::{CacheConfig, MAX_TTL_SECONDS};
pub use error::{CacheError, FetchError, Result};
pub use eviction_policy::{EvictionPolicy, Layer};
pub use hot_cache::HotCache;
pub use invalidation::{InvalidationIndex, InvalidationStrategy, Tombstone};
pub use standard_cache::StandardCache;
pub use stats::{CacheStats, LatencyStats};
pub use stats_collector::{LayerSnapshot, PerLayerStats, ShardStats, StatsCollector, StatsSnapshot};
