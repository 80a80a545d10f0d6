//! # Tiercache
//!
//! A multi-tier caching engine: a small frequency-based (LFU) hot layer, a
//! larger recency-based (LRU) layer and a sharded distributed layer, with
//! tag and dependency invalidation, cache warming and predictive prefetch.
//!
//! ## Features
//!
//! - **Read-through tiers**: L1 → L2 → distributed, backfilling upward on a hit
//! - **Fetch on miss**: concurrent misses for one key share a single fetch
//! - **Invalidation**: by key, tag, dependency or regex pattern, across all layers
//! - **Compression**: large values are gzipped before reaching the distributed layer
//! - **Warming**: prioritized, batched strategies, optionally on a schedule
//! - **Prefetch**: rules that predict the next keys and load them in the background
//! - **Statistics**: per-layer hit rates, shard distribution and latency, exportable as JSON
//!
//! ## Quick Start
//!
//! ```rust
//! use tiercache::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = TieredCache::in_memory(CacheConfig::default()).unwrap();
//!
//! cache
//!     .set("user:1", "Alice", &SetOptions::new().tags(["user"]))
//!     .await;
//! assert_eq!(cache.get("user:1").await.unwrap(), "Alice");
//!
//! cache.invalidate_by_tag("user").await;
//! assert!(cache.get("user:1").await.is_none());
//! # cache.shutdown().await;
//! # }
//! ```
//!
//! ## Fetch on miss
//!
//! ```rust
//! use tiercache::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = TieredCache::in_memory(CacheConfig::default()).unwrap();
//! let origin = |key: String| async move { Ok::<_, FetchError>(Bytes::from(format!("row for {key}"))) };
//!
//! let value = cache
//!     .get_or_fetch("order:7", &origin, &SetOptions::default())
//!     .await
//!     .unwrap();
//! assert_eq!(value, "row for order:7");
//! # cache.shutdown().await;
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`CacheConfig`] loads from TOML; every option has a default:
//!
//! ```rust
//! use tiercache::CacheConfig;
//!
//! let config = CacheConfig::from_toml_str("shard_count = 32\nhot_ttl_seconds = 30").unwrap();
//! assert_eq!(config.shard_count, 32);
//! ```
//!
//! ## Crates
//!
//! - [`tiercache_core`]: the runtime-free layers, index and statistics
//! - [`tiercache_async`]: the distributed layer, engine, warmer and prefetcher

pub use bytes::Bytes;
pub use tiercache_async::*;
pub use tiercache_core::*;

/// Everything needed for everyday use.
pub mod prelude {
    pub use bytes::Bytes;
    pub use tiercache_async::{
        CacheEngine, DistributedStore, Fetcher, KeyGenerator, KeyList, MemoryStore, PrefetchRule,
        TieredCache, WarmingPriority, WarmingStrategy,
    };
    pub use tiercache_core::{
        CacheConfig, CacheError, FetchError, InvalidationStrategy, Result, SetOptions,
        StatsSnapshot,
    };
}
