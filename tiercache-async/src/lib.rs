//! # Tiercache Async
//!
//! The asynchronous half of tiercache: everything that talks to the
//! distributed layer or runs in the background.
//!
//! ## Features
//!
//! - **Sharded distributed layer**: stable xxh3 routing, gzip compression
//!   above a size threshold, per-call timeouts and per-shard batch writes
//! - **Read-through engine**: L1 (LFU) → L2 (LRU) → distributed, with
//!   backfill on the way up and single-flight fetch-on-miss
//! - **Invalidation fan-out**: by key, tag, dependency or regex, across every
//!   layer, with tombstones covering a distributed layer that is down
//! - **Maintenance**: a periodic loop purges expired entries and retries
//!   tombstoned deletes
//! - **Warming**: prioritized strategies, bounded concurrency, optional
//!   schedules with jitter
//! - **Predictive prefetch**: regex rules that predict the next keys and load
//!   them on a bounded background pool
//!
//! ## Quick Start
//!
//! ```
//! use bytes::Bytes;
//! use tiercache_async::TieredCache;
//! use tiercache_core::{CacheConfig, SetOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = TieredCache::in_memory(CacheConfig::default()).unwrap();
//!
//! let options = SetOptions::new().tags(["user"]).dependencies(["db:users"]);
//! cache.set("user:1", "Alice", &options).await;
//! assert_eq!(cache.get("user:1").await, Some(Bytes::from("Alice")));
//!
//! cache.invalidate_by_dependency("db:users").await;
//! assert_eq!(cache.get("user:1").await, None);
//! # cache.shutdown().await;
//! # }
//! ```
//!
//! ## Plugging in a store
//!
//! The distributed layer is any [`DistributedStore`]: an async key-value
//! binding addressed by shard index. [`MemoryStore`] keeps the shards in
//! process and is what [`TieredCache::in_memory`] uses.

mod background;
pub mod codec;
mod distributed;
mod engine;
mod fetcher;
mod invalidation;
mod prefetch;
mod single_flight;
mod store;
mod tiered;
mod warmer;

pub use background::{BackgroundPool, Job};
pub use codec::EncodedPayload;
pub use distributed::{BatchReport, DistributedCache, DistributedStats};
pub use engine::CacheEngine;
pub use fetcher::{Fetcher, KeyGenerator, KeyList};
pub use invalidation::InvalidationManager;
pub use prefetch::{PredictivePrefetcher, PrefetchRule};
pub use single_flight::SingleFlight;
pub use store::{DistributedStore, MemoryStore, StoredRecord};
pub use tiered::TieredCache;
pub use warmer::{CacheWarmer, WarmReport, WarmingPriority, WarmingStrategy};
