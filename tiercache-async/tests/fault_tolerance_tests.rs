mod common;

use bytes::Bytes;
use common::{CountingFetcher, FlakyStore};
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiercache_async::CacheEngine;
use tiercache_core::{CacheConfig, SetOptions};

const SHARDS: usize = 4;

fn engine_over(store: &Arc<FlakyStore>) -> CacheEngine {
    let config = CacheConfig::default()
        .with_shard_count(SHARDS)
        .with_store_timeout(Duration::from_millis(50));
    CacheEngine::new(config, store.clone()).unwrap()
}

#[tokio::test]
#[serial]
async fn test_slow_store_degrades_to_miss_within_timeout() {
    let store = FlakyStore::new(SHARDS);
    let writer = engine_over(&store);
    writer.set("k", "v", &SetOptions::default()).await;

    store.delay_ms.store(500, Ordering::SeqCst);
    let reader = engine_over(&store);
    let started = Instant::now();
    assert!(reader.get("k").await.is_none());
    assert!(started.elapsed() < Duration::from_millis(400));

    let stats = reader.get_stats().await;
    assert!(stats.distributed_errors >= 1);
}

#[tokio::test]
async fn test_fetch_on_miss_survives_unreachable_store() {
    let store = FlakyStore::new(SHARDS);
    store.fail_gets.store(true, Ordering::SeqCst);
    store.fail_sets.store(true, Ordering::SeqCst);
    let engine = engine_over(&store);
    let fetcher = CountingFetcher::new(Duration::ZERO);

    let value = engine
        .get_or_fetch("user:1", fetcher.as_ref(), &SetOptions::default())
        .await
        .unwrap();
    assert_eq!(value, Bytes::from("origin:user:1"));

    // Installed locally even though the distributed write failed
    assert_eq!(engine.get("user:1").await.unwrap(), Bytes::from("origin:user:1"));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_set_with_store_down_keeps_local_copy() {
    let store = FlakyStore::new(SHARDS);
    store.fail_sets.store(true, Ordering::SeqCst);
    let engine = engine_over(&store);

    assert!(engine.set("k", "local", &SetOptions::default()).await);
    assert_eq!(engine.get("k").await.unwrap(), Bytes::from("local"));
    assert!(store.raw_get(engine.distributed().shard("k"), "k").await.is_none());
}

#[tokio::test]
async fn test_failed_delete_tombstones_remote_copy() {
    let store = FlakyStore::new(SHARDS);
    let engine = engine_over(&store);
    let shard = engine.distributed().shard("user:1");
    engine
        .set("user:1", "A", &SetOptions::new().tags(["user"]))
        .await;

    store.fail_deletes.store(true, Ordering::SeqCst);
    assert_eq!(engine.invalidate_by_tag("user").await, 1);

    // The stale remote copy is still there but must not be served
    assert!(store.raw_get(shard, "user:1").await.is_some());
    assert!(engine.invalidation().is_tombstoned("user:1"));
    assert!(engine.get("user:1").await.is_none());
    assert!(!engine.contains("user:1").await);

    // A later successful write lifts the tombstone
    store.fail_deletes.store(false, Ordering::SeqCst);
    engine.set("user:1", "B", &SetOptions::default()).await;
    assert!(!engine.invalidation().is_tombstoned("user:1"));
    engine.hot().clear();
    engine.standard().clear();
    assert_eq!(engine.get("user:1").await.unwrap(), Bytes::from("B"));
}

#[tokio::test]
async fn test_corrupt_record_is_a_miss_and_evicted() {
    let store = FlakyStore::new(SHARDS);
    let writer = engine_over(&store);
    writer.set("blob", "payload", &SetOptions::default()).await;

    store.corrupt_reads.store(true, Ordering::SeqCst);
    let reader = engine_over(&store);
    assert!(reader.get("blob").await.is_none());

    store.corrupt_reads.store(false, Ordering::SeqCst);
    let shard = reader.distributed().shard("blob");
    assert!(store.raw_get(shard, "blob").await.is_none());
}

#[tokio::test]
async fn test_batch_reports_per_key_failures() {
    let store = FlakyStore::new(SHARDS);
    let engine = engine_over(&store);

    let keys: Vec<String> = (0..40).map(|i| format!("item:{i}")).collect();
    let broken = engine.distributed().shard(&keys[0]);
    store.broken_shard.store(broken, Ordering::SeqCst);

    let report = engine
        .set_batch(
            keys.iter().map(|key| (key.clone(), Bytes::from(key.clone()))),
            &SetOptions::default(),
        )
        .await;

    assert!(!report.is_complete());
    assert_eq!(report.succeeded.len() + report.failed.len(), keys.len());
    for (key, _) in &report.failed {
        assert_eq!(engine.distributed().shard(key), broken);
        assert!(!engine.is_cached_locally(key));
    }
    for key in &report.succeeded {
        assert_ne!(engine.distributed().shard(key), broken);
        assert!(engine.is_cached_locally(key));
    }
}

#[tokio::test]
#[serial]
async fn test_expired_remote_record_is_deleted_on_read() {
    let store = FlakyStore::new(SHARDS);
    let writer = engine_over(&store);
    writer
        .set("short", "v", &SetOptions::new().ttl(Duration::from_millis(30)))
        .await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    let reader = engine_over(&store);
    assert!(reader.get("short").await.is_none());
    assert!(store.deletes.load(Ordering::SeqCst) >= 1);
    assert!(store.raw_get(reader.distributed().shard("short"), "short").await.is_none());
}

#[tokio::test]
#[serial]
async fn test_expired_read_spares_concurrent_rewrite() {
    let store = FlakyStore::new(SHARDS);
    let config = CacheConfig::default()
        .with_shard_count(SHARDS)
        .with_store_timeout(Duration::from_millis(500));
    let engine = CacheEngine::new(config, store.clone()).unwrap();
    engine
        .set("k", "old", &SetOptions::new().ttl(Duration::from_millis(20)))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The read holds the expired record while a fresh write lands
    store.stall_after_get_ms.store(100, Ordering::SeqCst);
    let (read, written) = tokio::join!(engine.get("k"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine
            .set("k", "new", &SetOptions::new().ttl(Duration::from_secs(60)))
            .await
    });
    store.stall_after_get_ms.store(0, Ordering::SeqCst);
    assert!(read.is_none());
    assert!(written);

    engine.hot().clear();
    engine.standard().clear();
    assert_eq!(engine.get("k").await.unwrap(), Bytes::from("new"));
    assert!(store.raw_get(engine.distributed().shard("k"), "k").await.is_some());
}

#[tokio::test]
async fn test_tombstoned_delete_retried() {
    let store = FlakyStore::new(SHARDS);
    let engine = engine_over(&store);
    let shard = engine.distributed().shard("k");
    engine.set("k", "v", &SetOptions::default()).await;

    store.fail_deletes.store(true, Ordering::SeqCst);
    engine.invalidate_key("k").await;
    assert_eq!(engine.invalidation().retry_tombstones().await, 0);
    assert_eq!(engine.invalidation().tombstone_count(), 1);

    store.fail_deletes.store(false, Ordering::SeqCst);
    assert_eq!(engine.invalidation().retry_tombstones().await, 1);
    assert_eq!(engine.invalidation().tombstone_count(), 0);
    assert!(store.raw_get(shard, "k").await.is_none());
    assert!(engine.get("k").await.is_none());
}
