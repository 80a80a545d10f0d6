mod common;

use bytes::Bytes;
use common::CountingFetcher;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tiercache_async::{CacheEngine, MemoryStore};
use tiercache_core::{CacheConfig, CacheError, SetOptions};

fn engine() -> Arc<CacheEngine> {
    let config = CacheConfig::default().with_shard_count(4);
    Arc::new(CacheEngine::new(config, Arc::new(MemoryStore::new(4))).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_fetch_once() {
    let engine = engine();
    let fetcher = CountingFetcher::new(Duration::from_millis(50));

    let callers: Vec<_> = (0..32)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move {
                engine
                    .get_or_fetch("k", fetcher.as_ref(), &SetOptions::default())
                    .await
            })
        })
        .collect();

    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), Bytes::from("origin:k"));
    }
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(engine.stats().fetches(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_error_reaches_every_waiter_and_caches_nothing() {
    let engine = engine();
    let fetcher = CountingFetcher::new(Duration::from_millis(50));
    fetcher.fail.store(true, Ordering::SeqCst);

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move {
                engine
                    .get_or_fetch("k", fetcher.as_ref(), &SetOptions::default())
                    .await
            })
        })
        .collect();

    for caller in callers {
        assert!(matches!(caller.await.unwrap(), Err(CacheError::Fetch(_))));
    }
    assert_eq!(fetcher.calls(), 1);
    assert!(!engine.contains("k").await);
    assert_eq!(engine.stats().fetch_errors(), 1);

    // The failure is not remembered
    fetcher.fail.store(false, Ordering::SeqCst);
    let value = engine
        .get_or_fetch("k", fetcher.as_ref(), &SetOptions::default())
        .await
        .unwrap();
    assert_eq!(value, Bytes::from("origin:k"));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_invalidation_during_fetch_is_not_undone() {
    let engine = engine();
    let fetcher = CountingFetcher::new(Duration::from_millis(80));
    let options = SetOptions::new().tags(["t"]);

    let loading = {
        let engine = Arc::clone(&engine);
        let fetcher = Arc::clone(&fetcher);
        let options = options.clone();
        tokio::spawn(async move { engine.get_or_fetch("k", fetcher.as_ref(), &options).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.invalidate_by_tag("t").await;

    // The caller still gets its value, but the stale value is not cached
    assert_eq!(loading.await.unwrap().unwrap(), Bytes::from("origin:k"));
    assert!(!engine.contains("k").await);
}

#[tokio::test]
async fn test_hit_skips_fetcher() {
    let engine = engine();
    let fetcher = CountingFetcher::new(Duration::ZERO);
    engine.set("k", "cached", &SetOptions::default()).await;

    let value = engine
        .get_or_fetch("k", fetcher.as_ref(), &SetOptions::default())
        .await
        .unwrap();
    assert_eq!(value, Bytes::from("cached"));
    assert_eq!(fetcher.calls(), 0);
}
