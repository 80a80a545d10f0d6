use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::prelude::*;
use tiercache::{CacheEntry, StandardCache};

fn cache() -> TieredCache {
    TieredCache::in_memory(CacheConfig::default().with_shard_count(4)).unwrap()
}

#[tokio::test]
#[serial]
async fn test_value_lives_until_ttl() {
    let cache = cache();
    cache
        .set("k", "v", &SetOptions::new().ttl(Duration::from_millis(200)))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.get("k").await.unwrap(), "v");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(cache.get("k").await.is_none());
    assert!(!cache.engine().contains("k").await);
}

#[tokio::test]
#[serial]
async fn test_layer_caps_do_not_outlive_entry() {
    let config = CacheConfig::from_toml_str("hot_ttl_seconds = 1\nshard_count = 2").unwrap();
    let cache = TieredCache::in_memory(config).unwrap();
    cache
        .set("k", "v", &SetOptions::new().ttl(Duration::from_secs(30)))
        .await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    // L1 copy is gone, the lower layers still serve it
    assert!(cache.engine().hot().peek("k").is_none());
    assert_eq!(cache.get("k").await.unwrap(), "v");
}

#[tokio::test]
async fn test_invalidate_twice_is_same_as_once() {
    let cache = cache();
    cache.set("a", "1", &SetOptions::new().tags(["t"])).await;
    cache.set("b", "2", &SetOptions::new().tags(["t"])).await;

    assert_eq!(cache.invalidate_key("a").await, 1);
    let once = (
        cache.get("a").await,
        cache.get("b").await,
        cache.engine().invalidation().keys_for_tag("t"),
    );
    cache.invalidate_key("a").await;
    let twice = (
        cache.get("a").await,
        cache.get("b").await,
        cache.engine().invalidation().keys_for_tag("t"),
    );
    assert_eq!(once, twice);
    assert_eq!(twice.2, vec!["b"]);
}

#[tokio::test]
async fn test_tag_index_mirrors_entries() {
    let cache = cache();
    for i in 0..20 {
        let tags: Vec<String> = (0..3).filter(|t| i % (t + 2) == 0).map(|t| format!("t{t}")).collect();
        cache
            .set(&format!("k{i}"), "v", &SetOptions::new().tags(tags))
            .await;
    }
    cache.invalidate_by_tag("t1").await;
    cache.invalidate_key("k4").await;

    let invalidation = cache.engine().invalidation();
    for tag in ["t0", "t1", "t2"] {
        for key in invalidation.keys_for_tag(tag) {
            assert!(invalidation.tags_of(&key).unwrap().contains(tag));
        }
    }
    for key in invalidation.indexed_keys() {
        for tag in invalidation.tags_of(&key).unwrap() {
            assert!(invalidation.keys_for_tag(&tag).contains(&key));
        }
    }
    assert!(invalidation.check_consistency().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_fetch_once() {
    let cache = Arc::new(cache());
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                let origin = move |key: String| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, FetchError>(Bytes::from(key))
                    }
                };
                cache.get_or_fetch("missing", &origin, &SetOptions::default()).await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "missing");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_layers_never_exceed_capacity() {
    let standard = StandardCache::new(16, None);
    for i in 0..1000 {
        standard.insert(CacheEntry::new(format!("k{i}"), "v", None));
        if i % 3 == 0 {
            standard.get(&format!("k{}", i / 2));
        }
        assert!(standard.len() <= 16);
    }
    assert!(standard.check_invariants().is_ok());
    // The most recent inserts survive
    assert!(standard.contains_key("k999"));
}

#[tokio::test]
async fn test_set_then_get_sees_new_value() {
    let cache = cache();
    for round in 0..10 {
        let value = format!("v{round}");
        cache.set("k", value.clone(), &SetOptions::default()).await;
        assert_eq!(cache.get("k").await.unwrap(), Bytes::from(value));
    }
}
