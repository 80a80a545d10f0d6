use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tiercache_core::utils::unix_millis;
use tiercache_core::{CacheError, Result};

/// One value as held by the distributed store.
///
/// Expiry is wall-clock milliseconds so the record means the same thing to
/// every process sharing the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub payload: Bytes,
    pub compressed: bool,
    /// Length of the value before compression, checked on read.
    pub original_size: usize,
    pub created_at_ms: u64,
    pub expires_at_ms: Option<u64>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
}

impl StoredRecord {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(false, |expires_at| now_ms >= expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_millis())
    }
}

/// Binding to the sharded key-value store behind the network boundary.
///
/// Every call is addressed by `(shard, key)`; the wire protocol is up to the
/// implementation. Calls may fail or hang: the distributed layer bounds each
/// one with a timeout and treats failures per key.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Number of shards this binding serves.
    fn shard_count(&self) -> usize;

    async fn get(&self, shard: usize, key: &str) -> Result<Option<StoredRecord>>;

    async fn set(&self, shard: usize, key: &str, record: StoredRecord) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, shard: usize, key: &str) -> Result<bool>;

    /// Removes `key` only while the stored record is still the one written
    /// at `created_at_ms`. A record rewritten since then is left alone.
    ///
    /// Returns whether a record was removed.
    async fn delete_if_created_at(&self, shard: usize, key: &str, created_at_ms: u64) -> Result<bool>;

    /// Live (unexpired) records on the shard.
    async fn shard_len(&self, shard: usize) -> Result<usize>;
}

/// In-process store: one concurrent map per shard.
///
/// Serves single-node deployments and tests.
///
/// # Examples
///
/// ```
/// use tiercache_async::{DistributedStore, MemoryStore};
///
/// let store = MemoryStore::new(4);
/// assert_eq!(store.shard_count(), 4);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    shards: Vec<DashMap<String, StoredRecord>>,
}

impl MemoryStore {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count).map(|_| DashMap::new()).collect(),
        }
    }

    fn shard(&self, shard: usize) -> Result<&DashMap<String, StoredRecord>> {
        self.shards.get(shard).ok_or_else(|| CacheError::StoreUnavailable {
            shard,
            reason: format!("no such shard (store has {})", self.shards.len()),
        })
    }
}

#[async_trait]
impl DistributedStore for MemoryStore {
    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    async fn get(&self, shard: usize, key: &str) -> Result<Option<StoredRecord>> {
        Ok(self.shard(shard)?.get(key).map(|record| record.clone()))
    }

    async fn set(&self, shard: usize, key: &str, record: StoredRecord) -> Result<()> {
        self.shard(shard)?.insert(key.to_string(), record);
        Ok(())
    }

    async fn delete(&self, shard: usize, key: &str) -> Result<bool> {
        Ok(self.shard(shard)?.remove(key).is_some())
    }

    async fn delete_if_created_at(&self, shard: usize, key: &str, created_at_ms: u64) -> Result<bool> {
        let removed = self
            .shard(shard)?
            .remove_if(key, |_, record| record.created_at_ms == created_at_ms);
        Ok(removed.is_some())
    }

    async fn shard_len(&self, shard: usize) -> Result<usize> {
        let map = self.shard(shard)?;
        let now = unix_millis();
        map.retain(|_, record| !record.is_expired_at(now));
        Ok(map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: &'static str, expires_at_ms: Option<u64>) -> StoredRecord {
        StoredRecord {
            payload: Bytes::from_static(value.as_bytes()),
            compressed: false,
            original_size: value.len(),
            created_at_ms: unix_millis(),
            expires_at_ms,
            tags: vec![],
            dependencies: vec![],
        }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new(2);
        store.set(1, "k", record("v", None)).await.unwrap();
        assert_eq!(store.get(1, "k").await.unwrap().unwrap().payload, Bytes::from("v"));
        assert!(store.get(0, "k").await.unwrap().is_none());
        assert!(store.delete(1, "k").await.unwrap());
        assert!(!store.delete(1, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_conditional_delete_spares_rewrites() {
        let store = MemoryStore::new(1);
        let mut first = record("old", None);
        first.created_at_ms = 100;
        store.set(0, "k", first).await.unwrap();

        let mut second = record("new", None);
        second.created_at_ms = 200;
        store.set(0, "k", second).await.unwrap();

        assert!(!store.delete_if_created_at(0, "k", 100).await.unwrap());
        assert_eq!(store.get(0, "k").await.unwrap().unwrap().payload, Bytes::from("new"));
        assert!(store.delete_if_created_at(0, "k", 200).await.unwrap());
        assert!(store.get(0, "k").await.unwrap().is_none());
        assert!(!store.delete_if_created_at(0, "missing", 200).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_shard_is_unavailable() {
        let store = MemoryStore::new(2);
        let err = store.get(5, "k").await.unwrap_err();
        assert!(matches!(err, CacheError::StoreUnavailable { shard: 5, .. }));
    }

    #[tokio::test]
    async fn test_shard_len_skips_expired() {
        let store = MemoryStore::new(1);
        store.set(0, "live", record("a", None)).await.unwrap();
        store
            .set(0, "dead", record("b", Some(unix_millis().saturating_sub(1))))
            .await
            .unwrap();
        assert_eq!(store.shard_len(0).await.unwrap(), 1);
    }
}
