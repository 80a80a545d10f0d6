use crate::codec::{decode_payload, encode_payload};
use crate::store::{DistributedStore, StoredRecord};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::utils::{expiry_millis, instant_from_unix_millis, shard_for_key, unix_millis};
use tiercache_core::{CacheEntry, CacheError, CacheStats, Result, ShardStats};
use tracing::{debug, trace, warn};

/// The sharded layer behind the network boundary.
///
/// Routes every key to `xxh3_64(key) % shard_count`, compresses large payloads,
/// and bounds each store call with a timeout. Failures are per key: a store
/// error is reported for the key that hit it and never touches other keys.
///
/// # Degradation
///
/// [`get`](Self::get) never fails. A timed-out or failing store reads as a
/// miss, and an undecodable record is deleted and read as a miss.
/// [`try_get`](Self::try_get) exposes the underlying error instead.
pub struct DistributedCache {
    store: Arc<dyn DistributedStore>,
    shard_count: usize,
    compression_threshold: usize,
    timeout: Duration,
    stats: Arc<CacheStats>,
    errors: AtomicU64,
    compressed_writes: AtomicU64,
}

/// Per-key outcome of a batch write.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, CacheError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|(key, _)| key.as_str()).collect()
    }
}

/// Result of [`DistributedCache::get_stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributedStats {
    pub total_keys: u64,
    pub shard_distribution: Vec<u64>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub compressed_writes: u64,
}

impl From<DistributedStats> for ShardStats {
    fn from(stats: DistributedStats) -> Self {
        ShardStats {
            distribution: stats.shard_distribution,
            errors: stats.errors,
            compressed_writes: stats.compressed_writes,
        }
    }
}

impl DistributedCache {
    /// # Errors
    ///
    /// `InvalidConfig` when the binding serves a different number of shards
    /// than configured.
    pub fn new(
        store: Arc<dyn DistributedStore>,
        shard_count: usize,
        compression_threshold: usize,
        timeout: Duration,
        stats: Arc<CacheStats>,
    ) -> Result<Self> {
        if shard_count == 0 || store.shard_count() != shard_count {
            return Err(CacheError::InvalidConfig(format!(
                "store serves {} shards, configuration expects {}",
                store.shard_count(),
                shard_count
            )));
        }
        Ok(Self {
            store,
            shard_count,
            compression_threshold,
            timeout,
            stats,
            errors: AtomicU64::new(0),
            compressed_writes: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn shard(&self, key: &str) -> usize {
        shard_for_key(key, self.shard_count)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Runs one store call under the timeout, counting failures.
    async fn bounded<T, F>(&self, shard: usize, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::StoreUnavailable {
                shard,
                reason: format!("timed out after {:?}", self.timeout),
            }),
        };
        if outcome.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Reads `key`, propagating store and decode failures.
    pub async fn try_get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.read(key, true).await
    }

    /// Reads `key`, degrading every failure to a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.read(key, true).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key, error = %err, "distributed read degraded to miss");
                None
            }
        }
    }

    /// Whether a live copy exists, without touching hit/miss counters.
    pub async fn contains(&self, key: &str) -> bool {
        matches!(self.read(key, false).await, Ok(Some(_)))
    }

    async fn read(&self, key: &str, count: bool) -> Result<Option<CacheEntry>> {
        let shard = self.shard(key);
        let record = match self.bounded(shard, self.store.get(shard, key)).await {
            Ok(record) => record,
            Err(err) => {
                if count {
                    self.stats.record_miss();
                }
                return Err(err);
            }
        };

        let Some(record) = record else {
            if count {
                self.stats.record_miss();
            }
            return Ok(None);
        };

        if record.is_expired_at(unix_millis()) {
            if count {
                self.stats.record_expiration();
                self.stats.record_miss();
            }
            trace!(key, shard, "distributed record expired");
            self.delete_quietly(shard, key, record.created_at_ms).await;
            return Ok(None);
        }

        let created_at_ms = record.created_at_ms;
        match decode_record(key, record) {
            Ok(entry) => {
                if count {
                    self.stats.record_hit();
                }
                Ok(Some(entry))
            }
            Err(err) => {
                if count {
                    self.stats.record_miss();
                }
                warn!(key, shard, error = %err, "evicting undecodable record");
                self.delete_quietly(shard, key, created_at_ms).await;
                Err(err)
            }
        }
    }

    /// Deletes the record read at `created_at_ms`, unless a concurrent write
    /// replaced it in the meantime.
    async fn delete_quietly(&self, shard: usize, key: &str, created_at_ms: u64) {
        let delete = self.store.delete_if_created_at(shard, key, created_at_ms);
        match self.bounded(shard, delete).await {
            Ok(false) => trace!(key, shard, "record rewritten since read, kept"),
            Ok(true) => {}
            Err(err) => debug!(key, shard, error = %err, "best-effort delete failed"),
        }
    }

    /// Writes `entry`, returning whether the payload was stored compressed.
    ///
    /// # Errors
    ///
    /// `Serialization` if compression fails, `StoreUnavailable` if the store
    /// call fails or times out.
    pub async fn set(&self, entry: &CacheEntry, compress: Option<bool>) -> Result<bool> {
        let shard = self.shard(&entry.key);
        let record = self.encode(entry, compress)?;
        let compressed = record.compressed;
        self.bounded(shard, self.store.set(shard, &entry.key, record))
            .await?;
        if compressed {
            self.compressed_writes.fetch_add(1, Ordering::Relaxed);
        }
        trace!(key = %entry.key, shard, compressed, "distributed write");
        Ok(compressed)
    }

    fn encode(&self, entry: &CacheEntry, compress: Option<bool>) -> Result<StoredRecord> {
        let encoded = encode_payload(&entry.value, self.compression_threshold, compress)?;
        Ok(StoredRecord {
            payload: encoded.bytes,
            compressed: encoded.compressed,
            original_size: entry.value.len(),
            created_at_ms: unix_millis(),
            expires_at_ms: expiry_millis(entry.remaining_ttl()),
            tags: sorted(entry.tags.iter()),
            dependencies: sorted(entry.dependencies.iter()),
        })
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let shard = self.shard(key);
        self.bounded(shard, self.store.delete(shard, key)).await
    }

    /// Deletes `key` only if its record was written at or before `cutoff_ms`.
    ///
    /// A record written later belongs to a newer write and is kept. `Ok`
    /// means no record older than the cutoff remains.
    pub async fn delete_if_written_before(&self, key: &str, cutoff_ms: u64) -> Result<bool> {
        let shard = self.shard(key);
        let Some(record) = self.bounded(shard, self.store.get(shard, key)).await? else {
            return Ok(false);
        };
        if record.created_at_ms > cutoff_ms {
            trace!(key, shard, "record newer than cutoff, kept");
            return Ok(false);
        }
        let delete = self.store.delete_if_created_at(shard, key, record.created_at_ms);
        self.bounded(shard, delete).await
    }

    /// Writes many entries, grouped by shard.
    ///
    /// Shards are written concurrently; keys within one shard in order. Each
    /// key succeeds or fails on its own.
    pub async fn set_batch(&self, entries: &[CacheEntry], compress: Option<bool>) -> BatchReport {
        let mut by_shard: HashMap<usize, Vec<&CacheEntry>> = HashMap::new();
        for entry in entries {
            by_shard.entry(self.shard(&entry.key)).or_default().push(entry);
        }

        let writes = by_shard.into_values().map(|group| async move {
            let mut outcomes = Vec::with_capacity(group.len());
            for entry in group {
                let outcome = self.set(entry, compress).await;
                outcomes.push((entry.key.clone(), outcome));
            }
            outcomes
        });

        let mut report = BatchReport::default();
        for (key, outcome) in join_all(writes).await.into_iter().flatten() {
            match outcome {
                Ok(_) => report.succeeded.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "batch write failed for key");
                    report.failed.push((key, err));
                }
            }
        }
        debug!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "distributed batch write"
        );
        report
    }

    /// Key counts per shard plus the layer's counters.
    ///
    /// A shard that cannot be counted reports zero.
    pub async fn get_stats(&self) -> DistributedStats {
        let counts = join_all((0..self.shard_count).map(|shard| async move {
            match self.bounded(shard, self.store.shard_len(shard)).await {
                Ok(len) => len as u64,
                Err(err) => {
                    warn!(shard, error = %err, "shard count unavailable");
                    0
                }
            }
        }))
        .await;

        DistributedStats {
            total_keys: counts.iter().sum(),
            shard_distribution: counts,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            errors: self.errors.load(Ordering::Relaxed),
            compressed_writes: self.compressed_writes.load(Ordering::Relaxed),
        }
    }
}

fn sorted<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut items: Vec<String> = items.cloned().collect();
    items.sort();
    items
}

fn decode_record(key: &str, record: StoredRecord) -> Result<CacheEntry> {
    let value = decode_payload(&record.payload, record.compressed, record.original_size)?;
    if value.len() != record.original_size {
        return Err(CacheError::Serialization(format!(
            "`{key}` decoded to {} bytes, expected {}",
            value.len(),
            record.original_size
        )));
    }
    let mut entry = CacheEntry::new(key, value, None)
        .with_tags(record.tags)
        .with_dependencies(record.dependencies);
    entry.expires_at = record.expires_at_ms.and_then(instant_from_unix_millis);
    entry.compressed = record.compressed;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn cache(shards: usize) -> (Arc<MemoryStore>, DistributedCache) {
        let store = Arc::new(MemoryStore::new(shards));
        let cache = DistributedCache::new(
            store.clone(),
            shards,
            64,
            Duration::from_millis(200),
            Arc::new(CacheStats::new()),
        )
        .unwrap();
        (store, cache)
    }

    #[test]
    fn test_shard_count_mismatch_rejected() {
        let store = Arc::new(MemoryStore::new(4));
        let result = DistributedCache::new(
            store,
            8,
            64,
            Duration::from_millis(10),
            Arc::new(CacheStats::new()),
        );
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_round_trip_keeps_metadata() {
        let (_, cache) = cache(4);
        let entry = CacheEntry::new("user:1", "A", Some(Duration::from_secs(60)))
            .with_tags(["user"])
            .with_dependencies(["db:users"]);
        assert!(!cache.set(&entry, None).await.unwrap());

        let read = cache.get("user:1").await.unwrap();
        assert_eq!(read.value, Bytes::from("A"));
        assert!(read.tags.contains("user"));
        assert!(read.dependencies.contains("db:users"));
        let remaining = read.remaining_ttl().unwrap();
        assert!(remaining > Duration::from_secs(58));
    }

    #[tokio::test]
    async fn test_large_values_compressed_transparently() {
        let (store, cache) = cache(2);
        let value = Bytes::from("x".repeat(4096));
        let entry = CacheEntry::new("big", value.clone(), None);
        assert!(cache.set(&entry, None).await.unwrap());

        let raw = store.get(cache.shard("big"), "big").await.unwrap().unwrap();
        assert!(raw.compressed);
        assert!(raw.payload.len() < 4096);
        assert_eq!(cache.get("big").await.unwrap().value, value);
        assert_eq!(cache.get_stats().await.compressed_writes, 1);
    }

    #[tokio::test]
    async fn test_expired_record_is_miss() {
        let (store, cache) = cache(2);
        let entry = CacheEntry::new("k", "v", Some(Duration::from_millis(1)));
        cache.set(&entry, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache.get("k").await.is_none());
        assert!(store.get(cache.shard("k"), "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_evicted() {
        let (store, cache) = cache(2);
        let shard = cache.shard("k");
        store
            .set(
                shard,
                "k",
                StoredRecord {
                    payload: Bytes::from_static(b"garbage"),
                    compressed: true,
                    original_size: 10,
                    created_at_ms: unix_millis(),
                    expires_at_ms: None,
                    tags: vec![],
                    dependencies: vec![],
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            cache.try_get("k").await,
            Err(CacheError::Serialization(_))
        ));
        assert!(store.get(shard, "k").await.unwrap().is_none());
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_before_cutoff_keeps_newer_record() {
        let (store, cache) = cache(2);
        cache.set(&CacheEntry::new("k", "v", None), None).await.unwrap();
        let written = store.get(cache.shard("k"), "k").await.unwrap().unwrap().created_at_ms;

        assert!(!cache.delete_if_written_before("k", written - 1).await.unwrap());
        assert!(cache.get("k").await.is_some());
        assert!(cache.delete_if_written_before("k", written).await.unwrap());
        assert!(cache.get("k").await.is_none());
        assert!(!cache.delete_if_written_before("k", written).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_groups_by_shard() {
        let (_, cache) = cache(4);
        let entries: Vec<CacheEntry> = (0..20)
            .map(|i| CacheEntry::new(format!("k{i}"), format!("v{i}"), None))
            .collect();
        let report = cache.set_batch(&entries, None).await;
        assert!(report.is_complete());
        assert_eq!(report.succeeded.len(), 20);

        let stats = cache.get_stats().await;
        assert_eq!(stats.total_keys, 20);
        let mut expected = vec![0u64; 4];
        for entry in &entries {
            expected[cache.shard(&entry.key)] += 1;
        }
        assert_eq!(stats.shard_distribution, expected);
    }

    #[tokio::test]
    async fn test_contains_does_not_count() {
        let (_, cache) = cache(2);
        cache.set(&CacheEntry::new("k", "v", None), None).await.unwrap();
        assert!(cache.contains("k").await);
        assert!(!cache.contains("other").await);
        let stats = cache.get_stats().await;
        assert_eq!(stats.hits + stats.misses, 0);
    }
}
