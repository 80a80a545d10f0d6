#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache_async::{DistributedStore, MemoryStore, StoredRecord};
use tiercache_core::{CacheError, FetchError, Result};

/// A `MemoryStore` whose calls can be made to fail, hang or return garbage.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_gets: AtomicBool,
    pub fail_sets: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub corrupt_reads: AtomicBool,
    /// Shard whose writes fail; `usize::MAX` for none.
    pub broken_shard: AtomicUsize,
    /// Added to every call, in milliseconds.
    pub delay_ms: AtomicU64,
    /// Sleep after a get has read its record, before returning it.
    pub stall_after_get_ms: AtomicU64,
    pub deletes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(shard_count: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(shard_count),
            fail_gets: AtomicBool::new(false),
            fail_sets: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            corrupt_reads: AtomicBool::new(false),
            broken_shard: AtomicUsize::new(usize::MAX),
            delay_ms: AtomicU64::new(0),
            stall_after_get_ms: AtomicU64::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    /// Reads straight from the backing shards, bypassing every fault.
    pub async fn raw_get(&self, shard: usize, key: &str) -> Option<StoredRecord> {
        self.inner.get(shard, key).await.ok().flatten()
    }

    async fn delay(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn unavailable(shard: usize) -> CacheError {
        CacheError::StoreUnavailable {
            shard,
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl DistributedStore for FlakyStore {
    fn shard_count(&self) -> usize {
        self.inner.shard_count()
    }

    async fn get(&self, shard: usize, key: &str) -> Result<Option<StoredRecord>> {
        self.delay().await;
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Self::unavailable(shard));
        }
        let record = self.inner.get(shard, key).await?;
        let stall = self.stall_after_get_ms.load(Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        if self.corrupt_reads.load(Ordering::SeqCst) {
            return Ok(record.map(|mut record| {
                record.payload = Bytes::from_static(b"\x1f\x8b not really gzip");
                record.compressed = true;
                record
            }));
        }
        Ok(record)
    }

    async fn set(&self, shard: usize, key: &str, record: StoredRecord) -> Result<()> {
        self.delay().await;
        if self.fail_sets.load(Ordering::SeqCst) || self.broken_shard.load(Ordering::SeqCst) == shard {
            return Err(Self::unavailable(shard));
        }
        self.inner.set(shard, key, record).await
    }

    async fn delete(&self, shard: usize, key: &str) -> Result<bool> {
        self.delay().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable(shard));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(shard, key).await
    }

    async fn delete_if_created_at(&self, shard: usize, key: &str, created_at_ms: u64) -> Result<bool> {
        self.delay().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable(shard));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_if_created_at(shard, key, created_at_ms).await
    }

    async fn shard_len(&self, shard: usize) -> Result<usize> {
        self.delay().await;
        self.inner.shard_len(shard).await
    }
}

/// Fetcher that counts its calls and answers `origin:<key>` after `delay`.
pub struct CountingFetcher {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail: AtomicBool,
}

impl CountingFetcher {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl tiercache_async::Fetcher for CountingFetcher {
    async fn fetch(&self, key: &str) -> std::result::Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::new(key, "origin unavailable"));
        }
        Ok(Bytes::from(format!("origin:{key}")))
    }
}
