//! # Cross-layer Invalidation
//!
//! [`InvalidationManager`] owns the tag and dependency index and is the only
//! path through which entries are installed into, or removed from, the
//! in-process layers. Doing both under the index lock keeps an entry and its
//! memberships in step: no caller observes one without the other.
//!
//! ## Epochs
//!
//! Every invalidation advances a global epoch. A read that started before
//! the bump may still return what it saw, but it may not write what it saw
//! back into L1/L2: backfills and fetch-on-miss population carry the epoch
//! they started under and are dropped if it moved.
//!
//! ## Tombstones
//!
//! Removing a key from the distributed layer is a network call that can
//! fail. Until it succeeds the key is tombstoned and lookups skip the
//! distributed copy, so a completed invalidation is never undone by a stale
//! remote record.

use crate::distributed::DistributedCache;
use futures::future::join_all;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tiercache_core::{
    CacheEntry, HotCache, InvalidationIndex, InvalidationStrategy, Result, StandardCache,
};
use tracing::{debug, warn};

pub struct InvalidationManager {
    index: Mutex<InvalidationIndex>,
    epoch: AtomicU64,
    hot: Arc<HotCache>,
    standard: Arc<StandardCache>,
    distributed: Arc<DistributedCache>,
}

impl InvalidationManager {
    pub fn new(
        hot: Arc<HotCache>,
        standard: Arc<StandardCache>,
        distributed: Arc<DistributedCache>,
    ) -> Self {
        Self {
            index: Mutex::new(InvalidationIndex::new()),
            epoch: AtomicU64::new(0),
            hot,
            standard,
            distributed,
        }
    }

    /// Current invalidation epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Installs a freshly written entry into L1, L2 and the index.
    ///
    /// `distributed_written` clears any tombstone: the remote copy is now the
    /// value being installed.
    pub fn install(&self, entry: CacheEntry, distributed_written: bool) {
        let mut index = self.index.lock();
        self.install_locked(&mut index, entry, distributed_written);
    }

    /// Like [`install`](Self::install), but only if no invalidation happened
    /// since `epoch`. Returns whether the entry was installed.
    pub fn install_if_current(&self, entry: CacheEntry, distributed_written: bool, epoch: u64) -> bool {
        let mut index = self.index.lock();
        if self.epoch() != epoch {
            debug!(key = %entry.key, "skipping install, invalidated while loading");
            return false;
        }
        self.install_locked(&mut index, entry, distributed_written);
        true
    }

    fn install_locked(&self, index: &mut InvalidationIndex, entry: CacheEntry, distributed_written: bool) {
        index.record_entry(&entry);
        if distributed_written {
            index.clear_tombstone(&entry.key);
        }
        self.standard.insert(entry.clone());
        self.hot.insert(entry);
    }

    /// Copies an L2 hit up into L1.
    pub fn backfill_hot(&self, entry: CacheEntry, epoch: u64) -> bool {
        let _index = self.index.lock();
        if self.epoch() != epoch {
            return false;
        }
        self.hot.insert(entry);
        true
    }

    /// Copies a distributed hit into L2 and L1, indexing its memberships.
    pub fn backfill(&self, entry: CacheEntry, epoch: u64) -> bool {
        let mut index = self.index.lock();
        if self.epoch() != epoch || index.is_tombstoned(&entry.key) {
            return false;
        }
        index.record_entry(&entry);
        self.standard.insert(entry.clone());
        self.hot.insert(entry);
        true
    }

    pub fn is_tombstoned(&self, key: &str) -> bool {
        self.index.lock().is_tombstoned(key)
    }

    /// Drops the index entry of `key` if it has expired everywhere.
    pub fn forget_if_expired(&self, key: &str) -> bool {
        self.index.lock().forget_if_expired(key, Instant::now())
    }

    /// Removes `key` from every layer and from every tag and dependency set.
    pub async fn invalidate_key(&self, key: &str) -> usize {
        let key = key.to_string();
        self.invalidate_selected("key", move |_, _, _| vec![key]).await
    }

    /// Invalidates every key carrying `tag`, then drops the tag.
    pub async fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.invalidate_selected("tag", |index, _, _| index.keys_for_tag(tag))
            .await
    }

    /// Invalidates the direct dependents of `dependency`.
    ///
    /// Single level: keys depending on those dependents are not touched.
    pub async fn invalidate_by_dependency(&self, dependency: &str) -> usize {
        self.invalidate_selected("dependency", |index, _, _| index.dependents_of(dependency))
            .await
    }

    /// Invalidates every known key matching `pattern`.
    ///
    /// Scans the keys of L1, L2 and the index, which is O(total local keys).
    /// Keys only present in the distributed store are not enumerated.
    pub async fn invalidate_by_regex(&self, pattern: &Regex) -> usize {
        self.invalidate_selected("pattern", |index, hot, standard| {
            let mut keys: BTreeSet<String> = index.keys_matching(pattern).into_iter().collect();
            keys.extend(
                hot.keys()
                    .into_iter()
                    .chain(standard.keys())
                    .filter(|key| pattern.is_match(key)),
            );
            keys.into_iter().collect()
        })
        .await
    }

    /// Compiles `pattern` and invalidates every known key it matches.
    ///
    /// # Errors
    ///
    /// `InvalidPattern` when the expression does not compile.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)?;
        Ok(self.invalidate_by_regex(&regex).await)
    }

    pub async fn invalidate(&self, strategy: &InvalidationStrategy) -> Result<usize> {
        Ok(match strategy {
            InvalidationStrategy::Key(key) => self.invalidate_key(key).await,
            InvalidationStrategy::Tag(tag) => self.invalidate_by_tag(tag).await,
            InvalidationStrategy::Pattern(pattern) => self.invalidate_by_pattern(pattern).await?,
            InvalidationStrategy::Dependency(dep) => self.invalidate_by_dependency(dep).await,
        })
    }

    /// Removes `key` unless a newer write owns it again.
    ///
    /// Used when a load wrote the distributed layer but lost the race
    /// against an invalidation.
    pub async fn discard_unowned(&self, key: &str) -> usize {
        self.invalidate_selected("discard", |index, _, _| {
            if index.contains(key) {
                Vec::new()
            } else {
                vec![key.to_string()]
            }
        })
        .await
    }

    /// Selects keys and removes them locally in one critical section, then
    /// deletes the distributed copies concurrently.
    async fn invalidate_selected<F>(&self, kind: &'static str, select: F) -> usize
    where
        F: FnOnce(&InvalidationIndex, &HotCache, &StandardCache) -> Vec<String>,
    {
        let (keys, epoch) = {
            let mut index = self.index.lock();
            let keys = select(&index, &self.hot, &self.standard);
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            for key in &keys {
                index.forget(key);
                self.hot.remove(key);
                self.standard.remove(key);
                index.tombstone(key, epoch);
            }
            (keys, epoch)
        };

        if keys.is_empty() {
            return 0;
        }

        let deletes = keys.iter().map(|key| async move {
            let outcome = self.distributed.delete(key).await;
            (key, outcome)
        });
        let outcomes = join_all(deletes).await;

        let mut index = self.index.lock();
        let mut stale = 0;
        for (key, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    index.clear_tombstone_if(key, epoch);
                }
                Err(err) => {
                    stale += 1;
                    warn!(key = %key, error = %err, "distributed delete failed, key tombstoned");
                }
            }
        }
        debug!(kind, keys = keys.len(), stale, epoch, "invalidated");
        keys.len()
    }

    /// Retries the distributed delete of every tombstoned key.
    ///
    /// Only records written before the failed invalidation are deleted; a
    /// tombstone is cleared once no such record remains and no newer
    /// invalidation replaced it. Returns how many tombstones were cleared.
    pub async fn retry_tombstones(&self) -> usize {
        let pending = self.index.lock().tombstones();
        if pending.is_empty() {
            return 0;
        }

        let deletes = pending.iter().map(|(key, tombstone)| async move {
            let outcome = self.distributed.delete_if_written_before(key, tombstone.at_ms).await;
            (key, tombstone.epoch, outcome)
        });
        let outcomes = join_all(deletes).await;

        let mut index = self.index.lock();
        let mut cleared = 0;
        for (key, epoch, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    if index.clear_tombstone_if(key, epoch) {
                        cleared += 1;
                    }
                }
                Err(err) => debug!(key = %key, error = %err, "tombstoned delete failed again"),
            }
        }
        debug!(pending = pending.len(), cleared, "tombstone retry");
        cleared
    }

    /// Forgets expired index entries and sweeps both in-process layers.
    pub fn purge_expired(&self) -> usize {
        let mut index = self.index.lock();
        let forgotten = index.purge_expired(Instant::now()).len();
        forgotten + self.hot.purge_expired() + self.standard.purge_expired()
    }

    pub fn tags_of(&self, key: &str) -> Option<HashSet<String>> {
        self.index.lock().tags_of(key)
    }

    pub fn dependencies_of(&self, key: &str) -> Option<HashSet<String>> {
        self.index.lock().dependencies_of(key)
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.index.lock().keys_for_tag(tag)
    }

    pub fn dependents_of(&self, dependency: &str) -> Vec<String> {
        self.index.lock().dependents_of(dependency)
    }

    pub fn indexed_keys(&self) -> Vec<String> {
        self.index.lock().keys()
    }

    pub fn tombstone_count(&self) -> usize {
        self.index.lock().tombstone_count()
    }

    /// Verifies the tag/dependency mirrors and both layers' capacity bounds.
    pub fn check_consistency(&self) -> Result<bool> {
        let index = self.index.lock();
        self.hot.check_invariants()?;
        self.standard.check_invariants()?;
        Ok(index.is_consistent())
    }
}
