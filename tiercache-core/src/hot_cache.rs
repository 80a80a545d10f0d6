use crate::arena::{Arena, List};
use crate::{CacheEntry, CacheError, CacheStats, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// L1: a small in-process cache with frequency-based (LFU) eviction.
///
/// Entries live in a slot arena. Every distinct hit count owns a bucket (an
/// index-linked list ordered by `last_accessed`), and the cache remembers the
/// smallest populated bucket, so lookups, inserts and evictions are O(1).
///
/// # Eviction
///
/// When full, the entry with the lowest `hit_count` is removed; among equal
/// counts the one with the oldest `last_accessed` goes first (the head of the
/// lowest bucket).
///
/// # Expiry
///
/// Expiry is lazy: an expired entry is never returned and is purged on the
/// access that finds it. Every entry is held for at most `max_ttl`.
///
/// # Examples
///
/// ```
/// use tiercache_core::{CacheEntry, HotCache};
///
/// let cache = HotCache::new(2, None);
/// cache.insert(CacheEntry::new("a", "1", None));
/// cache.insert(CacheEntry::new("b", "2", None));
///
/// cache.get("a");
/// cache.get("a");
/// cache.get("b");
///
/// // "b" has fewer hits than "a", so it makes room for "c"
/// let evicted = cache.insert(CacheEntry::new("c", "3", None)).unwrap();
/// assert_eq!(evicted.key, "b");
/// assert!(cache.contains_key("a"));
/// assert!(cache.contains_key("c"));
/// ```
pub struct HotCache {
    capacity: usize,
    max_ttl: Option<Duration>,
    state: Mutex<LfuState>,
    stats: Arc<CacheStats>,
}

struct LfuState {
    arena: Arena<CacheEntry>,
    index: HashMap<String, usize>,
    buckets: HashMap<u64, List>,
    min_hits: u64,
}

impl LfuState {
    fn hits_of(&self, idx: usize) -> u64 {
        self.arena.get(idx).map_or(0, |entry| entry.hit_count)
    }

    /// Unlinks `idx` from its bucket. Returns the bucket's hit count and
    /// whether the bucket became empty (and was dropped).
    fn detach(&mut self, idx: usize) -> (u64, bool) {
        let hits = self.hits_of(idx);
        let mut emptied = false;
        if let Some(bucket) = self.buckets.get_mut(&hits) {
            self.arena.unlink(bucket, idx);
            emptied = bucket.is_empty();
        }
        if emptied {
            self.buckets.remove(&hits);
        }
        (hits, emptied)
    }

    fn attach(&mut self, idx: usize) {
        let hits = self.hits_of(idx);
        let bucket = self.buckets.entry(hits).or_default();
        self.arena.push_back(bucket, idx);
        if self.buckets.len() == 1 || hits < self.min_hits {
            self.min_hits = hits;
        }
    }

    fn refresh_min(&mut self) {
        self.min_hits = self.buckets.keys().copied().min().unwrap_or(0);
    }

    fn touch(&mut self, idx: usize, now: Instant) {
        let (old_hits, emptied) = self.detach(idx);
        if let Some(entry) = self.arena.get_mut(idx) {
            entry.touch(now);
        }
        if emptied && old_hits == self.min_hits {
            // Nothing else sat at the old minimum, and the entry moved up by one
            self.min_hits = old_hits.saturating_add(1);
        }
        self.attach(idx);
    }

    fn remove_slot(&mut self, idx: usize) -> Option<CacheEntry> {
        let (hits, emptied) = self.detach(idx);
        let entry = self.arena.remove(idx)?;
        self.index.remove(&entry.key);
        if emptied && hits == self.min_hits {
            self.refresh_min();
        }
        Some(entry)
    }

    fn evict_one(&mut self) -> Option<CacheEntry> {
        if !self.buckets.contains_key(&self.min_hits) {
            self.refresh_min();
        }
        let victim = self.buckets.get(&self.min_hits)?.head?;
        self.remove_slot(victim)
    }
}

impl HotCache {
    /// Creates a hot cache holding at most `capacity` entries, each for at
    /// most `max_ttl`.
    pub fn new(capacity: usize, max_ttl: Option<Duration>) -> Self {
        Self::with_stats(capacity, max_ttl, Arc::new(CacheStats::new()))
    }

    /// Same as [`new`](Self::new) but records into a shared counter set.
    pub fn with_stats(capacity: usize, max_ttl: Option<Duration>, stats: Arc<CacheStats>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_ttl,
            state: Mutex::new(LfuState {
                arena: Arena::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
                buckets: HashMap::new(),
                min_hits: 0,
            }),
            stats,
        }
    }

    /// Looks up `key`, counting a hit on success.
    ///
    /// Returns a copy of the entry after its `hit_count` and `last_accessed`
    /// were updated. An expired entry is purged and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let Some(&idx) = state.index.get(key) else {
            self.stats.record_miss();
            return None;
        };

        if state.arena.get(idx).map_or(true, |entry| entry.is_expired_at(now)) {
            state.remove_slot(idx);
            self.stats.record_expiration();
            self.stats.record_miss();
            trace!(key, "hot layer entry expired");
            return None;
        }

        state.touch(idx, now);
        self.stats.record_hit();
        state.arena.get(idx).cloned()
    }

    /// Returns the entry without counting an access.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let state = self.state.lock();
        let idx = *state.index.get(key)?;
        state
            .arena
            .get(idx)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Inserts or replaces an entry.
    ///
    /// Replacing keeps the key's accumulated `hit_count`. Inserting a new key
    /// into a full cache evicts one entry first, which is returned.
    pub fn insert(&self, mut entry: CacheEntry) -> Option<CacheEntry> {
        if let Some(max_ttl) = self.max_ttl {
            entry.cap_ttl(max_ttl);
        }
        let now = Instant::now();
        entry.last_accessed = now;

        let mut state = self.state.lock();

        if let Some(&idx) = state.index.get(&entry.key) {
            state.detach(idx);
            if let Some(slot) = state.arena.get_mut(idx) {
                entry.hit_count = slot.hit_count;
                *slot = entry;
            }
            state.attach(idx);
            return None;
        }

        let evicted = if state.index.len() >= self.capacity {
            let evicted = state.evict_one();
            if let Some(victim) = &evicted {
                self.stats.record_eviction();
                debug!(key = %victim.key, hits = victim.hit_count, "hot layer eviction");
            }
            evicted
        } else {
            None
        };

        let key = entry.key.clone();
        let idx = state.arena.insert(entry);
        state.index.insert(key, idx);
        state.attach(idx);

        debug_assert!(state.index.len() <= self.capacity);
        evicted
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let idx = *state.index.get(key)?;
        state.remove_slot(idx)
    }

    /// Eagerly drops every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<usize> = state
            .index
            .values()
            .copied()
            .filter(|&idx| state.arena.get(idx).map_or(false, |e| e.is_expired_at(now)))
            .collect();
        for &idx in &expired {
            state.remove_slot(idx);
            self.stats.record_expiration();
        }
        expired.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().index.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.arena.clear();
        state.index.clear();
        state.buckets.clear();
        state.min_hits = 0;
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Verifies the capacity bound and the bucket bookkeeping.
    pub fn check_invariants(&self) -> Result<()> {
        let state = self.state.lock();
        let len = state.index.len();
        if len > self.capacity || state.arena.len() != len {
            return Err(CacheError::CapacityViolation {
                layer: "hot",
                len: len.max(state.arena.len()),
                capacity: self.capacity,
            });
        }
        let bucketed: usize = state.buckets.values().map(|bucket| bucket.len).sum();
        debug_assert_eq!(bucketed, len, "every entry sits in exactly one bucket");
        debug_assert!(state.buckets.is_empty() || state.buckets.contains_key(&state.min_hits));
        Ok(())
    }
}
