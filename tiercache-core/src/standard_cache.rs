use crate::arena::{Arena, List};
use crate::{CacheEntry, CacheError, CacheStats, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// L2: a larger in-process cache with recency-based (LRU) eviction.
///
/// The recency order is a single index-linked list over a slot arena: the
/// head is the least recently used entry, a hit or write moves the entry to
/// the tail.
///
/// # Examples
///
/// ```
/// use tiercache_core::{CacheEntry, StandardCache};
///
/// let cache = StandardCache::new(2, None);
/// cache.insert(CacheEntry::new("a", "1", None));
/// cache.insert(CacheEntry::new("b", "2", None));
/// cache.get("a");
///
/// let evicted = cache.insert(CacheEntry::new("c", "3", None)).unwrap();
/// assert_eq!(evicted.key, "b");
/// ```
pub struct StandardCache {
    capacity: usize,
    max_ttl: Option<Duration>,
    state: Mutex<LruState>,
    stats: Arc<CacheStats>,
}

struct LruState {
    arena: Arena<CacheEntry>,
    index: HashMap<String, usize>,
    order: List,
}

impl LruState {
    fn move_to_back(&mut self, idx: usize) {
        self.arena.unlink(&mut self.order, idx);
        self.arena.push_back(&mut self.order, idx);
    }

    fn remove_slot(&mut self, idx: usize) -> Option<CacheEntry> {
        self.arena.unlink(&mut self.order, idx);
        let entry = self.arena.remove(idx)?;
        self.index.remove(&entry.key);
        Some(entry)
    }
}

impl StandardCache {
    pub fn new(capacity: usize, max_ttl: Option<Duration>) -> Self {
        Self::with_stats(capacity, max_ttl, Arc::new(CacheStats::new()))
    }

    pub fn with_stats(capacity: usize, max_ttl: Option<Duration>, stats: Arc<CacheStats>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_ttl,
            state: Mutex::new(LruState {
                arena: Arena::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
                order: List::default(),
            }),
            stats,
        }
    }

    /// Looks up `key` and marks it most recently used.
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
            trace!(key, "standard layer entry expired");
            return None;
        }

        state.move_to_back(idx);
        let entry = state.arena.get_mut(idx)?;
        entry.touch(now);
        self.stats.record_hit();
        Some(entry.clone())
    }

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

    /// Inserts or replaces an entry, evicting the least recently used one
    /// when a new key arrives at capacity.
    pub fn insert(&self, mut entry: CacheEntry) -> Option<CacheEntry> {
        if let Some(max_ttl) = self.max_ttl {
            entry.cap_ttl(max_ttl);
        }
        entry.last_accessed = Instant::now();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(&idx) = state.index.get(&entry.key) {
            if let Some(slot) = state.arena.get_mut(idx) {
                entry.hit_count = slot.hit_count;
                *slot = entry;
            }
            state.move_to_back(idx);
            return None;
        }

        let mut evicted = None;
        if state.index.len() >= self.capacity {
            if let Some(victim) = state.order.head {
                evicted = state.remove_slot(victim);
                self.stats.record_eviction();
                if let Some(victim) = &evicted {
                    debug!(key = %victim.key, "standard layer eviction");
                }
            }
        }

        let key = entry.key.clone();
        let idx = state.arena.insert(entry);
        state.arena.push_back(&mut state.order, idx);
        state.index.insert(key, idx);

        debug_assert!(state.index.len() <= self.capacity);
        evicted
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let idx = *state.index.get(key)?;
        state.remove_slot(idx)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<usize> = state
            .arena
            .iter_list(&state.order)
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &expired {
            state.remove_slot(idx);
            self.stats.record_expiration();
        }
        expired.len()
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .arena
            .iter_list(&state.order)
            .map(|(_, entry)| entry.key.clone())
            .collect()
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
        state.order = List::default();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn check_invariants(&self) -> Result<()> {
        let state = self.state.lock();
        let len = state.index.len();
        if len > self.capacity || state.order.len != len || state.arena.len() != len {
            return Err(CacheError::CapacityViolation {
                layer: "standard",
                len: len.max(state.order.len),
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}
