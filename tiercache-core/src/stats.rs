use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-layer access counters.
///
/// Tracks hits, misses, capacity evictions and lazy expirations with atomic
/// operations so every layer can update its counters without taking a lock.
///
/// # Thread Safety
///
/// All operations use `Relaxed` ordering: counters are monotonic tallies and
/// no other memory is published through them.
///
/// # Examples
///
/// ```
/// use tiercache_core::CacheStats;
///
/// let stats = CacheStats::new();
///
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.misses(), 1);
/// assert_eq!(stats.total_accesses(), 3);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    /// Creates a new `CacheStats` instance with zero counters.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an entry removed to make room for another.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an entry purged because its TTL elapsed.
    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Returns the total number of cache accesses (hits + misses).
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Calculates the hit rate as a fraction (0.0 to 1.0).
    ///
    /// Returns 0.0 if there have been no accesses.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            evictions: AtomicU64::new(self.evictions()),
            expirations: AtomicU64::new(self.expirations()),
        }
    }
}

/// Running average of operation latency.
///
/// ```
/// use tiercache_core::LatencyStats;
/// use std::time::Duration;
///
/// let latency = LatencyStats::new();
/// latency.record(Duration::from_micros(100));
/// latency.record(Duration::from_micros(300));
/// assert_eq!(latency.samples(), 2);
/// assert!((latency.average_micros() - 200.0).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Default)]
pub struct LatencyStats {
    total_micros: AtomicU64,
    samples: AtomicU64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Average in microseconds, 0.0 before the first sample.
    pub fn average_micros(&self) -> f64 {
        let samples = self.samples();
        if samples == 0 {
            0.0
        } else {
            self.total_micros.load(Ordering::Relaxed) as f64 / samples as f64
        }
    }

    pub fn reset(&self) {
        self.total_micros.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.evictions(), 0);
        assert_eq!(stats.total_accesses(), 0);
    }

    #[test]
    fn test_hit_rate_no_accesses() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 1.0);
    }

    #[test]
    fn test_eviction_and_expiration_counters() {
        let stats = CacheStats::new();
        stats.record_eviction();
        stats.record_eviction();
        stats.record_expiration();
        assert_eq!(stats.evictions(), 2);
        assert_eq!(stats.expirations(), 1);
        // Neither counts as an access
        assert_eq!(stats.total_accesses(), 0);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();
        stats.reset();
        assert_eq!(stats.total_accesses(), 0);
        assert_eq!(stats.evictions(), 0);
    }

    #[test]
    fn test_clone_is_independent() {
        let stats = CacheStats::new();
        stats.record_hit();

        let cloned = stats.clone();
        stats.record_hit();
        assert_eq!(stats.hits(), 2);
        assert_eq!(cloned.hits(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CacheStats::new());
        let mut handles = vec![];

        // 10 threads x (100 hits + 50 misses)
        for _ in 0..10 {
            let stats_clone = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats_clone.record_hit();
                }
                for _ in 0..50 {
                    stats_clone.record_miss();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.hits(), 1000);
        assert_eq!(stats.misses(), 500);
        assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
    }

    #[test]
    fn test_latency_average() {
        let latency = LatencyStats::new();
        assert_eq!(latency.average_micros(), 0.0);
        latency.record(Duration::from_micros(10));
        latency.record(Duration::from_micros(20));
        latency.record(Duration::from_micros(30));
        assert!((latency.average_micros() - 20.0).abs() < f64::EPSILON);
        latency.reset();
        assert_eq!(latency.samples(), 0);
    }
}
