use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

/// Maps a key to a shard in `[0, shard_count)`.
///
/// Routes on `xxh3_64` of the key bytes. Unlike `std`'s `DefaultHasher`, its
/// output is fixed across builds, so shard placement is too.
///
/// # Examples
///
/// ```
/// use tiercache_core::utils::shard_for_key;
///
/// let shard = shard_for_key("user:1", 16);
/// assert!(shard < 16);
/// assert_eq!(shard, shard_for_key("user:1", 16));
/// ```
///
/// # Panics
///
/// Panics if `shard_count` is zero; configuration validation rejects that.
#[inline]
pub fn shard_for_key(key: &str, shard_count: usize) -> usize {
    assert!(shard_count > 0, "shard_count must be positive");
    (xxh3_64(key.as_bytes()) % shard_count as u64) as usize
}

/// Milliseconds since the Unix epoch.
///
/// Expiry that crosses the process boundary (the distributed copy) is kept in
/// wall-clock time; in-process layers use `Instant`.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Wall-clock expiry for a TTL starting now.
pub fn expiry_millis(ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| {
        unix_millis().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    })
}

/// Converts a wall-clock expiry back to a monotonic deadline.
///
/// An expiry already in the past maps to `now`, which reads as expired.
/// `None` when the deadline lies beyond what `Instant` can represent; such an
/// entry never expires in practice.
pub fn instant_from_unix_millis(expires_at_ms: u64) -> Option<Instant> {
    let remaining = expires_at_ms.saturating_sub(unix_millis());
    Instant::now().checked_add(Duration::from_millis(remaining))
}
