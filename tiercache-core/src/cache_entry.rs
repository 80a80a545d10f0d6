use bytes::Bytes;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A cached value together with the metadata every tier tracks for it.
///
/// Entries are created by a write or by a successful fetch-on-miss, mutated
/// on every access (`hit_count`, `last_accessed`) and destroyed by TTL
/// expiry, explicit invalidation or capacity eviction.
///
/// # Fields
///
/// * `key` - The cache key
/// * `value` - The (uncompressed) value bytes
/// * `created_at` - When the entry was written
/// * `expires_at` - When the entry stops being served (`None` = never)
/// * `tags` - Labels for group invalidation
/// * `dependencies` - Upstream resources this value derives from
/// * `size_bytes` - Key plus value length
/// * `compressed` - Whether the distributed copy is stored compressed
/// * `hit_count` - Number of hits served (LFU bookkeeping)
/// * `last_accessed` - Last hit or write
///
/// # Examples
///
/// ```
/// use tiercache_core::CacheEntry;
/// use std::time::Duration;
///
/// let entry = CacheEntry::new("user:1", "{\"name\":\"A\"}", Some(Duration::from_secs(60)))
///     .with_tags(["user"]);
///
/// assert_eq!(entry.hit_count, 0);
/// assert!(entry.tags.contains("user"));
/// assert!(!entry.is_expired());
/// ```
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub tags: HashSet<String>,
    pub dependencies: HashSet<String>,
    pub size_bytes: usize,
    pub compressed: bool,
    pub hit_count: u64,
    pub last_accessed: Instant,
}

impl CacheEntry {
    /// Creates an entry stamped with the current instant.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The value to cache
    /// * `ttl` - Optional time-to-live. `None` means the entry never expires,
    ///   and so does a TTL too large for `Instant` to represent.
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        let key = key.into();
        let value = value.into();
        let now = Instant::now();
        Self {
            size_bytes: key.len() + value.len(),
            key,
            value,
            created_at: now,
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            tags: HashSet::new(),
            dependencies: HashSet::new(),
            compressed: false,
            hit_count: 0,
            last_accessed: now,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true once `now` has reached the expiry instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry, `None` for entries without a TTL.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }

    /// Records a hit: bumps `hit_count` and refreshes `last_accessed`.
    ///
    /// ```
    /// use tiercache_core::CacheEntry;
    /// use std::time::Instant;
    ///
    /// let mut entry = CacheEntry::new("k", "v", None);
    /// entry.touch(Instant::now());
    /// entry.touch(Instant::now());
    /// assert_eq!(entry.hit_count, 2);
    /// ```
    pub fn touch(&mut self, now: Instant) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_accessed = now;
    }

    /// Moves the expiry to no later than `now + cap`.
    ///
    /// In-process layers hold entries for a bounded time even when the
    /// authoritative copy lives longer. A cap past what `Instant` can
    /// represent leaves the expiry as it is.
    pub fn cap_ttl(&mut self, cap: Duration) {
        let Some(limit) = Instant::now().checked_add(cap) else {
            return;
        };
        self.expires_at = Some(match self.expires_at {
            Some(expires_at) if expires_at < limit => expires_at,
            _ => limit,
        });
    }
}

/// Options accepted by a cache write.
///
/// ```
/// use tiercache_core::SetOptions;
/// use std::time::Duration;
///
/// let opts = SetOptions::new()
///     .ttl(Duration::from_secs(60))
///     .tags(["user", "profile"])
///     .dependencies(["db:users"]);
///
/// assert_eq!(opts.ttl, Some(Duration::from_secs(60)));
/// assert_eq!(opts.tags.len(), 2);
/// assert_eq!(opts.compress, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time-to-live; the configured default applies when absent.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    /// `Some(true)` forces compression, `Some(false)` forbids it, `None`
    /// compresses above the configured threshold.
    pub compress: Option<bool>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Builds the entry this write would install, using `default_ttl` when
    /// the options carry none.
    pub fn to_entry(&self, key: &str, value: Bytes, default_ttl: Duration) -> CacheEntry {
        CacheEntry::new(key, value, Some(self.ttl.unwrap_or(default_ttl)))
            .with_tags(self.tags.iter().cloned())
            .with_dependencies(self.dependencies.iter().cloned())
    }
}
