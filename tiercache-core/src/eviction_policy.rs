use serde::Serialize;
use std::fmt;

/// Policy used by an in-process layer to pick a victim when it is full.
///
/// # Variants
///
/// * `LFU` - **Least Frequently Used**, used by the hot layer
///   - The entry with the lowest hit count is evicted
///   - Ties are broken by the oldest `last_accessed`
///   - O(1) per operation via frequency buckets
///
/// * `LRU` - **Least Recently Used**, used by the standard layer
///   - The least recently accessed entry is evicted
///   - A hit moves the entry to the most recent position
///   - O(1) per operation via an index-linked list
///
/// # Examples
///
/// ```
/// use tiercache_core::{EvictionPolicy, Layer};
///
/// assert_eq!(Layer::Hot.eviction_policy(), Some(EvictionPolicy::LFU));
/// assert_eq!(Layer::Standard.eviction_policy(), Some(EvictionPolicy::LRU));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EvictionPolicy {
    LFU,
    LRU,
}

/// The three tiers a lookup walks through, top to bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Layer {
    /// L1: small, frequency-evicted, short TTL.
    Hot,
    /// L2: larger, recency-evicted, medium TTL.
    Standard,
    /// Sharded store behind a network boundary.
    Distributed,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Hot, Layer::Standard, Layer::Distributed];

    pub fn name(self) -> &'static str {
        match self {
            Layer::Hot => "hot",
            Layer::Standard => "standard",
            Layer::Distributed => "distributed",
        }
    }

    /// Capacity eviction policy, `None` for the distributed layer which only
    /// expires entries.
    pub fn eviction_policy(self) -> Option<EvictionPolicy> {
        match self {
            Layer::Hot => Some(EvictionPolicy::LFU),
            Layer::Standard => Some(EvictionPolicy::LRU),
            Layer::Distributed => None,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
