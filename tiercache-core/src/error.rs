//! Error taxonomy shared by every tier.
//!
//! A cache miss is never an error: lookups return `Option::None`. The
//! variants here describe failures that are either propagated to the caller
//! (`Fetch`) or absorbed by the engine after logging (everything else).

use thiserror::Error;

/// Failure reported by a caller-supplied fetcher or key generator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fetch failed for `{key}`: {reason}")]
pub struct FetchError {
    /// Key (or strategy name, for key generators) the fetch was issued for.
    pub key: String,
    /// Human readable cause.
    pub reason: String,
}

impl FetchError {
    /// Creates a new fetch error for `key`.
    pub fn new(key: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors produced by the caching engine.
///
/// `CacheError` is `Clone` so that a single in-flight load can hand the same
/// outcome to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The origin fetcher failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The distributed layer was unreachable or timed out.
    #[error("distributed store unavailable on shard {shard}: {reason}")]
    StoreUnavailable { shard: usize, reason: String },

    /// Compression, decompression or value (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An in-process layer holds more entries than its capacity allows.
    #[error("{layer} holds {len} entries, capacity is {capacity}")]
    CapacityViolation {
        layer: &'static str,
        len: usize,
        capacity: usize,
    },

    /// Configuration rejected by [`CacheConfig::validate`](crate::CacheConfig::validate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No warming strategy is registered under this name.
    #[error("unknown warming strategy `{0}`")]
    UnknownStrategy(String),

    /// A key pattern failed to compile.
    #[error("invalid key pattern: {0}")]
    InvalidPattern(String),
}

impl From<regex::Error> for CacheError {
    fn from(err: regex::Error) -> Self {
        CacheError::InvalidPattern(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        CacheError::InvalidConfig(err.to_string())
    }
}

/// Result type used throughout tiercache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::new("user:1", "connection reset");
        assert_eq!(err.to_string(), "fetch failed for `user:1`: connection reset");

        let wrapped: CacheError = err.clone().into();
        assert_eq!(wrapped, CacheError::Fetch(err));
    }

    #[test]
    fn test_store_unavailable_display() {
        let unavailable = CacheError::StoreUnavailable {
            shard: 3,
            reason: "timed out".to_string(),
        };
        assert_eq!(unavailable.to_string(), "distributed store unavailable on shard 3: timed out");
    }

    #[test]
    fn test_regex_error_conversion() {
        let err: CacheError = regex::Regex::new("(unclosed").unwrap_err().into();
        assert!(matches!(err, CacheError::InvalidPattern(_)));
    }
}
