//! # Cache Invalidation Index
//!
//! Inverted indices that let a whole group of keys be invalidated at once.
//!
//! - **Tag index**: tag → keys carrying that tag
//! - **Dependency index**: upstream resource → keys that declared it directly
//! - **Key metadata**: key → its own tags and dependencies, so a key can be
//!   stripped from every set that references it without scanning
//! - **Tombstones**: keys whose distributed copy could not be deleted and
//!   must be ignored until a later write or delete succeeds
//!
//! The index is a plain data structure. Callers own the lock around it and
//! mutate an entry and its memberships in the same critical section.
//!
//! # Examples
//!
//! ```rust
//! use tiercache_core::invalidation::InvalidationIndex;
//! use tiercache_core::CacheEntry;
//!
//! let mut index = InvalidationIndex::new();
//! index.record_entry(&CacheEntry::new("user:1", "A", None).with_tags(["user"]));
//! index.record_entry(&CacheEntry::new("user:2", "B", None).with_tags(["user", "admin"]));
//!
//! assert_eq!(index.keys_for_tag("user"), vec!["user:1", "user:2"]);
//!
//! index.forget("user:2");
//! assert_eq!(index.keys_for_tag("admin"), Vec::<String>::new());
//! assert!(index.is_consistent());
//! ```

use crate::utils::unix_millis;
use crate::CacheEntry;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// What an invalidation call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationStrategy {
    /// A single key
    Key(String),
    /// Every key carrying the tag
    Tag(String),
    /// Every known key matching the regular expression
    Pattern(String),
    /// Every key that declared the dependency directly
    Dependency(String),
}

#[derive(Debug, Clone, Default)]
struct KeyMeta {
    tags: HashSet<String>,
    dependencies: HashSet<String>,
    expires_at: Option<Instant>,
}

impl KeyMeta {
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// A key whose distributed copy could not be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    /// Epoch of the invalidation whose delete failed.
    pub epoch: u64,
    /// Wall-clock time of that invalidation. Remote records written after
    /// it are newer than the invalidated value.
    pub at_ms: u64,
}

/// Tag, dependency and tombstone bookkeeping for every key this process knows.
#[derive(Debug, Default)]
pub struct InvalidationIndex {
    /// Map from tag to the keys carrying it
    tag_to_keys: HashMap<String, HashSet<String>>,
    /// Map from dependency to its direct dependents
    dependency_to_keys: HashMap<String, HashSet<String>>,
    /// Map from key to its memberships
    key_metadata: HashMap<String, KeyMeta>,
    /// Keys whose distributed copy is stale, with the epoch of the failed delete
    tombstones: HashMap<String, Tombstone>,
}

impl InvalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the memberships of `entry`, replacing whatever the key had.
    pub fn record_entry(&mut self, entry: &CacheEntry) {
        self.record(
            &entry.key,
            entry.tags.iter().cloned().collect(),
            entry.dependencies.iter().cloned().collect(),
            entry.expires_at,
        );
    }

    /// Records `key` with the given memberships.
    ///
    /// Memberships the key held before and does not hold now are removed, so
    /// a rewrite that drops a tag leaves no stale reference behind.
    pub fn record(
        &mut self,
        key: &str,
        tags: HashSet<String>,
        dependencies: HashSet<String>,
        expires_at: Option<Instant>,
    ) {
        self.forget(key);

        for tag in &tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        for dependency in &dependencies {
            self.dependency_to_keys
                .entry(dependency.clone())
                .or_default()
                .insert(key.to_string());
        }

        self.key_metadata.insert(
            key.to_string(),
            KeyMeta {
                tags,
                dependencies,
                expires_at,
            },
        );
    }

    /// Strips `key` from every tag and dependency set. Empty sets are dropped.
    ///
    /// Returns `false` if the key was not indexed.
    pub fn forget(&mut self, key: &str) -> bool {
        let Some(meta) = self.key_metadata.remove(key) else {
            return false;
        };
        detach(&mut self.tag_to_keys, &meta.tags, key);
        detach(&mut self.dependency_to_keys, &meta.dependencies, key);
        true
    }

    /// Unexpired members of `tag`, sorted.
    ///
    /// Expired members stay in the set until [`purge_expired`](Self::purge_expired)
    /// runs but are never selected.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.live_sorted(self.tag_to_keys.get(tag))
    }

    /// Unexpired direct dependents of `dependency`, sorted.
    pub fn dependents_of(&self, dependency: &str) -> Vec<String> {
        self.live_sorted(self.dependency_to_keys.get(dependency))
    }

    fn live_sorted(&self, keys: Option<&HashSet<String>>) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = keys
            .into_iter()
            .flatten()
            .filter(|key| {
                self.key_metadata
                    .get(key.as_str())
                    .map_or(true, |meta| !meta.is_expired_at(now))
            })
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn tags_of(&self, key: &str) -> Option<HashSet<String>> {
        self.key_metadata.get(key).map(|meta| meta.tags.clone())
    }

    pub fn dependencies_of(&self, key: &str) -> Option<HashSet<String>> {
        self.key_metadata.get(key).map(|meta| meta.dependencies.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_metadata.contains_key(key)
    }

    /// Every indexed key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.key_metadata.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn keys_matching(&self, pattern: &Regex) -> Vec<String> {
        let mut keys: Vec<String> = self
            .key_metadata
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.key_metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_metadata.is_empty()
    }

    /// Forgets every key whose recorded expiry has passed and returns them.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .key_metadata
            .iter()
            .filter(|(_, meta)| meta.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.forget(key);
        }
        expired
    }

    /// Forgets `key` if its recorded expiry has passed.
    pub fn forget_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self
            .key_metadata
            .get(key)
            .map_or(false, |meta| meta.is_expired_at(now));
        expired && self.forget(key)
    }

    /// Marks the distributed copy of `key` as stale as of `epoch`.
    pub fn tombstone(&mut self, key: &str, epoch: u64) {
        let tombstone = Tombstone {
            epoch,
            at_ms: unix_millis(),
        };
        self.tombstones.insert(key.to_string(), tombstone);
    }

    pub fn clear_tombstone(&mut self, key: &str) -> bool {
        self.tombstones.remove(key).is_some()
    }

    /// Clears the tombstone only if it still belongs to `epoch`; a newer
    /// invalidation keeps its own.
    pub fn clear_tombstone_if(&mut self, key: &str, epoch: u64) -> bool {
        if self.tombstones.get(key).map(|t| t.epoch) == Some(epoch) {
            self.tombstones.remove(key);
            true
        } else {
            false
        }
    }

    pub fn is_tombstoned(&self, key: &str) -> bool {
        self.tombstones.contains_key(key)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Every tombstoned key, sorted by key.
    pub fn tombstones(&self) -> Vec<(String, Tombstone)> {
        let mut tombstones: Vec<(String, Tombstone)> = self
            .tombstones
            .iter()
            .map(|(key, tombstone)| (key.clone(), *tombstone))
            .collect();
        tombstones.sort_by(|a, b| a.0.cmp(&b.0));
        tombstones
    }

    /// Checks `k ∈ tags[t] ⇔ t ∈ meta(k).tags`, and the same for dependencies.
    pub fn is_consistent(&self) -> bool {
        self.mirrors(&self.tag_to_keys, |meta| &meta.tags)
            && self.mirrors(&self.dependency_to_keys, |meta| &meta.dependencies)
    }

    fn mirrors(
        &self,
        map: &HashMap<String, HashSet<String>>,
        pick: fn(&KeyMeta) -> &HashSet<String>,
    ) -> bool {
        let forward = map.iter().all(|(label, keys)| {
            !keys.is_empty()
                && keys.iter().all(|key| {
                    self.key_metadata
                        .get(key)
                        .map_or(false, |meta| pick(meta).contains(label))
                })
        });
        let backward = self.key_metadata.iter().all(|(key, meta)| {
            pick(meta)
                .iter()
                .all(|label| map.get(label).map_or(false, |keys| keys.contains(key)))
        });
        forward && backward
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.dependency_to_keys.clear();
        self.key_metadata.clear();
        self.tombstones.clear();
    }
}

fn detach(map: &mut HashMap<String, HashSet<String>>, labels: &HashSet<String>, key: &str) {
    for label in labels {
        if let Some(keys) = map.get_mut(label) {
            keys.remove(key);
            if keys.is_empty() {
                map.remove(label);
            }
        }
    }
}
