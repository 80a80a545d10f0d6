use crate::background::{BackgroundPool, Job};
use crate::engine::CacheEngine;
use crate::fetcher::Fetcher;
use dashmap::DashSet;
use parking_lot::RwLock;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tiercache_core::{CacheError, Result, SetOptions};
use tracing::{debug, trace};

type Predictor = dyn Fn(&str) -> Vec<String> + Send + Sync;

/// Predicts which keys are likely to be read after a key matching `pattern`.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use tiercache_async::PrefetchRule;
/// use tiercache_core::FetchError;
///
/// let rule = PrefetchRule::new(
///     r"^pitch:(\d+)$",
///     0.8,
///     |key: &str| vec![format!("{key}:related")],
///     |key: String| async move { Ok::<_, FetchError>(Bytes::from(key)) },
/// )
/// .unwrap();
///
/// assert!(rule.matches("pitch:5"));
/// assert!(!rule.matches("pitch:5:related"));
/// ```
#[derive(Clone)]
pub struct PrefetchRule {
    pattern: Regex,
    probability: f64,
    predictor: Arc<Predictor>,
    fetcher: Arc<dyn Fetcher>,
    options: SetOptions,
}

impl PrefetchRule {
    /// # Errors
    ///
    /// `InvalidPattern` if `pattern` is not a valid regex, `InvalidConfig` if
    /// `probability` lies outside `[0, 1]`.
    pub fn new(
        pattern: &str,
        probability: f64,
        predictor: impl Fn(&str) -> Vec<String> + Send + Sync + 'static,
        fetcher: impl Fetcher + 'static,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(CacheError::InvalidConfig(format!(
                "prefetch probability must be within [0, 1], got {probability}"
            )));
        }
        Ok(Self {
            pattern: Regex::new(pattern)?,
            probability,
            predictor: Arc::new(predictor),
            fetcher: Arc::new(fetcher),
            options: SetOptions::default(),
        })
    }

    /// Write options used for prefetched values.
    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn matches(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn predict(&self, key: &str) -> Vec<String> {
        (self.predictor)(key)
    }
}

impl fmt::Debug for PrefetchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchRule")
            .field("pattern", &self.pattern.as_str())
            .field("probability", &self.probability)
            .finish_non_exhaustive()
    }
}

/// Keeps a key in the pending set until the job that owns it ends.
struct PendingGuard {
    pending: Arc<DashSet<String>>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

/// Schedules background fetches for keys predicted from the current access.
///
/// Prefetching never delays the access that triggered it: predicted keys are
/// handed to a [`BackgroundPool`] and the call returns straight away. A key
/// already being prefetched is not scheduled again until that job ends.
pub struct PredictivePrefetcher {
    engine: Arc<CacheEngine>,
    rules: RwLock<Vec<PrefetchRule>>,
    pending: Arc<DashSet<String>>,
    pool: BackgroundPool,
    min_probability: f64,
}

impl PredictivePrefetcher {
    /// Builds a prefetcher using the engine's prefetch settings.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when called outside a Tokio runtime.
    pub fn new(engine: Arc<CacheEngine>) -> Result<Self> {
        let config = engine.config();
        let pool = BackgroundPool::new(
            "prefetch",
            config.prefetch_workers,
            config.prefetch_queue_capacity,
        )?;
        let min_probability = config.prefetch_min_probability;
        Ok(Self {
            engine,
            rules: RwLock::new(Vec::new()),
            pending: Arc::new(DashSet::new()),
            pool,
            min_probability,
        })
    }

    pub fn add_prefetch_rule(&self, rule: PrefetchRule) {
        debug!(pattern = rule.pattern.as_str(), probability = rule.probability, "prefetch rule added");
        self.rules.write().push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Keys with a prefetch queued or running.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Jobs dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.pool.dropped()
    }

    /// Schedules prefetches for the keys predicted from `key`.
    ///
    /// Only rules whose pattern matches `key` and whose probability exceeds
    /// the configured minimum fire. Predicted keys that are already cached
    /// locally, already pending, or equal to `key` itself are skipped.
    /// Returns the number of jobs scheduled.
    pub fn predictive_prefetch(&self, key: &str) -> usize {
        let planned: Vec<(String, Arc<dyn Fetcher>, SetOptions)> = {
            let rules = self.rules.read();
            rules
                .iter()
                .filter(|rule| rule.probability > self.min_probability && rule.matches(key))
                .flat_map(|rule| {
                    rule.predict(key)
                        .into_iter()
                        .map(move |target| (target, Arc::clone(&rule.fetcher), rule.options.clone()))
                })
                .collect()
        };

        let mut scheduled = 0;
        for (target, fetcher, options) in planned {
            if target == key || self.engine.is_cached_locally(&target) {
                continue;
            }
            if !self.pending.insert(target.clone()) {
                trace!(key = %target, "prefetch already pending");
                continue;
            }
            let guard = PendingGuard {
                pending: Arc::clone(&self.pending),
                key: target,
            };
            if self.pool.submit(prefetch_job(Arc::clone(&self.engine), fetcher, options, guard)) {
                scheduled += 1;
            }
        }
        if scheduled > 0 {
            debug!(trigger = key, scheduled, "prefetch scheduled");
        }
        scheduled
    }

    /// Stops accepting work and waits for queued prefetches to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn prefetch_job(
    engine: Arc<CacheEngine>,
    fetcher: Arc<dyn Fetcher>,
    options: SetOptions,
    guard: PendingGuard,
) -> Job {
    Box::pin(async move {
        let key = guard.key.clone();
        let _guard = guard;

        if engine.contains(&key).await {
            trace!(key, "prefetch target already cached");
            return Ok(());
        }
        let fetched = fetcher.fetch(&key).await;
        engine.stats().record_fetch(fetched.is_err());
        let value = fetched?;
        if engine.set(&key, value, &options).await {
            engine.stats().record_prefetched(1);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tiercache_core::{CacheConfig, FetchError};

    fn engine() -> Arc<CacheEngine> {
        let config = CacheConfig::default().with_shard_count(2);
        Arc::new(CacheEngine::new(config, Arc::new(MemoryStore::new(2))).unwrap())
    }

    fn related(key: &str) -> Vec<String> {
        vec![format!("{key}:related")]
    }

    #[test]
    fn test_rule_validation() {
        let fetch = |key: String| async move { Ok::<_, FetchError>(Bytes::from(key)) };
        assert!(matches!(
            PrefetchRule::new("(", 0.9, related, fetch),
            Err(CacheError::InvalidPattern(_))
        ));
        assert!(matches!(
            PrefetchRule::new(".*", 1.5, related, fetch),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_prefetch_runs_in_background() {
        let engine = engine();
        let prefetcher = PredictivePrefetcher::new(Arc::clone(&engine)).unwrap();
        let slow = |key: String| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, FetchError>(Bytes::from(format!("v:{key}")))
        };
        prefetcher.add_prefetch_rule(PrefetchRule::new(r"^pitch:(\d+)$", 0.9, related, slow).unwrap());

        assert_eq!(prefetcher.predictive_prefetch("pitch:5"), 1);
        assert!(!engine.contains("pitch:5:related").await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            engine.get("pitch:5:related").await.unwrap(),
            Bytes::from("v:pitch:5:related")
        );
        assert_eq!(engine.stats().prefetched(), 1);
        assert_eq!(prefetcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_low_probability_rule_does_not_fire() {
        let prefetcher = PredictivePrefetcher::new(engine()).unwrap();
        let fetch = |key: String| async move { Ok::<_, FetchError>(Bytes::from(key)) };
        // Must exceed the 0.5 default, not merely reach it
        prefetcher.add_prefetch_rule(PrefetchRule::new(".*", 0.5, related, fetch).unwrap());
        assert_eq!(prefetcher.predictive_prefetch("a"), 0);
    }

    #[tokio::test]
    async fn test_pending_targets_are_deduplicated() {
        let engine = engine();
        let prefetcher = PredictivePrefetcher::new(Arc::clone(&engine)).unwrap();
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);
        let fetch = move |key: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, FetchError>(Bytes::from(key))
            }
        };
        prefetcher.add_prefetch_rule(
            PrefetchRule::new("^item:", 0.9, |_: &str| vec!["shared".to_string()], fetch).unwrap(),
        );

        assert_eq!(prefetcher.predictive_prefetch("item:1"), 1);
        assert_eq!(prefetcher.predictive_prefetch("item:2"), 0);
        assert_eq!(prefetcher.pending_count(), 1);

        prefetcher.shutdown().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(prefetcher.pending_count(), 0);
        assert!(engine.contains("shared").await);
    }

    #[tokio::test]
    async fn test_cached_and_self_targets_are_skipped() {
        let engine = engine();
        let prefetcher = PredictivePrefetcher::new(Arc::clone(&engine)).unwrap();
        engine.set("b", "cached", &SetOptions::default()).await;
        let fetch = |key: String| async move { Ok::<_, FetchError>(Bytes::from(key)) };
        prefetcher.add_prefetch_rule(
            PrefetchRule::new("^a$", 0.9, |_: &str| vec!["a".into(), "b".into()], fetch).unwrap(),
        );
        assert_eq!(prefetcher.predictive_prefetch("a"), 0);
    }

    #[tokio::test]
    async fn test_failed_prefetch_is_dropped() {
        let engine = engine();
        let prefetcher = PredictivePrefetcher::new(Arc::clone(&engine)).unwrap();
        let failing = |key: String| async move { Err::<Bytes, _>(FetchError::new(key, "origin down")) };
        prefetcher.add_prefetch_rule(PrefetchRule::new(".*", 0.9, related, failing).unwrap());

        assert_eq!(prefetcher.predictive_prefetch("x"), 1);
        prefetcher.shutdown().await;
        assert!(!engine.contains("x:related").await);
        assert_eq!(engine.stats().fetch_errors(), 1);
        assert_eq!(prefetcher.pending_count(), 0);
    }
}
