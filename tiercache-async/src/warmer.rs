use crate::engine::CacheEngine;
use crate::fetcher::{Fetcher, KeyGenerator};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tiercache_core::{CacheError, Result, SetOptions};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Order in which strategies run during a sweep.
///
/// Priority decides scheduling order only; a running strategy is never
/// interrupted for a higher-priority one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmingPriority {
    High,
    Normal,
    Low,
}

impl Default for WarmingPriority {
    fn default() -> Self {
        WarmingPriority::Normal
    }
}

/// A named recipe for filling the cache ahead of demand.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use std::time::Duration;
/// use tiercache_async::{KeyList, WarmingPriority, WarmingStrategy};
/// use tiercache_core::FetchError;
///
/// let strategy = WarmingStrategy::new(
///     "popular-users",
///     KeyList(vec!["user:1".into(), "user:2".into()]),
///     |key: String| async move { Ok::<_, FetchError>(Bytes::from(key)) },
/// )
/// .with_priority(WarmingPriority::High)
/// .with_ttl(Duration::from_secs(300))
/// .with_batch_size(50);
///
/// assert_eq!(strategy.name(), "popular-users");
/// ```
#[derive(Clone)]
pub struct WarmingStrategy {
    name: String,
    priority: WarmingPriority,
    key_generator: Arc<dyn KeyGenerator>,
    fetcher: Arc<dyn Fetcher>,
    ttl: Option<Duration>,
    batch_size: usize,
    tags: Vec<String>,
    interval: Option<Duration>,
}

impl WarmingStrategy {
    pub fn new(
        name: impl Into<String>,
        key_generator: impl KeyGenerator + 'static,
        fetcher: impl Fetcher + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            priority: WarmingPriority::Normal,
            key_generator: Arc::new(key_generator),
            fetcher: Arc::new(fetcher),
            ttl: None,
            batch_size: 100,
            tags: Vec::new(),
            interval: None,
        }
    }

    pub fn with_priority(mut self, priority: WarmingPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Re-runs the strategy every `interval` once the warmer is started.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> WarmingPriority {
        self.priority
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    fn options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl,
            tags: self.tags.clone(),
            ..SetOptions::default()
        }
    }
}

impl fmt::Debug for WarmingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingStrategy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("ttl", &self.ttl)
            .field("batch_size", &self.batch_size)
            .field("tags", &self.tags)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Outcome of one strategy run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub strategy: String,
    pub candidates: usize,
    pub warmed: usize,
    pub failed: usize,
    /// Set when the run was skipped because the strategy was already running.
    pub skipped: bool,
}

/// Runs warming strategies against an engine.
///
/// Warming is best effort: a failing fetch is logged and the run moves on.
pub struct CacheWarmer {
    engine: Arc<CacheEngine>,
    strategies: RwLock<HashMap<String, WarmingStrategy>>,
    running: Mutex<HashSet<String>>,
    schedules: Mutex<Vec<JoinHandle<()>>>,
    enabled: bool,
    concurrency: usize,
}

/// Marks a strategy as running until dropped.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        if !running.lock().insert(name.to_string()) {
            return None;
        }
        Some(Self {
            running,
            name: name.to_string(),
        })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.name);
    }
}

impl CacheWarmer {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        let enabled = engine.config().warming_enabled;
        let concurrency = engine.config().warming_concurrency.max(1);
        Self {
            engine,
            strategies: RwLock::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            schedules: Mutex::new(Vec::new()),
            enabled,
            concurrency,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers `strategy`, returning the one it replaced.
    pub fn add_strategy(&self, strategy: WarmingStrategy) -> Option<WarmingStrategy> {
        debug!(strategy = %strategy.name, priority = ?strategy.priority, "warming strategy registered");
        self.strategies
            .write()
            .insert(strategy.name.clone(), strategy)
    }

    pub fn remove_strategy(&self, name: &str) -> bool {
        self.strategies.write().remove(name).is_some()
    }

    /// Registered strategy names, highest priority first.
    pub fn strategy_names(&self) -> Vec<String> {
        let strategies = self.strategies.read();
        let mut ordered: Vec<&WarmingStrategy> = strategies.values().collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        ordered.into_iter().map(|s| s.name.clone()).collect()
    }

    /// Runs one strategy now.
    ///
    /// Keys come from the strategy's generator and are fetched in batches of
    /// `batch_size`, up to `warming_concurrency` at a time. Each fetched value
    /// is written through every layer with the strategy's TTL and tags.
    ///
    /// # Errors
    ///
    /// `UnknownStrategy` if no strategy has that name; `Fetch` if the key
    /// generator fails. Per-key fetch failures are counted, not returned.
    pub async fn warm_strategy(&self, name: &str) -> Result<WarmReport> {
        let strategy = self
            .strategies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownStrategy(name.to_string()))?;

        let Some(_guard) = RunGuard::acquire(&self.running, name) else {
            debug!(strategy = name, "already running, skipping");
            return Ok(WarmReport {
                strategy: name.to_string(),
                skipped: true,
                ..WarmReport::default()
            });
        };

        let started = Instant::now();
        let keys = strategy.key_generator.generate().await?;
        let options = strategy.options();
        let mut report = WarmReport {
            strategy: name.to_string(),
            candidates: keys.len(),
            ..WarmReport::default()
        };

        for batch in keys.chunks(strategy.batch_size) {
            let pending: Vec<_> = batch
                .iter()
                .map(|key| self.warm_key(&strategy, key.as_str(), &options))
                .collect();
            let outcomes: Vec<bool> = stream::iter(pending)
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            let warmed = outcomes.iter().filter(|ok| **ok).count();
            report.warmed += warmed;
            report.failed += outcomes.len() - warmed;
        }

        self.engine.stats().record_warmed(report.warmed as u64);
        info!(
            strategy = name,
            candidates = report.candidates,
            warmed = report.warmed,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warming run finished"
        );
        Ok(report)
    }

    async fn warm_key(&self, strategy: &WarmingStrategy, key: &str, options: &SetOptions) -> bool {
        let fetched = strategy.fetcher.fetch(key).await;
        self.engine.stats().record_fetch(fetched.is_err());
        match fetched {
            Ok(value) => self.engine.set(key, value, options).await,
            Err(err) => {
                warn!(strategy = %strategy.name, key, error = %err, "warming fetch failed, skipping key");
                false
            }
        }
    }

    /// Runs every strategy once, highest priority first.
    ///
    /// Does nothing when warming is disabled. Strategy failures are logged
    /// and the sweep continues.
    pub async fn warm_all(&self) -> Vec<WarmReport> {
        if !self.enabled {
            debug!("warming disabled, sweep skipped");
            return Vec::new();
        }
        let mut reports = Vec::new();
        for name in self.strategy_names() {
            match self.warm_strategy(&name).await {
                Ok(report) => reports.push(report),
                Err(err) => warn!(strategy = %name, error = %err, "warming strategy failed"),
            }
        }
        reports
    }

    /// Starts a background loop for every strategy that has an interval.
    ///
    /// Each loop waits its interval (plus up to 10% jitter) between runs and
    /// ends when its strategy is removed or the warmer is dropped. Returns
    /// the number of loops started.
    pub fn start_schedules(self: &Arc<Self>) -> usize {
        if !self.enabled {
            return 0;
        }
        let scheduled: Vec<(String, Duration)> = self
            .strategies
            .read()
            .values()
            .filter_map(|s| s.interval.map(|interval| (s.name.clone(), interval)))
            .collect();

        let mut schedules = self.schedules.lock();
        for (name, interval) in &scheduled {
            let warmer = Arc::downgrade(self);
            let name = name.clone();
            let interval = *interval;
            schedules.push(tokio::spawn(run_schedule(warmer, name, interval)));
        }
        debug!(loops = scheduled.len(), "warming schedules started");
        scheduled.len()
    }

    /// Stops every scheduled loop. In-flight runs are cancelled.
    pub fn stop(&self) {
        for handle in self.schedules.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for CacheWarmer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_schedule(warmer: Weak<CacheWarmer>, name: String, interval: Duration) {
    loop {
        let jitter_ms = fastrand::u64(0..=(interval.as_millis() as u64 / 10));
        tokio::time::sleep(interval + Duration::from_millis(jitter_ms)).await;

        let Some(warmer) = warmer.upgrade() else { break };
        match warmer.warm_strategy(&name).await {
            Ok(_) => {}
            Err(CacheError::UnknownStrategy(_)) => {
                debug!(strategy = %name, "strategy removed, schedule ends");
                break;
            }
            Err(err) => warn!(strategy = %name, error = %err, "scheduled warming failed"),
        }
    }
}
