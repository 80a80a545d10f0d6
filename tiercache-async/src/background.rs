use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiercache_core::{CacheError, Result};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A detached unit of background work. Its error is logged and dropped.
pub type Job = BoxFuture<'static, Result<()>>;

/// Fixed set of workers draining a bounded job queue.
///
/// [`submit`](Self::submit) never waits: when the queue is full the job is
/// dropped and counted. Each job runs in its own task so a panicking job
/// only loses itself.
pub struct BackgroundPool {
    name: &'static str,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl BackgroundPool {
    /// Starts `workers` workers on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when called outside a Tokio runtime.
    pub fn new(name: &'static str, workers: usize, queue_capacity: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|err| {
            CacheError::InvalidConfig(format!("{name} pool needs a Tokio runtime: {err}"))
        })?;

        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(PoolCounters::default());

        let workers = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let counters = Arc::clone(&counters);
                handle.spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else { break };
                        match tokio::spawn(job).await {
                            Ok(Ok(())) => {
                                counters.completed.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Err(err)) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                warn!(pool = name, worker, error = %err, "background job failed");
                            }
                            Err(err) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                warn!(pool = name, worker, error = %err, "background job panicked");
                            }
                        }
                    }
                    debug!(pool = name, worker, "worker stopped");
                })
            })
            .collect();

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    /// Queues `job`. Returns `false` if it was dropped (queue full or pool
    /// shut down).
    pub fn submit(&self, job: Job) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(pool = self.name, "queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stops accepting jobs, lets the workers drain the queue and waits for
    /// them to exit.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(pool = self.name, error = %err, "worker ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        for worker in self.workers.get_mut().drain(..) {
            worker.abort();
        }
    }
}
