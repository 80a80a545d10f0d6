use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Collapses concurrent loads of the same key into one.
///
/// The first caller for a key runs the load; callers arriving while it is in
/// flight wait for the same outcome instead of starting their own. Once the
/// load finishes the slot is released, so a later call loads again.
///
/// If the running caller is cancelled, one of the waiters takes over the load.
///
/// # Examples
///
/// ```
/// use tiercache_async::SingleFlight;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights: SingleFlight<u32> = SingleFlight::new();
/// let (value, led) = flights.run("answer", || async { 42 }).await;
/// assert_eq!(value, 42);
/// assert!(led);
/// assert_eq!(flights.in_flight(), 0);
/// # }
/// ```
pub struct SingleFlight<T> {
    calls: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `load` unless a load for `key` is already in flight.
    ///
    /// Returns the outcome and whether this caller was the one that ran it.
    pub async fn run<F, Fut>(&self, key: &str, load: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = self
            .calls
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut led = false;
        let value = cell
            .get_or_init(|| {
                led = true;
                load()
            })
            .await
            .clone();

        self.calls.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        (value, led)
    }

    /// Keys with a load currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
