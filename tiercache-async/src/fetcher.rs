use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use tiercache_core::FetchError;

/// Loads the authoritative value for a key from the origin.
///
/// Used for fetch-on-miss, warming and prefetch. Implementations must be
/// idempotent and must not touch the cache themselves.
///
/// Any `Fn(String) -> impl Future<Output = Result<Bytes, FetchError>>`
/// closure is a fetcher:
///
/// ```
/// use bytes::Bytes;
/// use tiercache_async::Fetcher;
/// use tiercache_core::FetchError;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let fetcher = |key: String| async move {
///     Ok::<_, FetchError>(Bytes::from(format!("value-of-{key}")))
/// };
/// assert_eq!(fetcher.fetch("a").await.unwrap(), Bytes::from("value-of-a"));
/// # }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<F, Fut> Fetcher for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, FetchError>> + Send + 'static,
{
    async fn fetch(&self, key: &str) -> Result<Bytes, FetchError> {
        (self)(key.to_string()).await
    }
}

/// Produces the candidate keys of a warming strategy. May perform I/O.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(&self) -> Result<Vec<String>, FetchError>;
}

#[async_trait]
impl<F, Fut> KeyGenerator for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<String>, FetchError>> + Send + 'static,
{
    async fn generate(&self) -> Result<Vec<String>, FetchError> {
        (self)().await
    }
}

/// A fixed list of keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyList(pub Vec<String>);

impl<S: Into<String>> FromIterator<S> for KeyList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        KeyList(iter.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl KeyGenerator for KeyList {
    async fn generate(&self) -> Result<Vec<String>, FetchError> {
        Ok(self.0.clone())
    }
}
