use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::capability::Request;
use crate::error::CacheError;
use crate::provider::HybridCacheProvider;

/// Requests slower than this are logged as warnings.
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(3);

/// A step of the request pipeline: the innermost business handler or a
/// decorator around the next step.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync {
    type Error: From<CacheError> + Send + 'static;

    async fn handle(&self, request: &R) -> Result<R::Response, Self::Error>;
}

#[async_trait]
impl<R, H> RequestHandler<R> for Arc<H>
where
    R: Request,
    H: RequestHandler<R> + ?Sized,
{
    type Error = H::Error;

    async fn handle(&self, request: &R) -> Result<R::Response, Self::Error> {
        (**self).handle(request).await
    }
}

/// Serves cacheable requests from the cache, running the next step only on
/// a miss. Requests without a cache capability pass straight through.
pub struct CachingBehavior<H> {
    inner: H,
    cache: Arc<HybridCacheProvider>,
}

impl<H> CachingBehavior<H> {
    pub fn new(inner: H, cache: Arc<HybridCacheProvider>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<R, H> RequestHandler<R> for CachingBehavior<H>
where
    R: Request,
    H: RequestHandler<R>,
{
    type Error = H::Error;

    async fn handle(&self, request: &R) -> Result<R::Response, Self::Error> {
        let (key, policy) = if let Some(locked) = request.as_lock_protected() {
            (locked.cache_key(), locked.locked_policy())
        } else if let Some(cacheable) = request.as_cacheable() {
            (cacheable.cache_key(), cacheable.cache_policy())
        } else {
            return self.inner.handle(request).await;
        };

        tracing::debug!(request = request.name(), key = %key, "cacheable request");
        self.cache
            .get_or_set(&key, || self.inner.handle(request), &policy)
            .await
    }
}

/// Runs the next step, then evicts the request's invalidation key.
///
/// Eviction happens only after the next step succeeds; a failed mutation
/// leaves the cached entry in place.
pub struct InvalidateCachingBehavior<H> {
    inner: H,
    cache: Arc<HybridCacheProvider>,
}

impl<H> InvalidateCachingBehavior<H> {
    pub fn new(inner: H, cache: Arc<HybridCacheProvider>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<R, H> RequestHandler<R> for InvalidateCachingBehavior<H>
where
    R: Request,
    H: RequestHandler<R>,
{
    type Error = H::Error;

    async fn handle(&self, request: &R) -> Result<R::Response, Self::Error> {
        let response = self.inner.handle(request).await?;
        if let Some(invalidating) = request.as_invalidating() {
            let key = invalidating.invalidation_key();
            self.cache.remove(&key).await?;
            tracing::debug!(request = request.name(), key = %key, "cache invalidated");
        }
        Ok(response)
    }
}

/// Logs request start and completion with elapsed time.
pub struct LoggingBehavior<H> {
    inner: H,
}

impl<H> LoggingBehavior<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R, H> RequestHandler<R> for LoggingBehavior<H>
where
    R: Request,
    H: RequestHandler<R>,
    H::Error: std::fmt::Display,
{
    type Error = H::Error;

    async fn handle(&self, request: &R) -> Result<R::Response, Self::Error> {
        let name = request.name();
        tracing::info!(request = name, "handling request");
        let started = Instant::now();
        let result = self.inner.handle(request).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match &result {
            Ok(_) if elapsed > SLOW_REQUEST_THRESHOLD => {
                tracing::warn!(request = name, elapsed_ms, "slow request");
            }
            Ok(_) => tracing::info!(request = name, elapsed_ms, "handled request"),
            Err(e) => tracing::warn!(request = name, elapsed_ms, error = %e, "request failed"),
        }
        result
    }
}

/// Pipeline in the fixed order logging → cache read → handler → invalidation.
pub type StandardPipeline<H> = LoggingBehavior<CachingBehavior<InvalidateCachingBehavior<H>>>;

pub fn standard_pipeline<H>(handler: H, cache: Arc<HybridCacheProvider>) -> StandardPipeline<H> {
    LoggingBehavior::new(CachingBehavior::new(
        InvalidateCachingBehavior::new(handler, Arc::clone(&cache)),
        cache,
    ))
}
