//! Rate-limited embedder wrapper.
//!
//! Wraps any Embedder implementation with rate limiting using the governor crate.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::{ConsolidationError, Result};
use crate::traits::embedder::Embedder;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// An embedder wrapper that enforces a request rate.
///
/// Every call to the provider waits for a permit, including each item of
/// `embed_batch`.
pub struct RateLimitedEmbedder<E: Embedder> {
    inner: E,
    limiter: Arc<DefaultRateLimiter>,
}

impl<E: Embedder> RateLimitedEmbedder<E> {
    /// Create a new rate-limited embedder.
    ///
    /// # Arguments
    /// * `embedder` - The underlying embedder to wrap
    /// * `requests_per_second` - Maximum requests per second
    pub fn new(embedder: E, requests_per_second: u32) -> Result<Self> {
        let quota = Quota::per_second(non_zero(requests_per_second, "requests_per_second")?);
        Ok(Self::with_quota(embedder, quota))
    }

    /// Create with a custom quota.
    pub fn with_quota(embedder: E, quota: Quota) -> Self {
        Self {
            inner: embedder,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Create with burst support.
    pub fn with_burst(embedder: E, requests_per_second: u32, burst: u32) -> Result<Self> {
        let quota = Quota::per_second(non_zero(requests_per_second, "requests_per_second")?)
            .allow_burst(non_zero(burst, "burst")?);
        Ok(Self::with_quota(embedder, quota))
    }

    /// Access the wrapped embedder.
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

fn non_zero(value: u32, name: &str) -> Result<NonZeroU32> {
    NonZeroU32::new(value).ok_or_else(|| ConsolidationError::Config(format!("{} must be > 0", name)))
}

#[async_trait]
impl<E: Embedder> Embedder for RateLimitedEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.limiter.until_ready().await;
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Extension trait for easy rate limiting.
pub trait EmbedderExt: Embedder + Sized {
    /// Wrap this embedder with rate limiting.
    fn rate_limited(self, requests_per_second: u32) -> Result<RateLimitedEmbedder<Self>> {
        RateLimitedEmbedder::new(self, requests_per_second)
    }
}

impl<E: Embedder + Sized> EmbedderExt for E {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedder;
    use std::time::Instant;

    #[tokio::test]
    async fn test_rate_limiting() {
        let mock = MockEmbedder::new().with_dimension(8);

        // 2 requests per second
        let embedder = mock.clone().rate_limited(2).unwrap();

        let start = Instant::now();
        let vectors = embedder.embed_batch(&["a", "b", "c"]).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(vectors.len(), 3);
        assert_eq!(mock.call_count(), 3);
        assert!(elapsed.as_millis() >= 500, "Rate limiting not working: {:?}", elapsed);
    }

    #[test]
    fn test_zero_rate_is_config_error() {
        let err = RateLimitedEmbedder::new(MockEmbedder::new(), 0).err().unwrap();
        assert!(matches!(err, ConsolidationError::Config(_)));
        assert!(RateLimitedEmbedder::with_burst(MockEmbedder::new(), 5, 0).is_err());
    }
}
