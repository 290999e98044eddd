//! Retry + circuit breaker around external calls.
//!
//! `Guard` composes one `RetryPolicy` with one `CircuitBreaker`. The
//! `Resilient*` wrappers apply a guard to any `Embedder` or `MergeVerifier`
//! so the engine never calls a provider unguarded.

use async_trait::async_trait;
use std::future::Future;

use crate::error::{Result, Service};
use crate::resilience::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::resilience::retry::RetryPolicy;
use crate::traits::{
    embedder::{check_dimension, Embedder},
    verifier::{MergeVerifier, Verdict},
};
use crate::types::{document::Document, topic::Topic};

/// Retry policy and breaker for one dependency.
#[derive(Debug)]
pub struct Guard {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl Guard {
    /// Create a guard for a service.
    pub fn new(service: Service, retry: RetryPolicy, circuit: CircuitBreakerConfig) -> Self {
        Self {
            retry,
            breaker: CircuitBreaker::new(service, circuit),
        }
    }

    /// Run `f` with retries; each attempt passes through the breaker.
    ///
    /// An open circuit is not transient, so it stops the retry loop at once.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry
            .run(operation, || self.breaker.call(f()))
            .await
    }

    /// Breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}

/// An embedder behind retry, circuit breaker and dimension checks.
pub struct ResilientEmbedder<E: Embedder> {
    inner: E,
    guard: Guard,
    dimension: usize,
}

impl<E: Embedder> ResilientEmbedder<E> {
    /// Wrap an embedder.
    pub fn new(inner: E, retry: RetryPolicy, circuit: CircuitBreakerConfig) -> Self {
        let dimension = inner.dimension();
        Self {
            inner,
            guard: Guard::new(Service::Embedding, retry, circuit),
            dimension,
        }
    }

    /// Access the wrapped embedder.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.guard.circuit_state()
    }
}

#[async_trait]
impl<E: Embedder> Embedder for ResilientEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.guard.call("embed", || self.inner.embed(text)).await?;
        check_dimension(&embedding, self.dimension)?;
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// A verifier behind retry and circuit breaker.
pub struct ResilientVerifier<V: MergeVerifier> {
    inner: V,
    guard: Guard,
}

impl<V: MergeVerifier> ResilientVerifier<V> {
    /// Wrap a verifier.
    pub fn new(inner: V, retry: RetryPolicy, circuit: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            guard: Guard::new(Service::Verifier, retry, circuit),
        }
    }

    /// Access the wrapped verifier.
    pub fn inner(&self) -> &V {
        &self.inner
    }

    /// Breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.guard.circuit_state()
    }
}

#[async_trait]
impl<V: MergeVerifier> MergeVerifier for ResilientVerifier<V> {
    async fn verify(&self, topic: &Topic, candidate: &Document, score: f32) -> Result<Verdict> {
        self.guard
            .call("verify", || self.inner.verify(topic, candidate, score))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsolidationError;
    use crate::testing::MockEmbedder;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_embedder_retries_then_opens_circuit() {
        let mock = MockEmbedder::new().with_dimension(4);
        mock.fail_next(10);

        let embedder = ResilientEmbedder::new(
            mock.clone(),
            RetryPolicy::default().with_max_attempts(2),
            CircuitBreakerConfig::new(3, Duration::from_secs(60)),
        );

        // First topic: two attempts, both fail
        assert!(embedder.embed("a").await.is_err());
        // Second topic: third failure opens the circuit, retry stops at CircuitOpen
        let err = embedder.embed("b").await.unwrap_err();
        assert!(matches!(err, ConsolidationError::CircuitOpen { .. }));
        assert_eq!(embedder.circuit_state(), CircuitState::Open);

        // Fails fast without calling the provider
        let before = mock.call_count();
        assert!(embedder.embed("c").await.is_err());
        assert_eq!(mock.call_count(), before);
    }

    #[tokio::test]
    async fn test_embedder_rejects_wrong_dimension() {
        let mock = MockEmbedder::new()
            .with_dimension(4)
            .with_embedding("short", vec![1.0, 0.0]);
        let embedder =
            ResilientEmbedder::new(mock, RetryPolicy::none(), CircuitBreakerConfig::default());

        let err = embedder.embed("short").await.unwrap_err();
        assert!(matches!(err, ConsolidationError::DimensionMismatch { .. }));
    }
}
