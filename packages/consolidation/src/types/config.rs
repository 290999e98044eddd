//! Configuration types for consolidation.

use serde::{Deserialize, Serialize};

use crate::error::{ConsolidationError, Result};
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::types::document::DocumentMode;

/// Default embedding dimension.
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// Similarity bands for the merge decision.
///
/// - `score >= high`: merge without asking the verifier
/// - `score <= low`: create without asking the verifier
/// - in between: ambiguous, the verifier decides
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            low: 0.55,
            high: 0.80,
        }
    }
}

impl MergeThresholds {
    /// Create validated thresholds.
    pub fn new(low: f32, high: f32) -> Result<Self> {
        let t = Self { low, high };
        t.validate()?;
        Ok(t)
    }

    /// Require `0 <= low < high <= 1`.
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        if !in_range(self.low) || !in_range(self.high) {
            return Err(ConsolidationError::Config(format!(
                "thresholds must be within [0, 1] (low={}, high={})",
                self.low, self.high
            )));
        }
        if self.low >= self.high {
            return Err(ConsolidationError::Config(format!(
                "low threshold {} must be below high threshold {}",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

/// Configuration for the consolidation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Merge decision bands.
    pub thresholds: MergeThresholds,

    /// Mode whose embedding is used for similarity search.
    ///
    /// Both modes are embedded; only this one is queried. Default: full_doc.
    #[serde(default)]
    pub search_mode: DocumentMode,

    /// Expected embedding dimension. Default: 768.
    pub embedding_dim: usize,

    /// Flush the checkpoint after this many successes. Default: 10.
    pub flush_every: usize,

    /// A failed topic is eligible for retry while its counter is below this.
    ///
    /// Default: 3.
    pub max_failure_retries: u32,

    /// On MERGE, keep the stored embedding when re-embedding fails
    /// instead of failing the topic.
    ///
    /// Default: false.
    #[serde(default)]
    pub allow_stale_embeddings: bool,

    /// Retry policy shared by provider, verifier and store calls.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Circuit breaker settings, one breaker per dependency.
    #[serde(default)]
    pub circuit: CircuitBreakerConfig,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            thresholds: MergeThresholds::default(),
            search_mode: DocumentMode::FullDoc,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            flush_every: 10,
            max_failure_retries: 3,
            allow_stale_embeddings: false,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

impl ConsolidationConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set merge thresholds.
    pub fn with_thresholds(mut self, low: f32, high: f32) -> Self {
        self.thresholds = MergeThresholds { low, high };
        self
    }

    /// Set the search mode.
    pub fn with_search_mode(mut self, mode: DocumentMode) -> Self {
        self.search_mode = mode;
        self
    }

    /// Set the embedding dimension.
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Set the checkpoint flush interval.
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n;
        self
    }

    /// Set the failure retry bound.
    pub fn with_max_failure_retries(mut self, n: u32) -> Self {
        self.max_failure_retries = n;
        self
    }

    /// Allow merges to keep stale embeddings.
    pub fn allow_stale_embeddings(mut self) -> Self {
        self.allow_stale_embeddings = true;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the circuit breaker config.
    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Validate all settings.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.embedding_dim == 0 {
            return Err(ConsolidationError::Config(
                "embedding_dim must be > 0".into(),
            ));
        }
        if self.flush_every == 0 {
            return Err(ConsolidationError::Config("flush_every must be > 0".into()));
        }
        self.retry.validate()?;
        Ok(())
    }
}
