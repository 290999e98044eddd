//! Typed errors for the consolidation library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Every error carries a
//! classification used by the loop:
//!
//! - **transient**: worth retrying with backoff
//! - **fatal**: forward progress is impossible, the run stops
//! - anything else: the current topic fails, the run continues

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::types::document::DocumentMode;

/// External dependency a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Embedding,
    Verifier,
    Store,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Embedding => "embedding provider",
            Service::Verifier => "merge verifier",
            Service::Store => "document store",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during consolidation.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// Retryable failure of an external call (timeout, 429, 5xx, dropped connection)
    #[error("transient {service} failure: {message}")]
    Transient { service: Service, message: String },

    /// Embedding provider failed permanently (bad request, auth)
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Provider returned a vector of the wrong size
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Verifier call failed permanently
    #[error("verifier error: {0}")]
    Verifier(String),

    /// Circuit breaker is open for a dependency
    #[error("circuit open for {service}, retry in {retry_in:?}")]
    CircuitOpen { service: Service, retry_in: Duration },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Store cannot be reached at all
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    /// A logical document is missing one of its mode rows
    #[error("document {id} has no {mode} row")]
    MissingModeRow { id: Uuid, mode: DocumentMode },

    /// The second row of a pair failed and the first was rolled back
    #[error("partial write for document {id} rolled back: {reason}")]
    PartialWrite { id: Uuid, reason: String },

    /// Rollback itself failed; the pair may be divergent
    #[error("rollback failed for document {id}: {reason}")]
    RollbackFailed { id: Uuid, reason: String },

    /// Checkpoint or failure-queue persistence failed
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl ConsolidationError {
    /// Wrap any error as a storage error.
    pub fn storage(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(e.into())
    }

    /// Build a transient error for a service.
    pub fn transient(service: Service, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            message: message.into(),
        }
    }

    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::StoreUnavailable(_)
        )
    }

    /// Whether the run must stop.
    ///
    /// Checked after retries are exhausted, so an unreachable store here
    /// means a sustained outage rather than a blip.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::RollbackFailed { .. }
                | Self::Checkpoint(_)
                | Self::Io(_)
        )
    }

    /// The dependency this error is attributed to, if any.
    pub fn service(&self) -> Option<Service> {
        match self {
            Self::Transient { service, .. } | Self::CircuitOpen { service, .. } => Some(*service),
            Self::Embedding(_) | Self::DimensionMismatch { .. } => Some(Service::Embedding),
            Self::Verifier(_) => Some(Service::Verifier),
            Self::Storage(_) | Self::StoreUnavailable(_) => Some(Service::Store),
            _ => None,
        }
    }
}

/// Result type alias for consolidation operations.
pub type Result<T> = std::result::Result<T, ConsolidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let t = ConsolidationError::transient(Service::Embedding, "429");
        assert!(t.is_transient());
        assert!(!t.is_fatal());

        let down = ConsolidationError::StoreUnavailable("connection refused".into());
        assert!(down.is_transient());
        assert!(down.is_fatal());

        let partial = ConsolidationError::PartialWrite {
            id: Uuid::nil(),
            reason: "boom".into(),
        };
        assert!(!partial.is_transient());
        assert!(!partial.is_fatal());
    }

    #[test]
    fn test_service_attribution() {
        let e = ConsolidationError::DimensionMismatch {
            expected: 768,
            actual: 3,
        };
        assert_eq!(e.service(), Some(Service::Embedding));
        assert_eq!(ConsolidationError::Cancelled.service(), None);
    }
}
