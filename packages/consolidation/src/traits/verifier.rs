//! Merge verifier trait for ambiguous similarity scores.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{document::Document, topic::Topic};

/// Parsed judgment of the verifier.
///
/// A response that cannot be read as a decision is a first-class outcome
/// (`Unparsable`), not an error: the arbiter routes it to the CREATE fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Topic belongs in the candidate document
    Merge { reason: String },

    /// Topic should become a new document
    Create { reason: String },

    /// Response could not be parsed into a decision
    Unparsable { raw: String },
}

impl Verdict {
    /// Human-readable reason, or the raw text for unparsable responses.
    pub fn reason(&self) -> &str {
        match self {
            Verdict::Merge { reason } | Verdict::Create { reason } => reason,
            Verdict::Unparsable { raw } => raw,
        }
    }
}

/// Decides whether a topic belongs to a candidate document.
///
/// Only consulted when the similarity score falls in the ambiguous band.
/// Transport failures are `Err`; malformed answers are `Ok(Verdict::Unparsable)`.
#[async_trait]
pub trait MergeVerifier: Send + Sync {
    async fn verify(&self, topic: &Topic, candidate: &Document, score: f32) -> Result<Verdict>;
}

#[async_trait]
impl<V: MergeVerifier + ?Sized> MergeVerifier for Arc<V> {
    async fn verify(&self, topic: &Topic, candidate: &Document, score: f32) -> Result<Verdict> {
        (**self).verify(topic, candidate, score).await
    }
}
