//! Merge arbiter: CREATE or MERGE for one topic.
//!
//! Decisive scores skip the verifier. Only the ambiguous band between the
//! thresholds costs an LLM call, and a verifier that fails or answers
//! nonsense falls back to CREATE.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use crate::traits::verifier::{MergeVerifier, Verdict};
use crate::types::{
    config::MergeThresholds,
    document::{Document, SearchHit},
    topic::Topic,
};

/// Where a score falls relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// `score >= high`
    Merge,
    /// `score <= low`
    Create,
    /// Strictly between
    Ambiguous,
}

/// Classify a similarity score.
pub fn classify(score: f32, thresholds: &MergeThresholds) -> Band {
    if score >= thresholds.high {
        Band::Merge
    } else if score <= thresholds.low {
        Band::Create
    } else {
        Band::Ambiguous
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    NoCandidate,
    DecisiveMerge,
    DecisiveCreate,
    Verified,
    VerifierFallback,
}

impl fmt::Display for DecisionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionPath::NoCandidate => "no_candidate",
            DecisionPath::DecisiveMerge => "decisive_merge",
            DecisionPath::DecisiveCreate => "decisive_create",
            DecisionPath::Verified => "verified",
            DecisionPath::VerifierFallback => "verifier_fallback",
        };
        f.write_str(s)
    }
}

/// What to do with a topic.
#[derive(Debug, Clone)]
pub enum Action {
    Create,
    Merge { target: Document },
}

/// Arbiter output.
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub path: DecisionPath,

    /// Similarity of the best candidate, when there was one
    pub score: Option<f32>,

    /// Verifier reason, when the verifier was asked
    pub reason: Option<String>,
}

impl Decision {
    fn create(path: DecisionPath, score: Option<f32>, reason: Option<String>) -> Self {
        Self {
            action: Action::Create,
            path,
            score,
            reason,
        }
    }

    /// Whether the decision is a merge.
    pub fn is_merge(&self) -> bool {
        matches!(self.action, Action::Merge { .. })
    }
}

/// Decides CREATE vs MERGE from the best candidate.
pub struct MergeArbiter<V: MergeVerifier> {
    verifier: V,
    thresholds: MergeThresholds,
}

impl<V: MergeVerifier> MergeArbiter<V> {
    /// Create an arbiter.
    pub fn new(verifier: V, thresholds: MergeThresholds) -> Self {
        Self {
            verifier,
            thresholds,
        }
    }

    /// The configured thresholds.
    pub fn thresholds(&self) -> &MergeThresholds {
        &self.thresholds
    }

    /// The verifier.
    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Decide for one topic. Never fails: verifier problems become CREATE.
    pub async fn decide(&self, topic: &Topic, best: Option<&SearchHit>) -> Decision {
        let Some(hit) = best else {
            return Decision::create(DecisionPath::NoCandidate, None, None);
        };
        let score = hit.score;

        match classify(score, &self.thresholds) {
            Band::Merge => Decision {
                action: Action::Merge {
                    target: hit.document.clone(),
                },
                path: DecisionPath::DecisiveMerge,
                score: Some(score),
                reason: None,
            },
            Band::Create => Decision::create(DecisionPath::DecisiveCreate, Some(score), None),
            Band::Ambiguous => self.verify(topic, hit).await,
        }
    }

    async fn verify(&self, topic: &Topic, hit: &SearchHit) -> Decision {
        let score = hit.score;
        match self.verifier.verify(topic, &hit.document, score).await {
            Ok(Verdict::Merge { reason }) => {
                debug!(document_id = %hit.document.id, score = score, reason = %reason, "Verifier: merge");
                Decision {
                    action: Action::Merge {
                        target: hit.document.clone(),
                    },
                    path: DecisionPath::Verified,
                    score: Some(score),
                    reason: Some(reason),
                }
            }
            Ok(Verdict::Create { reason }) => {
                debug!(document_id = %hit.document.id, score = score, reason = %reason, "Verifier: create");
                Decision::create(DecisionPath::Verified, Some(score), Some(reason))
            }
            Ok(Verdict::Unparsable { raw }) => {
                warn!(
                    topic = %topic.title,
                    score = score,
                    raw = %raw,
                    "Unparsable verifier response, falling back to create"
                );
                Decision::create(DecisionPath::VerifierFallback, Some(score), None)
            }
            Err(e) => {
                warn!(
                    topic = %topic.title,
                    score = score,
                    error = %e,
                    "Verifier failed, falling back to create"
                );
                Decision::create(DecisionPath::VerifierFallback, Some(score), None)
            }
        }
    }
}
