//! The Consolidator - main entry point of the library.
//!
//! One topic at a time: similarity search → merge arbiter → dual-mode
//! synchronizer → store → provenance.

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ConsolidationError, Result, Service};
use crate::pipeline::{
    arbiter::{Action, DecisionPath, MergeArbiter},
    search::SimilaritySearch,
    sync::{DualModeSynchronizer, PreparedWrite},
};
use crate::resilience::{Guard, ResilientEmbedder, ResilientVerifier};
use crate::traits::{embedder::Embedder, store::DocumentStore, verifier::MergeVerifier};
use crate::types::{
    config::ConsolidationConfig,
    document::{Document, DocumentMode, DocumentSource, RowKey},
    topic::Topic,
};

/// Whether a topic created or extended a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    Merged,
}

/// Result of consolidating one topic.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationOutcome {
    pub kind: OutcomeKind,
    pub document_id: Uuid,

    /// The two rows written, `full_doc` first
    pub rows: [RowKey; 2],

    /// Similarity of the best candidate, when there was one
    pub score: Option<f32>,

    pub path: DecisionPath,

    /// False when a replayed merge found its content already present
    pub changed: bool,

    /// A merge kept a stored embedding because re-embedding failed
    pub stale_embeddings: bool,
}

/// The consolidation engine.
///
/// # Example
///
/// ```rust,ignore
/// let consolidator = Consolidator::new(store, embedder, verifier, ConsolidationConfig::default())?;
///
/// let outcome = consolidator.consolidate(&topic).await?;
/// println!("{:?} {}", outcome.kind, outcome.document_id);
/// ```
pub struct Consolidator<S: DocumentStore, E: Embedder, V: MergeVerifier> {
    pub(crate) store: S,
    pub(crate) embedder: ResilientEmbedder<E>,
    pub(crate) arbiter: MergeArbiter<ResilientVerifier<V>>,
    pub(crate) store_guard: Guard,
    pub(crate) search: SimilaritySearch,
    pub(crate) sync: DualModeSynchronizer,
    pub(crate) config: ConsolidationConfig,
}

impl<S: DocumentStore, E: Embedder, V: MergeVerifier> Consolidator<S, E, V> {
    /// Create a consolidator. Fails if the config is invalid or the
    /// embedder's dimension disagrees with it.
    pub fn new(store: S, embedder: E, verifier: V, config: ConsolidationConfig) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.embedding_dim {
            return Err(ConsolidationError::DimensionMismatch {
                expected: config.embedding_dim,
                actual: embedder.dimension(),
            });
        }

        let retry = config.retry.clone();
        let circuit = config.circuit.clone();

        Ok(Self {
            store,
            embedder: ResilientEmbedder::new(embedder, retry.clone(), circuit.clone()),
            arbiter: MergeArbiter::new(
                ResilientVerifier::new(verifier, retry.clone(), circuit.clone()),
                config.thresholds,
            ),
            store_guard: Guard::new(Service::Store, retry, circuit),
            search: SimilaritySearch::new(config.search_mode),
            sync: DualModeSynchronizer::new(config.allow_stale_embeddings),
            config,
        })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consolidate one topic: CREATE a document or MERGE into the best match.
    ///
    /// Nothing is written unless both rows and their embeddings are ready.
    #[instrument(skip_all, fields(topic = %topic.title, source = %topic.source_url))]
    pub async fn consolidate(&self, topic: &Topic) -> Result<ConsolidationOutcome> {
        if topic.is_empty() {
            return Err(ConsolidationError::Config(format!(
                "topic \"{}\" has no content",
                topic.title
            )));
        }

        let found = self
            .search
            .find(&self.store, &self.store_guard, &self.embedder, topic)
            .await?;
        let decision = self.arbiter.decide(topic, found.best.as_ref()).await;

        let (kind, write) = match &decision.action {
            Action::Create => {
                let full_doc_embedding = match self.search.mode() {
                    DocumentMode::FullDoc => Some(found.query_embedding),
                    DocumentMode::Paragraph => None,
                };
                let write = self
                    .sync
                    .prepare_create(&self.embedder, topic, full_doc_embedding)
                    .await?;
                (OutcomeKind::Created, write)
            }
            Action::Merge { target } => {
                let (full_doc, paragraph) = self.load_pair(target).await?;
                let write = self
                    .sync
                    .prepare_merge(&self.embedder, topic, &full_doc, &paragraph)
                    .await?;
                (OutcomeKind::Merged, write)
            }
        };

        self.persist(topic, &write).await?;

        let outcome = ConsolidationOutcome {
            kind,
            document_id: write.pair.id(),
            rows: write.pair.keys(),
            score: decision.score,
            path: decision.path,
            changed: write.changed,
            stale_embeddings: write.stale_embeddings,
        };

        info!(
            kind = ?outcome.kind,
            document_id = %outcome.document_id,
            score = ?outcome.score,
            path = %outcome.path,
            changed = outcome.changed,
            "Topic consolidated"
        );

        Ok(outcome)
    }

    /// Both rows of the merge target, whichever mode the search returned.
    async fn load_pair(&self, target: &Document) -> Result<(Document, Document)> {
        let id = target.id;
        let other_mode = target.mode.other();
        let other = self
            .store_guard
            .call("get", || self.store.get(id, other_mode))
            .await?
            .ok_or(ConsolidationError::MissingModeRow {
                id,
                mode: other_mode,
            })?;

        Ok(match target.mode {
            DocumentMode::FullDoc => (target.clone(), other),
            DocumentMode::Paragraph => (other, target.clone()),
        })
    }

    async fn persist(&self, topic: &Topic, write: &PreparedWrite) -> Result<()> {
        if write.changed {
            self.store_guard
                .call("upsert_pair", || self.store.upsert_pair(&write.pair))
                .await?;
        }

        let source = DocumentSource::new(
            write.pair.id(),
            topic.source_id(),
            topic.source_url.clone(),
            write.delta.clone(),
        );
        self.store_guard
            .call("record_source", || self.store.record_source(&source))
            .await?;
        Ok(())
    }
}
