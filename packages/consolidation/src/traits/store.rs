//! Storage traits for documents, vectors, and provenance.
//!
//! The storage layer is split into focused traits for flexibility:
//! - `DocumentRows`: mode rows keyed by (id, mode), upsert semantics
//! - `VectorSearch`: best-match similarity query
//! - `SourceLog`: append-only provenance records
//! - `DocumentStore`: Composite trait combining all three

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ConsolidationError, Result};
use crate::types::document::{Document, DocumentMode, DocumentPair, DocumentSource, SearchHit};

/// Rows of logical documents, one per mode.
#[async_trait]
pub trait DocumentRows: Send + Sync {
    /// Insert or update a row.
    ///
    /// When a row with the same (id, mode) exists, `title`, `content`,
    /// `category` and `updated_at` are overwritten. The embedding is
    /// coalesced: an absent new embedding keeps the stored one.
    async fn upsert(&self, document: &Document) -> Result<Uuid>;

    /// Write a row verbatim, embedding included. Used to undo a write.
    async fn replace(&self, document: &Document) -> Result<()>;

    /// Remove a row. Used only to undo an insert from the same unit of work.
    async fn remove(&self, id: Uuid, mode: DocumentMode) -> Result<()>;

    /// Get one row.
    async fn get(&self, id: Uuid, mode: DocumentMode) -> Result<Option<Document>>;

    /// All rows of one mode.
    async fn list(&self, mode: DocumentMode) -> Result<Vec<Document>>;

    /// Write both rows of a document as one unit of work.
    ///
    /// This default writes `full_doc` first; if the `paragraph` write fails
    /// the `full_doc` row is put back to its prior state (or removed when it
    /// was new). Backends with transactions should override it.
    ///
    /// After a successful rollback a transient cause is returned as-is so
    /// the caller can retry the whole pair; anything else becomes
    /// `PartialWrite`.
    async fn upsert_pair(&self, pair: &DocumentPair) -> Result<()> {
        let id = pair.id();
        let previous = self.get(id, DocumentMode::FullDoc).await?;

        self.upsert(&pair.full_doc).await?;

        let Err(e) = self.upsert(&pair.paragraph).await else {
            return Ok(());
        };

        let rollback = match &previous {
            Some(prev) => self.replace(prev).await,
            None => self.remove(id, DocumentMode::FullDoc).await,
        };

        match rollback {
            Ok(()) if e.is_transient() => Err(e),
            Ok(()) => Err(ConsolidationError::PartialWrite {
                id,
                reason: e.to_string(),
            }),
            Err(rb) => Err(ConsolidationError::RollbackFailed {
                id,
                reason: format!("{}; rollback: {}", e, rb),
            }),
        }
    }
}

/// Vector similarity over stored rows.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Single best match among rows of `mode` that have an embedding.
    ///
    /// Returns `None` when no such row exists.
    async fn search_best(&self, embedding: &[f32], mode: DocumentMode)
        -> Result<Option<SearchHit>>;
}

/// Append-only provenance log.
#[async_trait]
pub trait SourceLog: Send + Sync {
    /// Record a source. Returns false if (document_id, source_id) was already recorded.
    async fn record_source(&self, source: &DocumentSource) -> Result<bool>;

    /// Whether a topic source was already absorbed into any document.
    async fn has_source(&self, source_id: &str) -> Result<bool>;

    /// All sources of a document, oldest first.
    async fn sources_for(&self, document_id: Uuid) -> Result<Vec<DocumentSource>>;
}

/// Composite storage trait combining rows, search and provenance.
///
/// This is the main trait used by the consolidator.
pub trait DocumentStore: DocumentRows + VectorSearch + SourceLog {}

// Blanket implementation: anything implementing all three traits is a DocumentStore
impl<T: DocumentRows + VectorSearch + SourceLog> DocumentStore for T {}

#[async_trait]
impl<S: DocumentRows + ?Sized> DocumentRows for Arc<S> {
    async fn upsert(&self, document: &Document) -> Result<Uuid> {
        (**self).upsert(document).await
    }

    async fn replace(&self, document: &Document) -> Result<()> {
        (**self).replace(document).await
    }

    async fn remove(&self, id: Uuid, mode: DocumentMode) -> Result<()> {
        (**self).remove(id, mode).await
    }

    async fn get(&self, id: Uuid, mode: DocumentMode) -> Result<Option<Document>> {
        (**self).get(id, mode).await
    }

    async fn list(&self, mode: DocumentMode) -> Result<Vec<Document>> {
        (**self).list(mode).await
    }

    async fn upsert_pair(&self, pair: &DocumentPair) -> Result<()> {
        (**self).upsert_pair(pair).await
    }
}

#[async_trait]
impl<S: VectorSearch + ?Sized> VectorSearch for Arc<S> {
    async fn search_best(
        &self,
        embedding: &[f32],
        mode: DocumentMode,
    ) -> Result<Option<SearchHit>> {
        (**self).search_best(embedding, mode).await
    }
}

#[async_trait]
impl<S: SourceLog + ?Sized> SourceLog for Arc<S> {
    async fn record_source(&self, source: &DocumentSource) -> Result<bool> {
        (**self).record_source(source).await
    }

    async fn has_source(&self, source_id: &str) -> Result<bool> {
        (**self).has_source(source_id).await
    }

    async fn sources_for(&self, document_id: Uuid) -> Result<Vec<DocumentSource>> {
        (**self).sources_for(document_id).await
    }
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Similarity score in [0, 1]; opposite vectors score 0.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).clamp(0.0, 1.0)
}

/// Pick the best-scoring row of `mode` from an iterator of candidates.
///
/// Shared by backends that score in Rust rather than in the database.
pub fn best_match<'a>(
    query: &[f32],
    mode: DocumentMode,
    rows: impl IntoIterator<Item = &'a Document>,
) -> Option<SearchHit> {
    rows.into_iter()
        .filter(|d| d.mode == mode)
        .filter_map(|d| {
            let emb = d.embedding.as_ref()?;
            Some((d, similarity_score(query, emb)))
        })
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(d, score)| SearchHit {
            document: d.clone(),
            score,
        })
}
