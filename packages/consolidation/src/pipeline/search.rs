//! Similarity search: topic → best existing document.

use tracing::debug;

use crate::error::Result;
use crate::resilience::Guard;
use crate::traits::{embedder::Embedder, store::VectorSearch};
use crate::types::{
    document::{DocumentMode, SearchHit},
    topic::Topic,
};

/// Text of a topic that is embedded and compared.
pub fn query_text(topic: &Topic) -> &str {
    topic.content.trim()
}

/// Result of a similarity search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Embedding of the topic content
    pub query_embedding: Vec<f32>,

    /// Single best candidate, if the store has any embedded row
    pub best: Option<SearchHit>,
}

/// Single-best-candidate search over one mode.
#[derive(Debug, Clone, Copy)]
pub struct SimilaritySearch {
    mode: DocumentMode,
}

impl SimilaritySearch {
    /// Search rows of the given mode.
    pub fn new(mode: DocumentMode) -> Self {
        Self { mode }
    }

    /// Mode being searched.
    pub fn mode(&self) -> DocumentMode {
        self.mode
    }

    /// Embed the topic and find its best match.
    ///
    /// Read-only. An embedding failure is returned as-is.
    pub async fn find<S, E>(
        &self,
        store: &S,
        store_guard: &Guard,
        embedder: &E,
        topic: &Topic,
    ) -> Result<SearchResult>
    where
        S: VectorSearch + ?Sized,
        E: Embedder + ?Sized,
    {
        let query_embedding = embedder.embed(query_text(topic)).await?;

        let best = store_guard
            .call("search_best", || store.search_best(&query_embedding, self.mode))
            .await?;

        match &best {
            Some(hit) => debug!(
                document_id = %hit.document.id,
                score = hit.score,
                mode = %self.mode,
                "Best candidate"
            ),
            None => debug!(mode = %self.mode, "No candidate documents"),
        }

        Ok(SearchResult {
            query_embedding,
            best,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Service;
    use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
    use crate::stores::MemoryStore;
    use crate::testing::{vector, MockEmbedder};
    use crate::traits::store::DocumentRows;
    use crate::types::document::{Document, DocumentPair};
    use chrono::Utc;
    use uuid::Uuid;

    fn guard() -> Guard {
        Guard::new(Service::Store, RetryPolicy::none(), CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn test_empty_store_has_no_candidate() {
        let store = MemoryStore::new();
        let embedder = MockEmbedder::new().with_dimension(32);
        let result = SimilaritySearch::new(DocumentMode::FullDoc)
            .find(&store, &guard(), &embedder, &Topic::new("T", "text", "https://x.dev"))
            .await
            .unwrap();

        assert!(result.best.is_none());
        assert_eq!(result.query_embedding.len(), 32);
    }

    #[tokio::test]
    async fn test_finds_best_in_mode() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let now = Utc::now();
        let pair = DocumentPair::new(
            Document::new(id, DocumentMode::FullDoc, "A", "a", now).with_embedding(vector(32, &[1.0])),
            Document::new(id, DocumentMode::Paragraph, "A", "## A\na", now)
                .with_embedding(vector(32, &[0.0, 1.0])),
        )
        .unwrap();
        store.upsert_pair(&pair).await.unwrap();

        let embedder = MockEmbedder::new()
            .with_dimension(32)
            .with_embedding("query", vector(32, &[1.0]));
        let topic = Topic::new("Q", "  query  ", "https://x.dev");

        let full = SimilaritySearch::new(DocumentMode::FullDoc)
            .find(&store, &guard(), &embedder, &topic)
            .await
            .unwrap();
        assert!((full.best.unwrap().score - 1.0).abs() < 1e-6);

        let para = SimilaritySearch::new(DocumentMode::Paragraph)
            .find(&store, &guard(), &embedder, &topic)
            .await
            .unwrap();
        assert!(para.best.unwrap().score.abs() < 1e-6);
    }
}
