//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::error::Result;
use crate::traits::store::{best_match, DocumentRows, SourceLog, VectorSearch};
use crate::types::document::{Document, DocumentMode, DocumentPair, DocumentSource, RowKey, SearchHit};

/// In-memory storage for document rows and provenance.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    rows: RwLock<HashMap<RowKey, Document>>,
    sources: RwLock<Vec<DocumentSource>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            sources: RwLock::new(Vec::new()),
        }
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of stored rows across both modes.
    pub fn row_count(&self) -> usize {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of stored rows of one mode.
    pub fn count(&self, mode: DocumentMode) -> usize {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| k.mode == mode)
            .count()
    }

    /// Number of provenance records.
    pub fn source_count(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Apply upsert semantics to one row in place.
fn upsert_row(rows: &mut HashMap<RowKey, Document>, incoming: &Document) {
    let key = incoming.key();
    let mut row = incoming.clone();
    if let Some(existing) = rows.get(&key) {
        row.created_at = existing.created_at;
        if row.embedding.is_none() {
            row.embedding = existing.embedding.clone();
        }
    }
    rows.insert(key, row);
}

#[async_trait]
impl DocumentRows for MemoryStore {
    async fn upsert(&self, document: &Document) -> Result<Uuid> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        upsert_row(&mut rows, document);
        Ok(document.id)
    }

    async fn replace(&self, document: &Document) -> Result<()> {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.key(), document.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid, mode: DocumentMode) -> Result<()> {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&RowKey { id, mode });
        Ok(())
    }

    async fn get(&self, id: Uuid, mode: DocumentMode) -> Result<Option<Document>> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&RowKey { id, mode })
            .cloned())
    }

    async fn list(&self, mode: DocumentMode) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|d| d.mode == mode)
            .cloned()
            .collect();
        docs.sort_by_key(|d| (d.created_at, d.id));
        Ok(docs)
    }

    // Both rows go in under one write lock, so no reader sees half a pair.
    async fn upsert_pair(&self, pair: &DocumentPair) -> Result<()> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        for row in pair.rows() {
            upsert_row(&mut rows, row);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorSearch for MemoryStore {
    async fn search_best(
        &self,
        embedding: &[f32],
        mode: DocumentMode,
    ) -> Result<Option<SearchHit>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(best_match(embedding, mode, rows.values()))
    }
}

#[async_trait]
impl SourceLog for MemoryStore {
    async fn record_source(&self, source: &DocumentSource) -> Result<bool> {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let exists = sources
            .iter()
            .any(|s| s.document_id == source.document_id && s.source_id == source.source_id);
        if exists {
            return Ok(false);
        }
        sources.push(source.clone());
        Ok(true)
    }

    async fn has_source(&self, source_id: &str) -> Result<bool> {
        Ok(self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|s| s.source_id == source_id))
    }

    async fn sources_for(&self, document_id: Uuid) -> Result<Vec<DocumentSource>> {
        Ok(self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn pair(id: Uuid, content: &str, embedding: Option<Vec<f32>>) -> DocumentPair {
        let now = Utc::now();
        let mut full = Document::new(id, DocumentMode::FullDoc, "Guide", content, now);
        let mut para = Document::new(id, DocumentMode::Paragraph, "Guide", content, now);
        if let Some(e) = embedding {
            full = full.with_embedding(e.clone());
            para = para.with_embedding(e);
        }
        DocumentPair::new(full, para).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_pair_writes_both_modes() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        store.upsert_pair(&pair(id, "a", Some(vec![1.0, 0.0]))).await.unwrap();

        assert_eq!(store.count(DocumentMode::FullDoc), 1);
        assert_eq!(store.count(DocumentMode::Paragraph), 1);
        assert!(store.get(id, DocumentMode::Paragraph).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_coalesces_embedding_and_keeps_created_at() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let first = pair(id, "a", Some(vec![1.0, 0.0]));
        store.upsert_pair(&first).await.unwrap();

        let later = Utc::now() + Duration::seconds(5);
        let update = Document::new(id, DocumentMode::FullDoc, "Guide", "a\n\nb", later);
        store.upsert(&update).await.unwrap();

        let row = store.get(id, DocumentMode::FullDoc).await.unwrap().unwrap();
        assert_eq!(row.content, "a\n\nb");
        assert_eq!(row.embedding, Some(vec![1.0, 0.0]));
        assert_eq!(row.created_at, first.full_doc.created_at);
        assert_eq!(row.updated_at, later);
    }

    #[tokio::test]
    async fn test_search_best_uses_requested_mode() {
        let store = MemoryStore::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        store.upsert_pair(&pair(a, "a", Some(vec![1.0, 0.0]))).await.unwrap();
        store.upsert_pair(&pair(b, "b", Some(vec![0.0, 1.0]))).await.unwrap();

        let hit = store
            .search_best(&[0.1, 0.9], DocumentMode::Paragraph)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.document.id, b);
        assert_eq!(hit.document.mode, DocumentMode::Paragraph);
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let store = MemoryStore::new();
        let hit = store.search_best(&[1.0], DocumentMode::FullDoc).await.unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_record_source_is_unique_per_document() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        let src = DocumentSource::new(id, "https://x.dev#abc", "https://x.dev", "created");

        assert!(store.record_source(&src).await.unwrap());
        let again = DocumentSource::new(id, "https://x.dev#abc", "https://x.dev", "created");
        assert!(!store.record_source(&again).await.unwrap());

        assert!(store.has_source("https://x.dev#abc").await.unwrap());
        assert_eq!(store.sources_for(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.upsert_pair(&pair(Uuid::now_v7(), "a", None)).await.unwrap();
        store.clear();
        assert_eq!(store.row_count(), 0);
    }
}
