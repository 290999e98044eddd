//! Dual-mode synchronizer.
//!
//! Builds the (`full_doc`, `paragraph`) pair for a CREATE or MERGE. Both rows
//! share one id and one `updated_at`, and every embedding is computed before
//! anything is written, so a failed embedding never leaves a half-updated
//! document behind.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::search::query_text;
use crate::pipeline::sections::{append_flat, merge_sections, parse_sections, render_sections};
use crate::traits::embedder::Embedder;
use crate::types::{
    document::{Document, DocumentMode, DocumentPair},
    topic::Topic,
};

/// A pair ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedWrite {
    pub pair: DocumentPair,

    /// Whether either row's content changed. False when a merge replays
    /// content already present; nothing needs writing then.
    pub changed: bool,

    /// A merge kept the stored embedding for at least one row
    pub stale_embeddings: bool,

    /// Short description of the change, for provenance
    pub delta: String,
}

/// Builds consistent document pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DualModeSynchronizer {
    allow_stale_embeddings: bool,
}

impl DualModeSynchronizer {
    /// Create a synchronizer.
    pub fn new(allow_stale_embeddings: bool) -> Self {
        Self {
            allow_stale_embeddings,
        }
    }

    /// Build a new document from a topic.
    ///
    /// `full_doc_embedding` may carry the topic's query embedding, which is
    /// already the embedding of the `full_doc` content.
    pub async fn prepare_create<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
        topic: &Topic,
        full_doc_embedding: Option<Vec<f32>>,
    ) -> Result<PreparedWrite> {
        let now = Utc::now();
        let id = Uuid::now_v7();

        let full_content = query_text(topic).to_string();
        let paragraph_content = render_sections(&parse_sections(&full_content, &topic.title));

        let full_embedding = match full_doc_embedding {
            Some(e) => e,
            None => embedder.embed(&full_content).await?,
        };
        let paragraph_embedding = embedder.embed(&paragraph_content).await?;

        let full_doc = Document::new(id, DocumentMode::FullDoc, &topic.title, full_content, now)
            .with_category(topic.category.clone())
            .with_embedding(full_embedding);
        let paragraph =
            Document::new(id, DocumentMode::Paragraph, &topic.title, paragraph_content, now)
                .with_category(topic.category.clone())
                .with_embedding(paragraph_embedding);

        Ok(PreparedWrite {
            pair: DocumentPair::new(full_doc, paragraph)?,
            changed: true,
            stale_embeddings: false,
            delta: format!("created from \"{}\"", topic.title),
        })
    }

    /// Merge a topic into an existing document's two rows.
    pub async fn prepare_merge<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
        topic: &Topic,
        full_doc: &Document,
        paragraph: &Document,
    ) -> Result<PreparedWrite> {
        let now = Utc::now();

        let new_full = append_flat(&full_doc.content, query_text(topic));

        let existing = parse_sections(&paragraph.content, &paragraph.title);
        let incoming = parse_sections(query_text(topic), &topic.title);
        let (sections, stats) = merge_sections(existing, incoming);
        let new_paragraph = stats.changed().then(|| render_sections(&sections));

        let changed = new_full.is_some() || new_paragraph.is_some();
        let delta = format!(
            "merged \"{}\": {} section(s) extended, {} added",
            topic.title, stats.appended, stats.added
        );

        let mut stale_embeddings = false;
        let full_doc = self
            .next_row(embedder, full_doc, new_full, topic, now, &mut stale_embeddings)
            .await?;
        let paragraph = self
            .next_row(embedder, paragraph, new_paragraph, topic, now, &mut stale_embeddings)
            .await?;

        Ok(PreparedWrite {
            pair: DocumentPair::new(full_doc, paragraph)?,
            changed,
            stale_embeddings,
            delta,
        })
    }

    /// The updated row. Unchanged content keeps its stored embedding
    /// (sent as `None`, which the store coalesces).
    async fn next_row<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
        current: &Document,
        new_content: Option<String>,
        topic: &Topic,
        now: DateTime<Utc>,
        stale: &mut bool,
    ) -> Result<Document> {
        let mut row = current.clone();
        row.updated_at = now;
        row.embedding = None;
        if row.category.is_none() {
            row.category = topic.category.clone();
        }

        let Some(content) = new_content else {
            return Ok(row);
        };

        match embedder.embed(&content).await {
            Ok(embedding) => row.embedding = Some(embedding),
            Err(e) if self.allow_stale_embeddings => {
                warn!(
                    document_id = %row.id,
                    mode = %row.mode,
                    error = %e,
                    "Re-embedding failed, keeping stored embedding"
                );
                *stale = true;
            }
            Err(e) => return Err(e),
        }
        row.content = content;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedder;

    fn topic(title: &str, content: &str) -> Topic {
        Topic::new(title, content, "https://docs.example.com/a")
    }

    #[tokio::test]
    async fn test_create_builds_consistent_pair() {
        let embedder = MockEmbedder::new().with_dimension(32);
        let sync = DualModeSynchronizer::default();
        let t = topic("Install Guide", "Download the installer.\n\n## Windows\nRun setup.exe");

        let w = sync.prepare_create(&embedder, &t, None).await.unwrap();
        assert!(w.changed);
        assert_eq!(w.pair.full_doc.content, t.content);
        assert_eq!(
            w.pair.paragraph.content,
            "## Install Guide\nDownload the installer.\n\n## Windows\nRun setup.exe"
        );
        assert_eq!(w.pair.full_doc.updated_at, w.pair.paragraph.updated_at);
        assert!(w.pair.full_doc.embedding.is_some());
        assert!(w.pair.paragraph.embedding.is_some());
        assert_eq!(embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_create_reuses_query_embedding() {
        let embedder = MockEmbedder::new().with_dimension(32);
        let sync = DualModeSynchronizer::default();
        let w = sync
            .prepare_create(&embedder, &topic("T", "body"), Some(vec![0.5; 32]))
            .await
            .unwrap();
        assert_eq!(w.pair.full_doc.embedding, Some(vec![0.5; 32]));
        assert_eq!(embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_create_fails_when_embedding_fails() {
        let embedder = MockEmbedder::new().with_dimension(32).fail_when_contains("##");
        let sync = DualModeSynchronizer::new(true);
        let result = sync.prepare_create(&embedder, &topic("T", "body"), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_merge_appends_and_shares_timestamp() {
        let embedder = MockEmbedder::new().with_dimension(32);
        let sync = DualModeSynchronizer::default();
        let created = sync
            .prepare_create(&embedder, &topic("Install Guide", "Download the installer."), None)
            .await
            .unwrap();

        let w = sync
            .prepare_merge(
                &embedder,
                &topic("Install Steps", "Run setup.exe"),
                &created.pair.full_doc,
                &created.pair.paragraph,
            )
            .await
            .unwrap();

        assert!(w.changed);
        assert_eq!(w.pair.id(), created.pair.id());
        assert_eq!(w.pair.full_doc.content, "Download the installer.\n\nRun setup.exe");
        assert_eq!(
            w.pair.paragraph.content,
            "## Install Guide\nDownload the installer.\n\n## Install Steps\nRun setup.exe"
        );
        assert_eq!(w.pair.full_doc.updated_at, w.pair.paragraph.updated_at);
        assert_eq!(w.pair.full_doc.created_at, created.pair.full_doc.created_at);
    }

    #[tokio::test]
    async fn test_merge_replay_changes_nothing() {
        let embedder = MockEmbedder::new().with_dimension(32);
        let sync = DualModeSynchronizer::default();
        let t = topic("Install Guide", "Download the installer.");
        let created = sync.prepare_create(&embedder, &t, None).await.unwrap();

        let before = embedder.call_count();
        let w = sync
            .prepare_merge(&embedder, &t, &created.pair.full_doc, &created.pair.paragraph)
            .await
            .unwrap();
        assert!(!w.changed);
        assert_eq!(w.pair.full_doc.content, created.pair.full_doc.content);
        assert_eq!(embedder.call_count(), before);
    }

    #[tokio::test]
    async fn test_merge_embedding_failure() {
        let embedder = MockEmbedder::new().with_dimension(32);
        let sync = DualModeSynchronizer::default();
        let created = sync
            .prepare_create(&embedder, &topic("Install Guide", "Download."), None)
            .await
            .unwrap();

        let failing = MockEmbedder::new().with_dimension(32).fail_when_contains("Run setup");
        let t = topic("Install Steps", "Run setup.exe");

        let strict = sync
            .prepare_merge(&failing, &t, &created.pair.full_doc, &created.pair.paragraph)
            .await;
        assert!(strict.is_err());

        let lenient = DualModeSynchronizer::new(true)
            .prepare_merge(&failing, &t, &created.pair.full_doc, &created.pair.paragraph)
            .await
            .unwrap();
        assert!(lenient.stale_embeddings);
        assert!(lenient.pair.full_doc.embedding.is_none());
        assert!(lenient.pair.full_doc.content.contains("Run setup.exe"));
    }
}
