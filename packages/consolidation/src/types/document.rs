//! Document types - the two stored representations of a logical document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ConsolidationError, Result};

/// Storage representation of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentMode {
    /// Flat, unsegmented text
    FullDoc,

    /// Header-delimited sections
    Paragraph,
}

impl DocumentMode {
    /// Both modes, in write order.
    pub const ALL: [DocumentMode; 2] = [DocumentMode::FullDoc, DocumentMode::Paragraph];

    /// Database/string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentMode::FullDoc => "full_doc",
            DocumentMode::Paragraph => "paragraph",
        }
    }

    /// The other mode of the pair.
    pub fn other(&self) -> DocumentMode {
        match self {
            DocumentMode::FullDoc => DocumentMode::Paragraph,
            DocumentMode::Paragraph => DocumentMode::FullDoc,
        }
    }
}

impl Default for DocumentMode {
    fn default() -> Self {
        Self::FullDoc
    }
}

impl fmt::Display for DocumentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentMode {
    type Err = ConsolidationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full_doc" => Ok(DocumentMode::FullDoc),
            "paragraph" => Ok(DocumentMode::Paragraph),
            other => Err(ConsolidationError::Config(format!(
                "unknown document mode: {}",
                other
            ))),
        }
    }
}

/// One stored row: a logical document in one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Logical document id, shared by both mode rows
    pub id: Uuid,

    /// Document title
    pub title: String,

    /// Full text (full_doc) or rendered sections (paragraph)
    pub content: String,

    /// Which representation this row holds
    pub mode: DocumentMode,

    /// Optional classification label
    pub category: Option<String>,

    /// Embedding vector; `None` on upsert means "keep the stored one"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new row stamped with the given time.
    pub fn new(
        id: Uuid,
        mode: DocumentMode,
        title: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
            mode,
            category: None,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    /// Set the embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Row key of this document.
    pub fn key(&self) -> RowKey {
        RowKey {
            id: self.id,
            mode: self.mode,
        }
    }
}

/// Primary key of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub id: Uuid,
    pub mode: DocumentMode,
}

/// Both rows of a logical document, written as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPair {
    pub full_doc: Document,
    pub paragraph: Document,
}

impl DocumentPair {
    /// Build a pair, checking that both rows belong together.
    pub fn new(full_doc: Document, paragraph: Document) -> Result<Self> {
        let pair = Self { full_doc, paragraph };
        pair.check()?;
        Ok(pair)
    }

    /// Logical document id.
    pub fn id(&self) -> Uuid {
        self.full_doc.id
    }

    /// Row for a mode.
    pub fn get(&self, mode: DocumentMode) -> &Document {
        match mode {
            DocumentMode::FullDoc => &self.full_doc,
            DocumentMode::Paragraph => &self.paragraph,
        }
    }

    /// Rows in write order.
    pub fn rows(&self) -> [&Document; 2] {
        [&self.full_doc, &self.paragraph]
    }

    /// Row keys in write order.
    pub fn keys(&self) -> [RowKey; 2] {
        [self.full_doc.key(), self.paragraph.key()]
    }

    fn check(&self) -> Result<()> {
        let ok = self.full_doc.mode == DocumentMode::FullDoc
            && self.paragraph.mode == DocumentMode::Paragraph
            && self.full_doc.id == self.paragraph.id
            && self.full_doc.updated_at == self.paragraph.updated_at;
        if ok {
            Ok(())
        } else {
            Err(ConsolidationError::Config(format!(
                "inconsistent document pair for {}",
                self.full_doc.id
            )))
        }
    }
}

/// Provenance: a topic source that contributed to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub id: Uuid,
    pub document_id: Uuid,

    /// Topic source identifier (see `Topic::source_id`)
    pub source_id: String,

    pub source_url: String,

    /// Short description of what this source changed
    pub delta: String,

    pub created_at: DateTime<Utc>,
}

impl DocumentSource {
    /// Create a provenance record.
    pub fn new(
        document_id: Uuid,
        source_id: impl Into<String>,
        source_url: impl Into<String>,
        delta: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            document_id,
            source_id: source_id.into(),
            source_url: source_url.into(),
            delta: delta.into(),
            created_at: Utc::now(),
        }
    }
}

/// Best match returned by similarity search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,

    /// Cosine similarity clamped to [0, 1]
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip_str() {
        for mode in DocumentMode::ALL {
            assert_eq!(mode.as_str().parse::<DocumentMode>().unwrap(), mode);
        }
        assert!("chunk".parse::<DocumentMode>().is_err());
    }

    #[test]
    fn test_mode_serde_snake_case() {
        let json = serde_json::to_string(&DocumentMode::FullDoc).unwrap();
        assert_eq!(json, "\"full_doc\"");
    }

    #[test]
    fn test_pair_rejects_mismatched_rows() {
        let now = Utc::now();
        let id = Uuid::now_v7();
        let full = Document::new(id, DocumentMode::FullDoc, "T", "a", now);
        let para = Document::new(Uuid::now_v7(), DocumentMode::Paragraph, "T", "a", now);
        assert!(DocumentPair::new(full.clone(), para).is_err());

        let para = Document::new(id, DocumentMode::Paragraph, "T", "a", now);
        let pair = DocumentPair::new(full, para).unwrap();
        assert_eq!(pair.id(), id);
    }

    #[test]
    fn test_pair_rejects_skewed_timestamps() {
        let now = Utc::now();
        let id = Uuid::now_v7();
        let full = Document::new(id, DocumentMode::FullDoc, "T", "a", now);
        let para = Document::new(
            id,
            DocumentMode::Paragraph,
            "T",
            "a",
            now + chrono::Duration::seconds(1),
        );
        assert!(DocumentPair::new(full, para).is_err());
    }
}
