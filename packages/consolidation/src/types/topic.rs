//! Topic - the unit of extracted content fed into consolidation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A short extracted record to be absorbed into a document.
///
/// Topics are produced by the extraction stage and consumed exactly once
/// by the consolidation loop. They are never stored directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic title (used as the default section header)
    pub title: String,

    /// The text to embed and merge
    pub content: String,

    /// Page the topic was extracted from
    pub source_url: String,

    /// Optional classification label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Topic {
    /// Create a new topic.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            source_url: source_url.into(),
            category: None,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Stable identifier used by the checkpoint and failure queue.
    ///
    /// One page can yield several topics, so the URL alone is not unique.
    pub fn source_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.trim().to_lowercase().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}#{}", self.source_url, &digest[..12])
    }

    /// Whether the topic has any content worth consolidating.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_is_stable() {
        let a = Topic::new("Install Guide", "Download the installer", "https://x.dev/a");
        let b = Topic::new("install guide ", "different body", "https://x.dev/a");
        assert_eq!(a.source_id(), b.source_id());
        assert!(a.source_id().starts_with("https://x.dev/a#"));
    }

    #[test]
    fn test_source_id_differs_per_title() {
        let a = Topic::new("Install Guide", "x", "https://x.dev/a");
        let b = Topic::new("Uninstall Guide", "x", "https://x.dev/a");
        assert_ne!(a.source_id(), b.source_id());
    }

    #[test]
    fn test_deserialize_without_category() {
        let topic: Topic = serde_json::from_str(
            r#"{"title":"T","content":"C","source_url":"https://x.dev"}"#,
        )
        .unwrap();
        assert_eq!(topic.category, None);
    }
}
