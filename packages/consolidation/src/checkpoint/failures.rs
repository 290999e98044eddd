//! Failure queue with bounded retry.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::checkpoint::{read_json, write_json_atomic};
use crate::error::Result;
use crate::types::topic::Topic;

/// One failed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_id: String,

    /// Last error, rendered
    pub error: String,

    /// Failed attempts so far
    pub retries: u32,

    pub last_failed_at: DateTime<Utc>,

    /// The topic itself, so a retry does not need the original stream
    pub topic: Topic,
}

/// Failed sources keyed by source id, in first-failure order.
#[derive(Debug)]
pub struct FailureQueue {
    path: Option<PathBuf>,
    records: IndexMap<String, FailureRecord>,
}

impl FailureQueue {
    /// Load from a file, starting empty if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: IndexMap<String, FailureRecord> = read_json(&path)?;
        debug!(path = %path.display(), failures = records.len(), "Failure queue loaded");
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    /// A queue that is never written to disk.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            records: IndexMap::new(),
        }
    }

    /// Record a failed attempt, bumping the retry counter.
    pub fn record(&mut self, topic: &Topic, error: &str) -> &FailureRecord {
        let source_id = topic.source_id();
        let now = Utc::now();
        self.records
            .entry(source_id.clone())
            .and_modify(|r| {
                r.retries += 1;
                r.error = error.to_string();
                r.last_failed_at = now;
                r.topic = topic.clone();
            })
            .or_insert_with(|| FailureRecord {
                source_id,
                error: error.to_string(),
                retries: 1,
                last_failed_at: now,
                topic: topic.clone(),
            })
    }

    /// Remove a record after a later success. Returns whether one existed.
    pub fn resolve(&mut self, source_id: &str) -> bool {
        self.records.shift_remove(source_id).is_some()
    }

    /// Look up a record.
    pub fn get(&self, source_id: &str) -> Option<&FailureRecord> {
        self.records.get(source_id)
    }

    /// Records whose retry counter is still below `max_retries`.
    pub fn eligible(&self, max_retries: u32) -> Vec<&FailureRecord> {
        self.records
            .values()
            .filter(|r| r.retries < max_retries)
            .collect()
    }

    /// All records.
    pub fn records(&self) -> impl Iterator<Item = &FailureRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the queue to disk atomically.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_json_atomic(path, &self.records)?;
        debug!(path = %path.display(), failures = self.records.len(), "Failure queue flushed");
        Ok(())
    }
}
