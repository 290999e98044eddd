//! Per-source processing state.
//!
//! Each source id moves `unseen → pending → processed(success | failure | skipped)`.
//! On resume, processed ids are skipped and pending ids are reprocessed.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::checkpoint::{read_json, write_json_atomic};
use crate::error::{ConsolidationError, Result};

/// Terminal state of a processed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Failure,
    Skipped,
}

/// Serialized checkpoint contents.
///
/// A source id is in at most one of `processed` and `pending`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub processed: IndexMap<String, SourceStatus>,

    #[serde(default)]
    pub pending: IndexSet<String>,
}

/// Counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointCounts {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
    pub pending: usize,
}

/// Durable record of processed and pending sources.
#[derive(Debug)]
pub struct Checkpoint {
    path: Option<PathBuf>,
    state: CheckpointState,
    started: bool,
}

impl Checkpoint {
    /// Load from a file, starting empty if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state: CheckpointState = read_json(&path)?;
        debug!(
            path = %path.display(),
            processed = state.processed.len(),
            pending = state.pending.len(),
            "Checkpoint loaded"
        );
        Ok(Self {
            path: Some(path),
            state,
            started: false,
        })
    }

    /// A checkpoint that is never written to disk.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            state: CheckpointState::default(),
            started: false,
        }
    }

    /// File backing this checkpoint, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current contents.
    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    /// Status of a processed source.
    pub fn status(&self, source_id: &str) -> Option<SourceStatus> {
        self.state.processed.get(source_id).copied()
    }

    /// Whether the source reached a terminal state.
    pub fn is_processed(&self, source_id: &str) -> bool {
        self.state.processed.contains_key(source_id)
    }

    /// Whether the source was seen but not finished.
    pub fn is_pending(&self, source_id: &str) -> bool {
        self.state.pending.contains(source_id)
    }

    /// Pending ids in discovery order.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.state.pending.iter().map(String::as_str)
    }

    /// Record that a source was pulled from the stream.
    ///
    /// No-op for ids that are already pending or processed.
    pub fn discover(&mut self, source_id: &str) {
        self.started = true;
        if !self.is_processed(source_id) {
            self.state.pending.insert(source_id.to_string());
        }
    }

    /// Mark a source as successfully consolidated.
    pub fn mark_success(&mut self, source_id: &str) {
        self.finish(source_id, SourceStatus::Success);
    }

    /// Mark a source as failed.
    pub fn mark_failure(&mut self, source_id: &str) {
        self.finish(source_id, SourceStatus::Failure);
    }

    /// Mark a source as skipped (empty, or already absorbed).
    pub fn mark_skipped(&mut self, source_id: &str) {
        self.finish(source_id, SourceStatus::Skipped);
    }

    fn finish(&mut self, source_id: &str, status: SourceStatus) {
        self.started = true;
        self.state.pending.shift_remove(source_id);
        self.state.processed.insert(source_id.to_string(), status);
    }

    /// Move failed sources back to pending so a new run retries them.
    ///
    /// Only allowed before the run touches the checkpoint, which keeps
    /// `processed` monotonic within a run. Ids that are not in the failure
    /// state are ignored. Returns how many ids were moved.
    pub fn requeue<'a>(&mut self, source_ids: impl IntoIterator<Item = &'a str>) -> Result<usize> {
        if self.started {
            return Err(ConsolidationError::Config(
                "requeue is only allowed at the start of a run".into(),
            ));
        }

        let mut moved = 0;
        for id in source_ids {
            if self.status(id) == Some(SourceStatus::Failure) {
                self.state.processed.shift_remove(id);
                self.state.pending.insert(id.to_string());
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Counts by state.
    pub fn counts(&self) -> CheckpointCounts {
        let mut counts = CheckpointCounts {
            pending: self.state.pending.len(),
            ..Default::default()
        };
        for status in self.state.processed.values() {
            match status {
                SourceStatus::Success => counts.success += 1,
                SourceStatus::Failure => counts.failure += 1,
                SourceStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Write the checkpoint to disk atomically.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_json_atomic(path, &self.state)?;
        debug!(
            path = %path.display(),
            processed = self.state.processed.len(),
            pending = self.state.pending.len(),
            "Checkpoint flushed"
        );
        Ok(())
    }
}
