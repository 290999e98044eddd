//! Crash-safe run state: the checkpoint and the failure queue.
//!
//! Both are JSON files written atomically (temp file in the same directory,
//! fsync, rename). A crash mid-write leaves the previous flush intact.

pub mod failures;
pub mod state;

pub use failures::{FailureQueue, FailureRecord};
pub use state::{Checkpoint, CheckpointCounts, CheckpointState, SourceStatus};

use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::{ConsolidationError, Result};

/// Default checkpoint file name inside a state directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Default failure-queue file name inside a state directory.
pub const FAILURES_FILE: &str = "failures.json";

fn checkpoint_err(path: &Path, e: impl std::fmt::Display) -> ConsolidationError {
    ConsolidationError::Checkpoint(format!("{}: {}", path.display(), e))
}

/// Read a JSON file, returning the default value when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| checkpoint_err(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(checkpoint_err(path, e)),
    }
}

/// Write a JSON file atomically: temp file -> fsync -> rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| checkpoint_err(path, e))?;

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| checkpoint_err(path, e))?;

    // The temp file is removed on drop if anything below fails
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| checkpoint_err(path, e))?;
    tmp.write_all(&bytes).map_err(|e| checkpoint_err(path, e))?;
    tmp.as_file().sync_all().map_err(|e| checkpoint_err(path, e))?;
    tmp.persist(path).map_err(|e| checkpoint_err(path, e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_missing_file_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let value: BTreeMap<String, u32> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_atomic_write_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        write_json_atomic(&path, &value).unwrap();
        value.insert("b".to_string(), 2u32);
        write_json_atomic(&path, &value).unwrap();

        let read: BTreeMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(read.len(), 2);

        // Only the target file remains
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = read_json::<BTreeMap<String, u32>>(&path).unwrap_err();
        assert!(matches!(err, ConsolidationError::Checkpoint(_)));
        assert!(err.is_fatal());
    }
}
