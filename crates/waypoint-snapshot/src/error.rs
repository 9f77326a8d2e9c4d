//! Snapshot error types.

use std::path::PathBuf;
use thiserror::Error;
use waypoint_storage::StorageError;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Snapshot collection not found.
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// File is not part of a snapshot collection.
    #[error("File {path} is not in snapshot {snapshot_id}")]
    FileNotInSnapshot { snapshot_id: String, path: PathBuf },

    /// Referenced content is missing from the content store.
    #[error("Content for checksum {checksum} is not available")]
    ContentMissing { checksum: String },

    /// Stored content does not match its checksum, or a record is malformed.
    #[error("Snapshot integrity error for {path}: {reason}")]
    Integrity { path: PathBuf, reason: String },

    /// Some files of a restore could not be written.
    #[error("{failed} of {total} files could not be restored")]
    PartialFailure { failed: usize, total: usize },

    /// Invalid include/exclude pattern.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] waypoint_util::Error),

    /// Path outside the workspace root.
    #[error("Path {0} is outside the workspace")]
    OutsideWorkspace(PathBuf),

    /// Metadata store error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SnapshotError {
    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an integrity error.
    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the target entity does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = SnapshotError::PartialFailure {
            failed: 2,
            total: 5,
        };
        assert_eq!(err.to_string(), "2 of 5 files could not be restored");

        let err = SnapshotError::integrity("/w/a.txt", "checksum mismatch");
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_not_found_through_storage() {
        let err: SnapshotError = StorageError::not_found("snapshot", "snp_1").into();
        assert!(err.is_not_found());
        assert!(SnapshotError::not_found("snp_1").is_not_found());
        assert!(!SnapshotError::ContentMissing {
            checksum: "ab".into()
        }
        .is_not_found());
    }
}
