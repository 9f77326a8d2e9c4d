//! Snapshot restorer: resolves captured entries back to bytes and writes
//! them to the workspace.

use crate::cache::CaptureCache;
use crate::content::{checksum, ContentStore};
use crate::{SnapshotError, SnapshotResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use waypoint_storage::{FileSnapshot, FileSnapshotPayload, SnapshotCollection};
use waypoint_util::fs::{atomic_write, remove_if_exists};

/// One step of a restore: recreate a file or remove it.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    /// Write the captured content of this entry.
    Write(FileSnapshot),
    /// The file did not exist at capture time.
    Delete(PathBuf),
}

impl FileOperation {
    /// Plan the operations for a collection, in collection order.
    ///
    /// `only` restricts the plan to the given absolute paths.
    pub fn plan(collection: &SnapshotCollection, only: Option<&[PathBuf]>) -> Vec<Self> {
        collection
            .snapshots
            .iter()
            .filter(|entry| only.map_or(true, |paths| paths.contains(&entry.file_path)))
            .map(|entry| {
                if entry.metadata.existed {
                    Self::Write(entry.clone())
                } else {
                    Self::Delete(entry.file_path.clone())
                }
            })
            .collect()
    }

    /// Path this operation touches.
    pub fn path(&self) -> &Path {
        match self {
            Self::Write(entry) => &entry.file_path,
            Self::Delete(path) => path,
        }
    }
}

/// What happened to one file during a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Restored,
    Deleted,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRestore {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

/// Per-file results of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub files: Vec<FileRestore>,
}

impl RestoreReport {
    /// Paths written or deleted.
    pub fn modified(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(|f| !matches!(f.outcome, FileOutcome::Skipped { .. }))
            .map(|f| f.path.as_path())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FileRestore> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Skipped { .. }))
    }

    /// `true` when no file was skipped.
    pub fn is_complete(&self) -> bool {
        self.skipped().next().is_none()
    }

    /// Turn any skipped file into [`SnapshotError::PartialFailure`].
    pub fn into_result(self) -> SnapshotResult<Self> {
        let failed = self.skipped().count();
        if failed == 0 {
            Ok(self)
        } else {
            Err(SnapshotError::PartialFailure {
                failed,
                total: self.files.len(),
            })
        }
    }
}

/// Resolves entries through the content store and deduplication map.
pub struct SnapshotRestorer<'a> {
    content: &'a ContentStore,
    cache: &'a CaptureCache,
}

impl<'a> SnapshotRestorer<'a> {
    pub fn new(content: &'a ContentStore, cache: &'a CaptureCache) -> Self {
        Self { content, cache }
    }

    /// Resolve an entry to the bytes it captured.
    pub async fn resolve(&self, entry: &FileSnapshot) -> SnapshotResult<Vec<u8>> {
        match &entry.payload {
            FileSnapshotPayload::Full { content } => {
                let bytes = entry
                    .metadata
                    .encoding
                    .decode(content)
                    .map_err(|e| SnapshotError::integrity(&entry.file_path, e.to_string()))?;
                let actual = checksum(&bytes);
                if actual != entry.checksum {
                    return Err(SnapshotError::integrity(
                        &entry.file_path,
                        format!("content hashes to {actual}, expected {}", entry.checksum),
                    ));
                }
                Ok(bytes)
            }
            FileSnapshotPayload::Incremental => {
                let stored = self.cache.lookup(&entry.checksum).ok_or_else(|| {
                    SnapshotError::ContentMissing {
                        checksum: entry.checksum.clone(),
                    }
                })?;
                self.content.read_verified(stored, &entry.checksum).await
            }
            FileSnapshotPayload::Deduplicated { reference_path } => {
                self.content
                    .read_verified(reference_path, &entry.checksum)
                    .await
            }
        }
    }

    /// Apply one operation, writing to `target` instead of the captured
    /// path. Errors are returned to the caller.
    pub async fn apply_to(&self, operation: &FileOperation, target: &Path) -> SnapshotResult<FileOutcome> {
        match operation {
            FileOperation::Write(entry) => {
                let bytes = self.resolve(entry).await?;
                atomic_write(target, &bytes, None).await?;
                debug!(path = %target.display(), size = bytes.len(), "Restored file");
                Ok(FileOutcome::Restored)
            }
            FileOperation::Delete(_) => {
                if remove_if_exists(target).await? {
                    debug!(path = %target.display(), "Deleted file absent at capture time");
                }
                Ok(FileOutcome::Deleted)
            }
        }
    }

    /// Apply one operation at its captured path.
    pub async fn apply(&self, operation: &FileOperation) -> SnapshotResult<FileOutcome> {
        self.apply_to(operation, operation.path()).await
    }

    /// Apply every operation, skipping (and reporting) files that fail.
    ///
    /// `target_of` maps a captured path to the path to write; `None` skips
    /// the file.
    pub async fn restore<F>(
        &self,
        snapshot_id: &str,
        operations: &[FileOperation],
        target_of: F,
    ) -> RestoreReport
    where
        F: Fn(&Path) -> Option<PathBuf>,
    {
        let mut report = RestoreReport {
            snapshot_id: snapshot_id.to_string(),
            files: Vec::with_capacity(operations.len()),
        };

        for operation in operations {
            let captured = operation.path();
            let outcome = match target_of(captured) {
                Some(target) => match self.apply_to(operation, &target).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(path = %captured.display(), "Skipping file during restore: {e}");
                        FileOutcome::Skipped {
                            reason: e.to_string(),
                        }
                    }
                },
                None => FileOutcome::Skipped {
                    reason: "outside the restore target".to_string(),
                },
            };
            report.files.push(FileRestore {
                path: captured.to_path_buf(),
                outcome,
            });
        }

        report
    }
}
