//! Snapshot builder: turns a file set into a [`SnapshotCollection`].
//!
//! For each candidate file the builder emits one of:
//! - an incremental entry, when the path held the same bytes at its last
//!   capture,
//! - a deduplicated entry, when the bytes are already in the content store,
//! - a full entry otherwise (the bytes are also stored and registered).

use crate::cache::CaptureCache;
use crate::config::{SnapshotConfig, SnapshotOptions};
use crate::content::{checksum, ContentStore};
use crate::language::detect_language;
use crate::SnapshotResult;
use serde::Serialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use waypoint_storage::{
    ContentEncoding, FileMetadata, FileSnapshot, FileSnapshotPayload, SnapshotCollection,
};
use waypoint_util::path::{normalize, relative_to, to_slash};
use waypoint_util::GlobSet;

/// A file left out of a capture, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of a capture.
#[derive(Debug, Clone)]
pub struct SnapshotCapture {
    pub collection: SnapshotCollection,
    /// Files that matched but could not be captured.
    pub skipped: Vec<SkippedFile>,
}

impl SnapshotCapture {
    /// `true` when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.collection.snapshots.is_empty()
    }
}

pub(crate) struct SnapshotBuilder<'a> {
    root: &'a Path,
    data_dir: &'a Path,
    options: &'a SnapshotOptions,
    content: &'a ContentStore,
    excludes: GlobSet,
    excluded_files: HashSet<PathBuf>,
    binary_extensions: HashSet<String>,
    max_file_size: u64,
}

impl<'a> SnapshotBuilder<'a> {
    pub(crate) fn new(
        root: &'a Path,
        data_dir: &'a Path,
        config: &SnapshotConfig,
        options: &'a SnapshotOptions,
        content: &'a ContentStore,
    ) -> SnapshotResult<Self> {
        let excludes = GlobSet::new(
            config
                .exclude_patterns
                .iter()
                .chain(options.exclude_patterns.iter()),
        )?;
        let excluded_files = options
            .exclude_files
            .iter()
            .map(|p| absolute(root, p))
            .collect();
        let binary_extensions = config
            .binary_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(Self {
            root,
            data_dir,
            options,
            content,
            excludes,
            excluded_files,
            binary_extensions,
            max_file_size: options.max_file_size.unwrap_or(config.max_file_size),
        })
    }

    /// Enumerate candidate files as absolute paths.
    ///
    /// With an explicit file list, listed paths are returned even if they
    /// don't exist. Otherwise the workspace is walked, pruning excluded
    /// directories.
    pub(crate) fn candidates(&self, skipped: &mut Vec<SkippedFile>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(files) = &self.options.include_files {
            let mut seen = HashSet::new();
            for file in files {
                let path = absolute(self.root, file);
                if !path.starts_with(self.root) {
                    warn!(path = %path.display(), "Skipping file outside the workspace");
                    skipped.push(SkippedFile {
                        path,
                        reason: "outside the workspace".to_string(),
                    });
                    continue;
                }
                if seen.insert(path.clone()) && !self.is_excluded(&path) {
                    candidates.push(path);
                }
            }
            return candidates;
        }

        let walker = walkdir::WalkDir::new(self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded_dir(e.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), "Skipping unreadable entry: {e}");
                    skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if entry.file_type().is_file() && !self.is_excluded(entry.path()) {
                candidates.push(entry.path().to_path_buf());
            }
        }

        candidates
    }

    fn relative(&self, path: &Path) -> Option<String> {
        relative_to(path, self.root).map(|p| to_slash(&p))
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        if path == self.data_dir {
            return true;
        }
        self.relative(path)
            .is_some_and(|rel| self.excludes.matches_dir(&rel))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if path.starts_with(self.data_dir) || self.excluded_files.contains(path) {
            return true;
        }
        if !self.options.include_binary && self.has_binary_extension(path) {
            return true;
        }
        self.relative(path)
            .is_some_and(|rel| self.excludes.matches(&rel))
    }

    fn has_binary_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.binary_extensions.contains(&e.to_ascii_lowercase()))
    }

    /// Capture every candidate into a new collection for `message_id`.
    pub(crate) async fn build(
        &self,
        message_id: &str,
        cache: &mut CaptureCache,
    ) -> SnapshotResult<SnapshotCapture> {
        let mut skipped = Vec::new();
        let candidates = self.candidates(&mut skipped);
        let mut entries = Vec::with_capacity(candidates.len());

        for path in candidates {
            match self.read_candidate(&path).await {
                Ok(Some(bytes)) => entries.push(self.capture(path, bytes, cache).await?),
                Ok(None) => {
                    cache.forget(&path);
                    entries.push(absent_entry(path));
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "Skipping file");
                    skipped.push(SkippedFile { path, reason });
                }
            }
        }

        let collection =
            SnapshotCollection::new(message_id, entries, self.options.description.clone());
        Ok(SnapshotCapture {
            collection,
            skipped,
        })
    }

    /// Read a candidate. `Ok(None)` means the file does not exist; `Err`
    /// carries the reason it was skipped.
    async fn read_candidate(&self, path: &Path) -> Result<Option<Vec<u8>>, String> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        if !metadata.is_file() {
            return Err("not a regular file".to_string());
        }
        if metadata.len() > self.max_file_size {
            return Err(format!(
                "{} bytes exceeds the {} byte limit",
                metadata.len(),
                self.max_file_size
            ));
        }

        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        if !self.options.include_binary && std::str::from_utf8(&bytes).is_err() {
            return Err("binary content".to_string());
        }
        Ok(Some(bytes))
    }

    async fn capture(
        &self,
        path: PathBuf,
        bytes: Vec<u8>,
        cache: &mut CaptureCache,
    ) -> SnapshotResult<FileSnapshot> {
        let sum = checksum(&bytes);

        let mut registered = cache.lookup(&sum).map(Path::to_path_buf);
        if let Some(stored) = &registered {
            if !self.content.contains(stored).await {
                debug!(checksum = %sum, "Registered content is gone");
                registered = None;
            }
        }

        let (encoding, text) = ContentEncoding::encode(&bytes);
        let unchanged = cache.last_checksum(&path) == Some(sum.as_str());
        let payload = match registered {
            Some(_) if unchanged => FileSnapshotPayload::Incremental,
            Some(reference_path) => FileSnapshotPayload::Deduplicated { reference_path },
            None => {
                let stored = self.content.store(&sum, &bytes).await?;
                cache.register(&sum, stored);
                FileSnapshotPayload::Full { content: text }
            }
        };
        cache.record(&path, &sum);

        debug!(
            path = %path.display(),
            kind = payload_kind(&payload),
            "Captured file"
        );

        Ok(FileSnapshot {
            metadata: FileMetadata {
                size: bytes.len() as u64,
                encoding,
                language: detect_language(&path).map(str::to_string),
                existed: true,
            },
            file_path: path,
            timestamp: chrono::Utc::now().timestamp_millis(),
            checksum: sum,
            payload,
        })
    }
}

fn absent_entry(path: PathBuf) -> FileSnapshot {
    FileSnapshot {
        metadata: FileMetadata {
            size: 0,
            encoding: ContentEncoding::Utf8,
            language: detect_language(&path).map(str::to_string),
            existed: false,
        },
        file_path: path,
        timestamp: chrono::Utc::now().timestamp_millis(),
        checksum: checksum(b""),
        payload: FileSnapshotPayload::Full {
            content: String::new(),
        },
    }
}

fn absolute(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    }
}

pub(crate) fn payload_kind(payload: &FileSnapshotPayload) -> &'static str {
    match payload {
        FileSnapshotPayload::Full { .. } => "full",
        FileSnapshotPayload::Incremental => "incremental",
        FileSnapshotPayload::Deduplicated { .. } => "deduplicated",
    }
}
