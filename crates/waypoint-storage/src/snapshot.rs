//! Snapshot collection records.
//!
//! A [`SnapshotCollection`] is the set of file states captured for one
//! message. Each [`FileSnapshot`] carries its content in one of three
//! forms, see [`FileSnapshotPayload`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use waypoint_util::Identifier;

use crate::{StorageError, StorageResult};

/// How a captured file's bytes are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileSnapshotPayload {
    /// Content is stored inline.
    Full { content: String },
    /// Byte-identical to the previous capture of the same path; resolve the
    /// content through the checksum.
    Incremental,
    /// Same bytes as content already in the content store.
    Deduplicated { reference_path: PathBuf },
}

/// Text encoding of inline content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

impl ContentEncoding {
    /// Encode raw bytes, picking base64 for anything that isn't UTF-8.
    pub fn encode(bytes: &[u8]) -> (Self, String) {
        match std::str::from_utf8(bytes) {
            Ok(text) => (Self::Utf8, text.to_string()),
            Err(_) => (Self::Base64, BASE64.encode(bytes)),
        }
    }

    /// Decode inline content back into raw bytes.
    pub fn decode(self, content: &str) -> StorageResult<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(content.as_bytes().to_vec()),
            Self::Base64 => BASE64
                .decode(content)
                .map_err(|e| StorageError::integrity("file snapshot", "content", e.to_string())),
        }
    }
}

/// Per-file metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Size in bytes of the captured content.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub encoding: ContentEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// `false` means the file did not exist at capture time; restoring it
    /// deletes the target.
    #[serde(default = "default_true")]
    pub existed: bool,
}

fn default_true() -> bool {
    true
}

/// One file's captured state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Absolute path of the file.
    pub file_path: PathBuf,
    /// Capture time in milliseconds.
    pub timestamp: i64,
    /// Hex SHA-256 of the raw file bytes.
    pub checksum: String,
    pub payload: FileSnapshotPayload,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl FileSnapshot {
    pub fn is_incremental(&self) -> bool {
        matches!(self.payload, FileSnapshotPayload::Incremental)
    }

    pub fn is_deduplicated(&self) -> bool {
        matches!(self.payload, FileSnapshotPayload::Deduplicated { .. })
    }

    /// Inline content of a full entry.
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            FileSnapshotPayload::Full { content } => Some(content),
            _ => None,
        }
    }

    /// Content-store path a deduplicated entry points at.
    pub fn reference_path(&self) -> Option<&Path> {
        match &self.payload {
            FileSnapshotPayload::Deduplicated { reference_path } => Some(reference_path),
            _ => None,
        }
    }
}

/// Files captured together for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCollection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message_id: String,
    /// Capture time in milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub snapshots: Vec<FileSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SnapshotCollection {
    /// Create a collection with a fresh id.
    pub fn new(
        message_id: impl Into<String>,
        snapshots: Vec<FileSnapshot>,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Identifier::snapshot(),
            message_id: message_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            snapshots,
            description,
        }
    }

    /// Look up the entry for a path.
    pub fn get(&self, path: &Path) -> Option<&FileSnapshot> {
        self.snapshots.iter().find(|s| s.file_path == path)
    }

    /// Sum of the captured file sizes.
    pub fn total_size(&self) -> u64 {
        self.snapshots.iter().map(|s| s.metadata.size).sum()
    }

    /// Paths that appear more than once.
    pub fn duplicate_paths(&self) -> Vec<&Path> {
        let mut seen = HashSet::new();
        self.snapshots
            .iter()
            .filter(|s| !seen.insert(s.file_path.as_path()))
            .map(|s| s.file_path.as_path())
            .collect()
    }
}
