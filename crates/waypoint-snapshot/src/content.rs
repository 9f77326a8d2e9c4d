//! Checksums and the content-addressed store.
//!
//! Unique file bodies are written once to `snapshots/deduplicated/<checksum>`.
//! The file name is the hex SHA-256 of the bytes, never the original path,
//! so identical content from different files shares one stored copy.

use crate::{SnapshotError, SnapshotResult};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use waypoint_util::fs::{atomic_write, remove_if_exists};

/// Directory (relative to the data dir) holding stored content.
pub const CONTENT_DIR: &str = "snapshots/deduplicated";

/// Hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Whether `s` looks like a checksum produced by [`checksum`].
pub fn is_checksum(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Content-addressed file store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
    scratch_dir: PathBuf,
}

impl ContentStore {
    /// Create a store rooted at `<data_dir>/snapshots/deduplicated`.
    pub fn new(data_dir: &Path, scratch_dir: PathBuf) -> Self {
        Self {
            dir: data_dir.join(CONTENT_DIR),
            scratch_dir,
        }
    }

    /// Directory holding the stored files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path content with this checksum is (or would be) stored at.
    pub fn path_for(&self, checksum: &str) -> PathBuf {
        self.dir.join(checksum)
    }

    /// Store `bytes` under `checksum`.
    ///
    /// Storing a checksum that is already present is a no-op returning the
    /// existing path.
    pub async fn store(&self, checksum: &str, bytes: &[u8]) -> SnapshotResult<PathBuf> {
        if !is_checksum(checksum) {
            return Err(SnapshotError::integrity(
                self.dir.join(checksum),
                "not a checksum",
            ));
        }

        let path = self.path_for(checksum);
        if fs::try_exists(&path).await? {
            return Ok(path);
        }

        atomic_write(&path, bytes, Some(&self.scratch_dir)).await?;
        debug!(checksum, size = bytes.len(), "Stored content");
        Ok(path)
    }

    /// Read stored content.
    pub async fn read(&self, path: &Path) -> SnapshotResult<Vec<u8>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SnapshotError::ContentMissing {
                checksum: file_checksum_name(path),
            }),
            Err(e) => Err(SnapshotError::Io(e)),
        }
    }

    /// Read stored content and check it still hashes to `expected`.
    pub async fn read_verified(&self, path: &Path, expected: &str) -> SnapshotResult<Vec<u8>> {
        let bytes = self.read(path).await?;
        let actual = checksum(&bytes);
        if actual != expected {
            return Err(SnapshotError::integrity(
                path,
                format!("stored content hashes to {actual}, expected {expected}"),
            ));
        }
        Ok(bytes)
    }

    /// Whether content is stored at `path`.
    pub async fn contains(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Remove stored content. Returns `true` if a file was removed.
    pub async fn remove(&self, checksum: &str) -> SnapshotResult<bool> {
        Ok(remove_if_exists(&self.path_for(checksum)).await?)
    }

    /// Checksums of every stored file.
    pub async fn list(&self) -> SnapshotResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        let mut checksums = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_checksum(name) {
                    checksums.push(name.to_string());
                }
            }
        }
        checksums.sort();
        Ok(checksums)
    }
}

fn file_checksum_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ContentStore {
        ContentStore::new(dir.path(), dir.path().join("temp"))
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum(b"x"), checksum(b"x"));
        assert_ne!(checksum(b"x"), checksum(b"y"));
        assert!(is_checksum(&checksum(b"abc")));
        assert!(!is_checksum("ABC"));
    }

    #[tokio::test]
    async fn test_store_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let bodies: [&[u8]; 3] = [b"", b"hello", &[0, 159, 146, 150]];
        for body in bodies {
            let sum = checksum(body);
            let path = store.store(&sum, body).await.unwrap();
            assert_eq!(store.read(&path).await.unwrap(), body);
            assert_eq!(store.read_verified(&path, &sum).await.unwrap(), body);
        }
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let sum = checksum(b"same");

        let first = store.store(&sum, b"same").await.unwrap();
        let second = store.store(&sum, b"same").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list().await.unwrap(), vec![sum]);
    }

    #[tokio::test]
    async fn test_read_missing_and_corrupted() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let sum = checksum(b"gone");

        let err = store.read(&store.path_for(&sum)).await.unwrap_err();
        assert!(matches!(err, SnapshotError::ContentMissing { checksum: missing } if missing == sum));

        let path = store.store(&sum, b"gone").await.unwrap();
        fs::write(&path, b"tampered").await.unwrap();
        let err = store.read_verified(&path, &sum).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Integrity { .. }));

        assert!(store.remove(&sum).await.unwrap());
        assert!(!store.contains(&path).await);
    }
}
