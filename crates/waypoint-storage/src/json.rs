//! On-disk [`Storage`] backend: one file per key below a base directory.
//!
//! ```text
//! ["messages", "msg_1"]                    -> messages/msg_1.json
//! ["snapshots", "snp_1", "0.content"] raw  -> snapshots/snp_1/0.content
//! ```
//!
//! Writes land in a scratch file under `temp/` and are renamed into place.
//! A crash mid-write leaves an orphan in `temp/` for
//! [`Storage::cleanup_scratch`], never a truncated record.

use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use waypoint_util::fs::{atomic_write, clean_scratch_dir, remove_if_exists};

/// Scratch directory for in-flight writes, relative to the base path.
pub const SCRATCH_DIR: &str = "temp";

const RECORD_EXT: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    /// JSON records, stored with a `.json` suffix.
    Record,
    /// Raw bytes, stored under the key as-is.
    Raw,
}

#[derive(Debug, Clone)]
pub struct JsonStorage {
    base_path: PathBuf,
}

impl JsonStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.base_path.join(SCRATCH_DIR)
    }

    /// Reject keys that could escape the base directory or collide with
    /// the scratch area.
    pub(crate) fn validate_key(key: &[&str]) -> StorageResult<()> {
        let Some(first) = key.first() else {
            return Err(StorageError::invalid_key("key is empty"));
        };
        if *first == SCRATCH_DIR {
            return Err(StorageError::invalid_key(format!(
                "'{SCRATCH_DIR}' is reserved"
            )));
        }
        if let Some(bad) = key
            .iter()
            .find(|c| c.is_empty() || **c == "." || **c == ".." || c.contains(['/', '\\']))
        {
            return Err(StorageError::invalid_key(format!(
                "invalid key component '{bad}'"
            )));
        }
        Ok(())
    }

    fn locate(&self, key: &[&str], namespace: Namespace) -> StorageResult<PathBuf> {
        Self::validate_key(key)?;
        let mut path: PathBuf = key.iter().fold(self.base_path.clone(), |p, c| p.join(c));
        if namespace == Namespace::Record {
            // `set_extension` would eat dotted names such as `message.snapshots`.
            let mut name = path.into_os_string();
            name.push(".");
            name.push(RECORD_EXT);
            path = PathBuf::from(name);
        }
        Ok(path)
    }

    async fn load(path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        atomic_write(path, bytes, Some(&self.scratch_dir())).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let path = self.locate(key, Namespace::Record)?;
        debug!(path = %path.display(), "read");
        Self::load(&path)
            .await?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        let path = self.locate(key, Namespace::Record)?;
        debug!(path = %path.display(), "write");
        self.store(&path, &serde_json::to_vec_pretty(value)?).await
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        let path = self.locate(key, Namespace::Record)?;
        debug!(path = %path.display(), "remove");
        remove_if_exists(&path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let dir = prefix.iter().fold(self.base_path.clone(), |p, c| p.join(c));
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_suffix(RECORD_EXT))
                .and_then(|n| n.strip_suffix('.'))
            else {
                continue;
            };
            if stem.is_empty() || !entry.file_type().await?.is_file() {
                continue;
            }
            keys.push(
                prefix
                    .iter()
                    .copied()
                    .chain(std::iter::once(stem))
                    .map(str::to_string)
                    .collect(),
            );
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        let path = self.locate(key, Namespace::Record)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read_raw(&self, key: &[&str]) -> StorageResult<Option<Vec<u8>>> {
        Self::load(&self.locate(key, Namespace::Raw)?).await
    }

    async fn write_raw(&self, key: &[&str], bytes: &[u8]) -> StorageResult<()> {
        let path = self.locate(key, Namespace::Raw)?;
        self.store(&path, bytes).await
    }

    async fn remove_raw_prefix(&self, prefix: &[&str]) -> StorageResult<()> {
        let dir = self.locate(prefix, Namespace::Raw)?;
        match fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn cleanup_scratch(&self) -> StorageResult<usize> {
        let removed = clean_scratch_dir(&self.scratch_dir()).await?;
        if removed > 0 {
            info!(removed, "Removed scratch files left by interrupted writes");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, MessageRole};
    use tempfile::TempDir;

    fn storage() -> (TempDir, JsonStorage) {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_record_layout() {
        let (dir, storage) = storage();
        let message = Message::new("cnv_1", MessageRole::User, "hello");

        storage.write(&["messages", &message.id], &message).await.unwrap();

        let path = dir.path().join("messages").join(format!("{}.json", message.id));
        assert!(path.exists());
        let read: Option<Message> = storage.read(&["messages", &message.id]).await.unwrap();
        assert_eq!(read, Some(message));
        let missing: Option<Message> = storage.read(&["messages", "msg_none"]).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_dotted_key_keeps_full_name() {
        let (dir, storage) = storage();
        storage.write(&["indexes", "message.snapshots"], &1).await.unwrap();
        assert!(dir.path().join("indexes/message.snapshots.json").exists());

        let keys = storage.list(&["indexes"]).await.unwrap();
        assert_eq!(keys, vec![vec!["indexes", "message.snapshots"]]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_dir, storage) = storage();
        storage.write(&["conversations", "cnv_1"], &"x").await.unwrap();
        assert!(storage.exists(&["conversations", "cnv_1"]).await.unwrap());

        storage.remove(&["conversations", "cnv_1"]).await.unwrap();
        storage.remove(&["conversations", "cnv_1"]).await.unwrap();
        assert!(!storage.exists(&["conversations", "cnv_1"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_skips_raw_values_and_directories() {
        let (_dir, storage) = storage();
        storage.write(&["snapshots", "snp_2"], &2).await.unwrap();
        storage.write(&["snapshots", "snp_1"], &1).await.unwrap();
        storage
            .write_raw(&["snapshots", "snp_1", "0.content"], b"raw")
            .await
            .unwrap();
        storage.write_raw(&["snapshots", "notes.txt"], b"raw").await.unwrap();

        let keys = storage.list(&["snapshots"]).await.unwrap();
        assert_eq!(
            keys,
            vec![vec!["snapshots", "snp_1"], vec!["snapshots", "snp_2"]]
        );
        assert!(storage.list(&["nothing"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_raw_values_removed_by_prefix() {
        let (_dir, storage) = storage();
        let key = ["snapshots", "snp_1", "0.content"];
        storage.write_raw(&key, b"hello").await.unwrap();
        assert_eq!(storage.read_raw(&key).await.unwrap(), Some(b"hello".to_vec()));

        storage.remove_raw_prefix(&["snapshots", "snp_1"]).await.unwrap();
        storage.remove_raw_prefix(&["snapshots", "snp_1"]).await.unwrap();
        assert_eq!(storage.read_raw(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_orphaned_scratch_does_not_affect_record() {
        let (_dir, storage) = storage();
        storage.write(&["conversations", "cnv_1"], &1).await.unwrap();

        // Crash between scratch write and rename.
        let scratch = storage.scratch_dir();
        fs::create_dir_all(&scratch).await.unwrap();
        fs::write(scratch.join(".cnv_1.json.deadbeef.tmp"), b"{\"trunc")
            .await
            .unwrap();

        let read: Option<i32> = storage.read(&["conversations", "cnv_1"]).await.unwrap();
        assert_eq!(read, Some(1));
        assert_eq!(storage.cleanup_scratch().await.unwrap(), 1);
        assert_eq!(storage.cleanup_scratch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_keys() {
        let (_dir, storage) = storage();
        for key in [
            &[][..],
            &["..", "etc", "passwd"][..],
            &["a/b"][..],
            &["a", ""][..],
            &[SCRATCH_DIR, "x"][..],
        ] {
            let err = storage.write(key, &1).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "{key:?}");
        }
    }
}
