//! Volatile [`Storage`] backend used by tests and throwaway workspaces.
//!
//! Keys go through the same validation as [`JsonStorage`](crate::JsonStorage),
//! so a key rejected on disk is rejected here too.

use crate::json::JsonStorage;
use crate::{Storage, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

type Key = Vec<String>;

#[derive(Default)]
struct Entries {
    /// Serialized JSON records.
    records: BTreeMap<Key, String>,
    /// Raw byte values.
    blobs: BTreeMap<Key, Vec<u8>>,
}

/// Keeps every record in memory; nothing survives a drop.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<Entries>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of JSON records and raw values currently held.
    pub async fn counts(&self) -> (usize, usize) {
        let entries = self.entries.read().await;
        (entries.records.len(), entries.blobs.len())
    }
}

fn owned(key: &[&str]) -> Key {
    key.iter().map(|s| s.to_string()).collect()
}

fn is_below(key: &[String], prefix: &[&str]) -> bool {
    key.len() > prefix.len() && key.iter().zip(prefix).all(|(a, b)| a == b)
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        let entries = self.entries.read().await;
        entries
            .records
            .get(&owned(key))
            .map(|json| serde_json::from_str(json))
            .transpose()
            .map_err(Into::into)
    }

    async fn write<T: Serialize + Send + Sync>(
        &self,
        key: &[&str],
        value: &T,
    ) -> StorageResult<()> {
        JsonStorage::validate_key(key)?;
        let json = serde_json::to_string(value)?;
        self.entries.write().await.records.insert(owned(key), json);
        Ok(())
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        self.entries.write().await.records.remove(&owned(key));
        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .records
            .keys()
            .filter(|key| key.len() == prefix.len() + 1 && is_below(key, prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        Ok(self.entries.read().await.records.contains_key(&owned(key)))
    }

    async fn read_raw(&self, key: &[&str]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.blobs.get(&owned(key)).cloned())
    }

    async fn write_raw(&self, key: &[&str], bytes: &[u8]) -> StorageResult<()> {
        JsonStorage::validate_key(key)?;
        self.entries
            .write()
            .await
            .blobs
            .insert(owned(key), bytes.to_vec());
        Ok(())
    }

    async fn remove_raw_prefix(&self, prefix: &[&str]) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .blobs
            .retain(|key, _| !is_below(key, prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Conversation, StorageError};

    #[tokio::test]
    async fn test_records_and_blobs_are_separate() {
        let storage = MemoryStorage::new();
        let conversation = Conversation::new("scratch");

        storage
            .write(&["conversations", &conversation.id], &conversation)
            .await
            .unwrap();
        storage
            .write_raw(&["snapshots", "snp_1", "0.content"], b"bytes")
            .await
            .unwrap();

        let read: Option<Conversation> = storage
            .read(&["conversations", &conversation.id])
            .await
            .unwrap();
        assert_eq!(read.map(|c| c.id), Some(conversation.id.clone()));
        assert!(!storage.exists(&["snapshots", "snp_1", "0.content"]).await.unwrap());
        assert_eq!(storage.counts().await, (1, 1));

        storage
            .remove(&["conversations", &conversation.id])
            .await
            .unwrap();
        storage.remove(&["conversations", "never_written"]).await.unwrap();
        assert_eq!(storage.counts().await, (0, 1));
    }

    #[tokio::test]
    async fn test_list_returns_direct_children_only() {
        let storage = MemoryStorage::new();
        storage.write(&["messages", "msg_1"], &1).await.unwrap();
        storage.write(&["messages", "msg_2"], &2).await.unwrap();
        storage.write(&["messages", "nested", "x"], &3).await.unwrap();
        storage.write(&["messagesx", "msg_3"], &4).await.unwrap();

        let keys = storage.list(&["messages"]).await.unwrap();
        assert_eq!(
            keys,
            vec![vec!["messages", "msg_1"], vec!["messages", "msg_2"]]
        );
        assert_eq!(storage.list(&[]).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_remove_raw_prefix_is_segment_aware() {
        let storage = MemoryStorage::new();
        storage.write_raw(&["snapshots", "a", "0"], b"x").await.unwrap();
        storage.write_raw(&["snapshots", "ab", "0"], b"y").await.unwrap();

        storage.remove_raw_prefix(&["snapshots", "a"]).await.unwrap();

        assert_eq!(storage.read_raw(&["snapshots", "a", "0"]).await.unwrap(), None);
        assert_eq!(
            storage.read_raw(&["snapshots", "ab", "0"]).await.unwrap(),
            Some(b"y".to_vec())
        );
    }

    #[tokio::test]
    async fn test_rejects_keys_the_disk_backend_rejects() {
        let storage = MemoryStorage::new();
        for key in [&[][..], &["..", "x"][..], &["temp", "x"][..]] {
            let err = storage.write(key, &1).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)));
        }
    }
}
