//! Secondary index files.
//!
//! Each index is a single JSON map stored at `indexes/<name>.json` and
//! mirrored in memory, so lookups by id (or by owning message) never scan
//! the record directories.

use crate::conversation::{Conversation, ConversationStatus, Message};
use crate::snapshot::SnapshotCollection;
use crate::{Storage, StorageResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Index entry for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub status: ConversationStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: i64,
    pub updated: i64,
    pub message_count: usize,
}

impl From<&Conversation> for ConversationSummary {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id.clone(),
            title: c.title.clone(),
            status: c.status,
            tags: c.tags.clone(),
            created: c.created,
            updated: c.updated,
            message_count: c.messages.len(),
        }
    }
}

/// Index entry for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub conversation_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl From<&Message> for MessageSummary {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            conversation_id: m.conversation_id.clone(),
            timestamp: m.timestamp,
            snapshot_id: m.snapshot_id.clone(),
        }
    }
}

/// Index entry for a snapshot collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub message_id: String,
    pub timestamp: i64,
    pub file_count: usize,
    pub total_size: u64,
    /// Stored as a manifest plus one content file per entry.
    #[serde(default)]
    pub optimized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SnapshotSummary {
    pub(crate) fn new(collection: &SnapshotCollection, optimized: bool) -> Self {
        Self {
            id: collection.id.clone(),
            message_id: collection.message_id.clone(),
            timestamp: collection.timestamp,
            file_count: collection.snapshots.len(),
            total_size: collection.total_size(),
            optimized,
            description: collection.description.clone(),
        }
    }
}

/// One persisted index: an id-keyed map mirrored in memory.
pub(crate) struct Index<V> {
    name: &'static str,
    entries: RwLock<BTreeMap<String, V>>,
}

impl<V> Index<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn key(&self) -> [&str; 2] {
        ["indexes", self.name]
    }

    /// Load the index file. Returns `false` if there was none.
    pub(crate) async fn load<S: Storage>(&self, storage: &S) -> StorageResult<bool> {
        let loaded: Option<BTreeMap<String, V>> = storage.read(&self.key()).await?;
        let found = loaded.is_some();
        let loaded = loaded.unwrap_or_default();
        debug!(index = self.name, entries = loaded.len(), "Loaded index");
        *self.entries.write().await = loaded;
        Ok(found)
    }

    pub(crate) async fn get(&self, id: &str) -> Option<V> {
        self.entries.read().await.get(id).cloned()
    }

    pub(crate) async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Insert or replace an entry and persist the index.
    ///
    /// The write lock is held across the file write so concurrent updates
    /// are persisted in the order they were applied.
    pub(crate) async fn insert<S: Storage>(
        &self,
        storage: &S,
        id: &str,
        value: V,
    ) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(id.to_string(), value);
        storage.write(&self.key(), &*entries).await
    }

    /// Remove an entry and persist the index. Returns the removed value.
    pub(crate) async fn remove<S: Storage>(&self, storage: &S, id: &str) -> StorageResult<Option<V>> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(id);
        if removed.is_some() {
            storage.write(&self.key(), &*entries).await?;
        }
        Ok(removed)
    }

    /// Replace the whole index and persist it.
    pub(crate) async fn replace<S: Storage>(
        &self,
        storage: &S,
        new_entries: BTreeMap<String, V>,
    ) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        *entries = new_entries;
        storage.write(&self.key(), &*entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[tokio::test]
    async fn test_index_persists_and_reloads() {
        let storage = MemoryStorage::new();
        let index: Index<String> = Index::new("message-snapshots");

        assert!(!index.load(&storage).await.unwrap());
        index
            .insert(&storage, "msg_1", "snp_1".to_string())
            .await
            .unwrap();
        index
            .insert(&storage, "msg_2", "snp_2".to_string())
            .await
            .unwrap();
        index.remove(&storage, "msg_1").await.unwrap();

        let reloaded: Index<String> = Index::new("message-snapshots");
        assert!(reloaded.load(&storage).await.unwrap());
        assert_eq!(reloaded.get("msg_1").await, None);
        assert_eq!(reloaded.get("msg_2").await, Some("snp_2".to_string()));
        assert_eq!(reloaded.len().await, 1);
    }

    #[test]
    fn test_conversation_summary_counts_messages() {
        let mut conversation = Conversation::new("t");
        conversation.messages = vec!["msg_a".into(), "msg_b".into()];
        let summary = ConversationSummary::from(&conversation);
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.title, "t");
    }
}
