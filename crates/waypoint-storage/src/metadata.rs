//! Metadata store for conversations, messages and snapshot collections.
//!
//! Records are laid out as:
//! ```text
//! base_dir/
//!   conversations/<id>.json
//!   messages/<id>.json
//!   snapshots/<id>.json            # collection, or manifest when optimized
//!   snapshots/<id>/<n>.content     # per-entry content of optimized collections
//!   indexes/*.json                 # id -> summary maps
//!   temp/                          # scratch files for atomic writes
//! ```
//!
//! Every save/delete of a record holds the lock for `"<type>-<id>"`. Locks
//! are always taken in the order snapshot -> message -> conversation. The
//! message-to-collection link has its own lock, held while the previous
//! collection of that message is removed and the message is updated.

use crate::conversation::{Conversation, ConversationFilter, Message};
use crate::index::{ConversationSummary, Index, MessageSummary, SnapshotSummary};
use crate::integrity::{self, EntityKind, IntegrityIssue, IntegrityReport};
use crate::snapshot::{FileSnapshotPayload, SnapshotCollection};
use crate::{ConversationStore, JsonStorage, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use waypoint_util::{Identifier, KeyedLocks};
use waypoint_util::id::IdPrefix;

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const SNAPSHOTS: &str = "snapshots";
/// Lock namespace for the message to collection link.
const MESSAGE_LINK: &str = "message-snapshot";

/// Configuration for the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Serialized size (bytes) above which a collection is stored as a
    /// manifest plus one content file per entry.
    pub optimize_threshold_bytes: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            optimize_threshold_bytes: 1024 * 1024,
        }
    }
}

/// On-disk form of a snapshot collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSnapshot {
    /// When set, full entries carry empty content and the bytes live in
    /// `snapshots/<id>/<n>.content`.
    #[serde(default)]
    optimized: bool,
    #[serde(flatten)]
    collection: SnapshotCollection,
}

fn content_file(index: usize) -> String {
    format!("{index}.content")
}

/// Durable storage for conversations, messages and snapshot collections.
pub struct MetadataStore<S: Storage = JsonStorage> {
    storage: S,
    config: MetadataConfig,
    locks: KeyedLocks,
    conversations: Index<ConversationSummary>,
    messages: Index<MessageSummary>,
    snapshots: Index<SnapshotSummary>,
    message_snapshots: Index<String>,
}

impl<S: Storage> MetadataStore<S> {
    /// Open a store, removing scratch files from interrupted writes and
    /// loading the index files (rebuilding them if they are missing).
    pub async fn open(storage: S, config: MetadataConfig) -> StorageResult<Self> {
        storage.cleanup_scratch().await?;

        let store = Self {
            storage,
            config,
            locks: KeyedLocks::new(),
            conversations: Index::new("conversations"),
            messages: Index::new("messages"),
            snapshots: Index::new("snapshots"),
            message_snapshots: Index::new("message-snapshots"),
        };

        let mut complete = true;
        complete &= store.conversations.load(&store.storage).await?;
        complete &= store.messages.load(&store.storage).await?;
        complete &= store.snapshots.load(&store.storage).await?;
        complete &= store.message_snapshots.load(&store.storage).await?;

        if !complete {
            store.rebuild_indexes().await?;
        }

        Ok(store)
    }

    /// The underlying storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn lock(&self, entity: EntityKind, id: &str) -> waypoint_util::KeyedGuard {
        self.locks.acquire(KeyedLocks::key(entity.as_str(), id)).await
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Save a conversation.
    ///
    /// Stale counters are repaired before writing; a missing id is rejected.
    pub async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<Conversation> {
        let mut conversation = conversation.clone();
        reject_major(
            "conversation",
            &conversation.id,
            integrity::check_conversation(&conversation),
        )?;

        let _guard = self.lock(EntityKind::Conversation, &conversation.id).await;
        let newest = self.newest_message_timestamp(&conversation.messages).await;
        if integrity::repair_conversation(&mut conversation, newest) {
            debug!(conversation_id = %conversation.id, "Repaired conversation counters on save");
        }
        self.write_conversation(&conversation).await?;

        Ok(conversation)
    }

    async fn write_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        self.storage
            .write(&[CONVERSATIONS, &conversation.id], conversation)
            .await?;
        self.conversations
            .insert(
                &self.storage,
                &conversation.id,
                ConversationSummary::from(conversation),
            )
            .await
    }

    /// Load a conversation, silently repairing stale counters.
    pub async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>> {
        let Some(mut conversation) = self
            .storage
            .read::<Conversation>(&[CONVERSATIONS, id])
            .await?
        else {
            return Ok(None);
        };

        if conversation.id.is_empty() {
            return Err(StorageError::integrity(
                "conversation",
                id,
                "record has no id",
            ));
        }

        let newest = self.newest_message_timestamp(&conversation.messages).await;
        let stale = !integrity::check_conversation(&conversation).is_empty()
            || integrity::conversation_activity_issue(&conversation, newest).is_some();
        if stale {
            let _guard = self.lock(EntityKind::Conversation, id).await;
            // Re-read under the lock; a concurrent save may have fixed it.
            if let Some(mut current) = self.storage.read::<Conversation>(&[CONVERSATIONS, id]).await? {
                let newest = self.newest_message_timestamp(&current.messages).await;
                if integrity::repair_conversation(&mut current, newest) {
                    info!(conversation_id = %id, "Repaired stale conversation metadata");
                    self.write_conversation(&current).await?;
                }
                conversation = current;
            }
        }

        Ok(Some(conversation))
    }

    /// Delete a conversation along with its messages and their snapshots.
    pub async fn delete_conversation(&self, id: &str) -> StorageResult<bool> {
        let message_ids = {
            let _guard = self.lock(EntityKind::Conversation, id).await;
            let Some(conversation) = self.storage.read::<Conversation>(&[CONVERSATIONS, id]).await? else {
                return Ok(false);
            };
            self.storage.remove(&[CONVERSATIONS, id]).await?;
            self.conversations.remove(&self.storage, id).await?;
            conversation.messages
        };

        for message_id in &message_ids {
            self.delete_message(message_id).await?;
        }

        info!(conversation_id = %id, messages = message_ids.len(), "Deleted conversation");
        Ok(true)
    }

    /// List conversations matching a filter, most recently updated first.
    pub async fn get_conversations(&self, filter: &ConversationFilter) -> StorageResult<Vec<Conversation>> {
        let needle = filter.needle();
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .values()
            .await
            .into_iter()
            .filter(|s| filter.status.map_or(true, |status| s.status == status))
            .filter(|s| filter.tags.iter().all(|t| s.tags.contains(t)))
            .filter(|s| {
                filter
                    .updated_between
                    .map_or(true, |(from, to)| s.updated >= from && s.updated <= to)
            })
            .collect();
        summaries.sort_by(|a, b| b.updated.cmp(&a.updated));

        let mut results = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(conversation) = self.get_conversation(&summary.id).await? else {
                warn!(conversation_id = %summary.id, "Index points at a missing conversation");
                continue;
            };

            if let Some(needle) = &needle {
                if !conversation.title.to_lowercase().contains(needle.as_str())
                    && !self.any_message_contains(&conversation.messages, needle).await?
                {
                    continue;
                }
            }

            results.push(conversation);
        }

        Ok(results)
    }

    async fn any_message_contains(&self, message_ids: &[String], needle: &str) -> StorageResult<bool> {
        for id in message_ids {
            if let Some(message) = self.storage.read::<Message>(&[MESSAGES, id]).await? {
                if message.content.to_lowercase().contains(needle) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn newest_message_timestamp(&self, message_ids: &[String]) -> Option<i64> {
        let mut newest = None;
        for id in message_ids {
            if let Some(summary) = self.messages.get(id).await {
                newest = newest.max(Some(summary.timestamp));
            }
        }
        newest
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Save a message and attach it to its conversation.
    ///
    /// The conversation must exist. Its message list stays ordered by
    /// message timestamp and its counters are updated.
    pub async fn save_message(&self, message: &Message) -> StorageResult<()> {
        reject_major("message", &message.id, integrity::check_message(message))?;

        let _message_guard = self.lock(EntityKind::Message, &message.id).await;
        if self.conversations.get(&message.conversation_id).await.is_none() {
            return Err(StorageError::not_found(
                "conversation",
                &message.conversation_id,
            ));
        }

        let mut message = message.clone();
        // The snapshot pointer is owned by the snapshot index.
        message.snapshot_id = self.message_snapshots.get(&message.id).await;
        self.storage.write(&[MESSAGES, &message.id], &message).await?;
        self.messages
            .insert(&self.storage, &message.id, MessageSummary::from(&message))
            .await?;

        let _conversation_guard = self
            .lock(EntityKind::Conversation, &message.conversation_id)
            .await;
        let Some(mut conversation) = self
            .storage
            .read::<Conversation>(&[CONVERSATIONS, &message.conversation_id])
            .await?
        else {
            return Err(StorageError::not_found(
                "conversation",
                &message.conversation_id,
            ));
        };

        if conversation.position_of(&message.id).is_none() {
            let mut insert_at = conversation.messages.len();
            for (i, id) in conversation.messages.iter().enumerate().rev() {
                match self.messages.get(id).await {
                    Some(other) if other.timestamp > message.timestamp => insert_at = i,
                    _ => break,
                }
            }
            conversation.messages.insert(insert_at, message.id.clone());
        }
        let newest = self.newest_message_timestamp(&conversation.messages).await;
        integrity::repair_conversation(&mut conversation, newest);
        conversation.touch();
        self.write_conversation(&conversation).await?;

        debug!(message_id = %message.id, conversation_id = %message.conversation_id, "Saved message");
        Ok(())
    }

    /// Load a message.
    pub async fn get_message(&self, id: &str) -> StorageResult<Option<Message>> {
        let message = self.storage.read::<Message>(&[MESSAGES, id]).await?;
        if let Some(message) = &message {
            reject_major("message", id, integrity::check_message(message))?;
        }
        Ok(message)
    }

    /// Load the messages of a conversation in conversation order.
    pub async fn get_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>> {
        let conversation = self
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| StorageError::not_found("conversation", conversation_id))?;

        let mut messages = Vec::with_capacity(conversation.messages.len());
        for id in &conversation.messages {
            match self.get_message(id).await? {
                Some(message) => messages.push(message),
                None => warn!(message_id = %id, conversation_id, "Conversation lists a missing message"),
            }
        }
        Ok(messages)
    }

    /// Delete a message, its snapshot collection and its slot in the
    /// owning conversation.
    pub async fn delete_message(&self, id: &str) -> StorageResult<bool> {
        let message = {
            let _guard = self.lock(EntityKind::Message, id).await;
            let Some(message) = self.storage.read::<Message>(&[MESSAGES, id]).await? else {
                return Ok(false);
            };
            self.storage.remove(&[MESSAGES, id]).await?;
            self.messages.remove(&self.storage, id).await?;
            message
        };

        if let Some(snapshot_id) = self.message_snapshots.get(id).await {
            self.delete_snapshot(&snapshot_id).await?;
        }

        let _guard = self
            .lock(EntityKind::Conversation, &message.conversation_id)
            .await;
        if let Some(mut conversation) = self
            .storage
            .read::<Conversation>(&[CONVERSATIONS, &message.conversation_id])
            .await?
        {
            conversation.messages.retain(|m| m != id);
            let newest = self.newest_message_timestamp(&conversation.messages).await;
            integrity::repair_conversation(&mut conversation, newest);
            conversation.touch();
            self.write_conversation(&conversation).await?;
        }

        debug!(message_id = %id, "Deleted message");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Snapshot collections
    // ------------------------------------------------------------------

    /// Save a snapshot collection and link it to its message.
    ///
    /// A message owns at most one collection; a previous collection for the
    /// same message is deleted.
    pub async fn save_snapshot(&self, collection: &SnapshotCollection) -> StorageResult<SnapshotSummary> {
        let now = chrono::Utc::now().timestamp_millis();
        reject_major(
            "snapshot",
            &collection.id,
            integrity::check_snapshot(collection, now),
        )?;

        let summary = {
            let _guard = self.lock(EntityKind::Snapshot, &collection.id).await;

            let serialized_len = serde_json::to_vec(collection)?.len();
            let optimized = serialized_len > self.config.optimize_threshold_bytes;
            if optimized {
                self.write_optimized(collection).await?;
            } else {
                self.storage.remove_raw_prefix(&[SNAPSHOTS, &collection.id]).await?;
                let stored = StoredSnapshot {
                    optimized: false,
                    collection: collection.clone(),
                };
                self.storage.write(&[SNAPSHOTS, &collection.id], &stored).await?;
            }

            let summary = SnapshotSummary::new(collection, optimized);
            self.snapshots
                .insert(&self.storage, &collection.id, summary.clone())
                .await?;
            summary
        };

        {
            let _link = self.link_lock(&collection.message_id).await;
            let previous = self.message_snapshots.get(&collection.message_id).await;
            self.message_snapshots
                .insert(&self.storage, &collection.message_id, collection.id.clone())
                .await?;
            if let Some(previous) = previous.filter(|p| p != &collection.id) {
                debug!(snapshot_id = %previous, message_id = %collection.message_id, "Replacing previous snapshot");
                self.remove_snapshot_record(&previous).await?;
            }
            self.set_message_snapshot(&collection.message_id, Some(collection.id.clone()))
                .await?;
        }

        info!(
            snapshot_id = %collection.id,
            message_id = %collection.message_id,
            files = collection.snapshots.len(),
            optimized = summary.optimized,
            "Saved snapshot collection"
        );
        Ok(summary)
    }

    async fn write_optimized(&self, collection: &SnapshotCollection) -> StorageResult<()> {
        self.storage.remove_raw_prefix(&[SNAPSHOTS, &collection.id]).await?;

        let mut manifest = collection.clone();
        for (i, entry) in manifest.snapshots.iter_mut().enumerate() {
            if let FileSnapshotPayload::Full { content } = &mut entry.payload {
                let name = content_file(i);
                self.storage
                    .write_raw(&[SNAPSHOTS, &collection.id, &name], content.as_bytes())
                    .await?;
                content.clear();
            }
        }

        let stored = StoredSnapshot {
            optimized: true,
            collection: manifest,
        };
        self.storage.write(&[SNAPSHOTS, &collection.id], &stored).await
    }

    async fn read_stored(&self, id: &str) -> StorageResult<Option<StoredSnapshot>> {
        self.storage.read::<StoredSnapshot>(&[SNAPSHOTS, id]).await
    }

    /// Load a snapshot collection, reassembling optimized storage.
    pub async fn get_snapshot(&self, id: &str) -> StorageResult<Option<SnapshotCollection>> {
        let Some(stored) = self.read_stored(id).await? else {
            return Ok(None);
        };

        let mut collection = stored.collection;
        if collection.id.is_empty() {
            return Err(StorageError::integrity("snapshot", id, "record has no id"));
        }

        if stored.optimized {
            for (i, entry) in collection.snapshots.iter_mut().enumerate() {
                if let FileSnapshotPayload::Full { content } = &mut entry.payload {
                    let name = content_file(i);
                    let bytes = self
                        .storage
                        .read_raw(&[SNAPSHOTS, id, &name])
                        .await?
                        .ok_or_else(|| {
                            StorageError::integrity(
                                "snapshot",
                                id,
                                format!("missing content file {name}"),
                            )
                        })?;
                    *content = String::from_utf8(bytes).map_err(|e| {
                        StorageError::integrity("snapshot", id, format!("{name}: {e}"))
                    })?;
                }
            }
        }

        Ok(Some(collection))
    }

    /// Load the collection owned by a message.
    pub async fn get_snapshot_for_message(&self, message_id: &str) -> StorageResult<Option<SnapshotCollection>> {
        match self.message_snapshots.get(message_id).await {
            Some(snapshot_id) => self.get_snapshot(&snapshot_id).await,
            None => Ok(None),
        }
    }

    /// Index summary of a collection, without loading its content.
    pub async fn get_snapshot_summary(&self, id: &str) -> Option<SnapshotSummary> {
        self.snapshots.get(id).await
    }

    /// All collection summaries, newest first.
    pub async fn list_snapshots(&self) -> Vec<SnapshotSummary> {
        let mut summaries = self.snapshots.values().await;
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        summaries
    }

    /// Delete a snapshot collection and unlink it from its message.
    pub async fn delete_snapshot(&self, id: &str) -> StorageResult<bool> {
        let Some(message_id) = self.remove_snapshot_record(id).await? else {
            return Ok(false);
        };

        let _link = self.link_lock(&message_id).await;
        if self.message_snapshots.get(&message_id).await.as_deref() == Some(id) {
            self.message_snapshots.remove(&self.storage, &message_id).await?;
            self.set_message_snapshot(&message_id, None).await?;
        }
        Ok(true)
    }

    /// Remove a collection's record, content files and index entry, leaving
    /// the message link alone. Returns the owning message id.
    async fn remove_snapshot_record(&self, id: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock(EntityKind::Snapshot, id).await;
        let Some(stored) = self.read_stored(id).await? else {
            return Ok(None);
        };

        self.storage.remove(&[SNAPSHOTS, id]).await?;
        self.storage.remove_raw_prefix(&[SNAPSHOTS, id]).await?;
        self.snapshots.remove(&self.storage, id).await?;
        info!(snapshot_id = %id, "Deleted snapshot collection");
        Ok(Some(stored.collection.message_id))
    }

    /// Serializes changes to which collection a message owns. Taken after
    /// any snapshot lock on the new collection is released and before the
    /// message lock.
    async fn link_lock(&self, message_id: &str) -> waypoint_util::KeyedGuard {
        self.locks.acquire(KeyedLocks::key(MESSAGE_LINK, message_id)).await
    }

    async fn set_message_snapshot(&self, message_id: &str, snapshot_id: Option<String>) -> StorageResult<()> {
        let _guard = self.lock(EntityKind::Message, message_id).await;
        let Some(mut message) = self.storage.read::<Message>(&[MESSAGES, message_id]).await? else {
            return Ok(());
        };
        if message.snapshot_id == snapshot_id {
            return Ok(());
        }
        message.snapshot_id = snapshot_id;
        self.storage.write(&[MESSAGES, message_id], &message).await?;
        self.messages
            .insert(&self.storage, message_id, MessageSummary::from(&message))
            .await
    }

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------

    /// Rebuild every index file by scanning the record directories.
    pub async fn rebuild_indexes(&self) -> StorageResult<()> {
        let mut conversations = BTreeMap::new();
        for key in self.storage.list(&[CONVERSATIONS]).await? {
            let id = &key[1];
            if let Some(conversation) = self.storage.read::<Conversation>(&[CONVERSATIONS, id]).await? {
                conversations.insert(id.clone(), ConversationSummary::from(&conversation));
            }
        }

        let mut messages = BTreeMap::new();
        for key in self.storage.list(&[MESSAGES]).await? {
            let id = &key[1];
            if let Some(message) = self.storage.read::<Message>(&[MESSAGES, id]).await? {
                messages.insert(id.clone(), MessageSummary::from(&message));
            }
        }

        let mut snapshots = BTreeMap::new();
        let mut message_snapshots = BTreeMap::new();
        for key in self.storage.list(&[SNAPSHOTS]).await? {
            let id = &key[1];
            if !Identifier::has_prefix(id, IdPrefix::Snapshot) {
                continue;
            }
            if let Some(stored) = self.read_stored(id).await? {
                message_snapshots.insert(stored.collection.message_id.clone(), id.clone());
                snapshots.insert(id.clone(), SnapshotSummary::new(&stored.collection, stored.optimized));
            }
        }

        info!(
            conversations = conversations.len(),
            messages = messages.len(),
            snapshots = snapshots.len(),
            "Rebuilt metadata indexes"
        );

        self.conversations.replace(&self.storage, conversations).await?;
        self.messages.replace(&self.storage, messages).await?;
        self.snapshots.replace(&self.storage, snapshots).await?;
        self.message_snapshots.replace(&self.storage, message_snapshots).await
    }

    /// Scan every record and report problems without changing anything.
    pub async fn check_integrity(&self) -> StorageResult<IntegrityReport> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut issues = Vec::new();

        for summary in self.conversations.values().await {
            let Some(conversation) = self
                .storage
                .read::<Conversation>(&[CONVERSATIONS, &summary.id])
                .await?
            else {
                issues.push(IntegrityIssue::minor(
                    EntityKind::Index,
                    &summary.id,
                    "conversation index entry has no record",
                ));
                continue;
            };
            issues.extend(integrity::check_conversation(&conversation));
            let newest = self.newest_message_timestamp(&conversation.messages).await;
            issues.extend(integrity::conversation_activity_issue(&conversation, newest));
            for message_id in &conversation.messages {
                if self.messages.get(message_id).await.is_none() {
                    issues.push(IntegrityIssue::minor(
                        EntityKind::Conversation,
                        &conversation.id,
                        format!("lists missing message {message_id}"),
                    ));
                }
            }
        }

        for summary in self.messages.values().await {
            match self.storage.read::<Message>(&[MESSAGES, &summary.id]).await? {
                Some(message) => issues.extend(integrity::check_message(&message)),
                None => issues.push(IntegrityIssue::minor(
                    EntityKind::Index,
                    &summary.id,
                    "message index entry has no record",
                )),
            }
        }

        for (kind, id) in self.unindexed_records().await? {
            issues.push(IntegrityIssue::minor(
                EntityKind::Index,
                &id,
                format!("{kind} record missing from index"),
            ));
        }

        for summary in self.snapshots.values().await {
            match self.get_snapshot(&summary.id).await {
                Ok(Some(collection)) => issues.extend(integrity::check_snapshot(&collection, now)),
                Ok(None) => issues.push(IntegrityIssue::minor(
                    EntityKind::Index,
                    &summary.id,
                    "snapshot index entry has no record",
                )),
                Err(StorageError::Integrity { reason, .. }) => issues.push(IntegrityIssue::major(
                    EntityKind::Snapshot,
                    &summary.id,
                    reason,
                )),
                Err(StorageError::Json(e)) => issues.push(IntegrityIssue::major(
                    EntityKind::Snapshot,
                    &summary.id,
                    format!("malformed record: {e}"),
                )),
                Err(e) => return Err(e),
            }
        }

        Ok(IntegrityReport::new(issues))
    }

    /// Records present in storage that their index does not list.
    async fn unindexed_records(&self) -> StorageResult<Vec<(EntityKind, String)>> {
        let mut missing = Vec::new();
        for key in self.storage.list(&[CONVERSATIONS]).await? {
            if self.conversations.get(&key[1]).await.is_none() {
                missing.push((EntityKind::Conversation, key[1].clone()));
            }
        }
        for key in self.storage.list(&[MESSAGES]).await? {
            if self.messages.get(&key[1]).await.is_none() {
                missing.push((EntityKind::Message, key[1].clone()));
            }
        }
        for key in self.storage.list(&[SNAPSHOTS]).await? {
            let id = &key[1];
            if Identifier::has_prefix(id, IdPrefix::Snapshot) && self.snapshots.get(id).await.is_none() {
                missing.push((EntityKind::Snapshot, id.clone()));
            }
        }
        Ok(missing)
    }

    /// Fix every minor issue: reindex unlisted records, drop dangling index
    /// entries and message references, recompute conversation counters.
    ///
    /// Returns the number of records rewritten.
    pub async fn repair(&self) -> StorageResult<usize> {
        let mut repaired = 0;

        let unindexed = self.unindexed_records().await?.len();
        if unindexed > 0 {
            self.rebuild_indexes().await?;
            repaired += unindexed;
        }

        for summary in self.messages.values().await {
            if !self.storage.exists(&[MESSAGES, &summary.id]).await? {
                self.messages.remove(&self.storage, &summary.id).await?;
                repaired += 1;
            }
        }
        for summary in self.snapshots.values().await {
            if self.read_stored(&summary.id).await?.is_none() {
                self.snapshots.remove(&self.storage, &summary.id).await?;
                if self.message_snapshots.get(&summary.message_id).await.as_deref() == Some(summary.id.as_str()) {
                    self.message_snapshots.remove(&self.storage, &summary.message_id).await?;
                }
                repaired += 1;
            }
        }

        for summary in self.conversations.values().await {
            let _guard = self.lock(EntityKind::Conversation, &summary.id).await;
            let Some(mut conversation) = self
                .storage
                .read::<Conversation>(&[CONVERSATIONS, &summary.id])
                .await?
            else {
                self.conversations.remove(&self.storage, &summary.id).await?;
                repaired += 1;
                continue;
            };
            if conversation.id.is_empty() {
                continue;
            }

            let before = conversation.messages.len();
            let mut kept = Vec::with_capacity(before);
            for id in conversation.messages.drain(..) {
                if self.messages.get(&id).await.is_some() {
                    kept.push(id);
                }
            }
            conversation.messages = kept;

            let newest = self.newest_message_timestamp(&conversation.messages).await;
            let changed = integrity::repair_conversation(&mut conversation, newest);
            if changed || conversation.messages.len() != before {
                self.write_conversation(&conversation).await?;
                repaired += 1;
            }
        }

        if repaired > 0 {
            info!(repaired, "Repaired metadata records");
        }
        Ok(repaired)
    }
}

fn reject_major(entity: &'static str, id: &str, issues: Vec<IntegrityIssue>) -> StorageResult<()> {
    match issues.into_iter().find(IntegrityIssue::is_major) {
        Some(issue) => Err(StorageError::integrity(entity, id, issue.description)),
        None => Ok(()),
    }
}

#[async_trait]
impl<S: Storage> ConversationStore for MetadataStore<S> {
    async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>> {
        MetadataStore::get_conversation(self, id).await
    }

    async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<Conversation> {
        MetadataStore::save_conversation(self, conversation).await
    }

    async fn get_message(&self, id: &str) -> StorageResult<Option<Message>> {
        MetadataStore::get_message(self, id).await
    }

    async fn get_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>> {
        MetadataStore::get_messages(self, conversation_id).await
    }

    async fn save_message(&self, message: &Message) -> StorageResult<()> {
        MetadataStore::save_message(self, message).await
    }

    async fn delete_message(&self, id: &str) -> StorageResult<bool> {
        MetadataStore::delete_message(self, id).await
    }
}
