//! Metadata index and persistence layer for waypoint.
//!
//! This crate provides:
//! - A key-value storage abstraction with a JSON file backend and an
//!   in-memory backend (for testing)
//! - The persisted record types: conversations, messages and snapshot
//!   collections
//! - [`MetadataStore`], which stores those records behind per-entity locks
//!   and keeps secondary index files for fast lookup
//! - Integrity checks for records loaded from disk

pub mod conversation;
pub mod error;
pub mod index;
pub mod integrity;
pub mod json;
pub mod memory;
pub mod metadata;
pub mod snapshot;

pub use conversation::{
    Conversation, ConversationFilter, ConversationMetadata, ConversationStatus, Message,
    MessageRole,
};
pub use error::{StorageError, StorageResult};
pub use index::{ConversationSummary, MessageSummary, SnapshotSummary};
pub use integrity::{EntityKind, IntegrityIssue, IntegrityReport, IssueSeverity};
pub use json::JsonStorage;
pub use memory::MemoryStorage;
pub use metadata::{MetadataConfig, MetadataStore};
pub use snapshot::{
    ContentEncoding, FileMetadata, FileSnapshot, FileSnapshotPayload, SnapshotCollection,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A trait for key-value storage backends.
///
/// Keys are represented as path segments, e.g., `["messages", "msg_123"]`.
/// Values are serialized/deserialized as JSON. Raw byte values live in a
/// separate namespace and are addressed by the same kind of keys.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value from storage.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>>;

    /// Write a value to storage.
    ///
    /// The write is atomic: a reader observes either the previous value or
    /// the new one, never a partially written record.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T)
        -> StorageResult<()>;

    /// Remove a value from storage. Removing a missing key is not an error.
    async fn remove(&self, key: &[&str]) -> StorageResult<()>;

    /// List all keys directly under a prefix.
    ///
    /// Returns the full key paths for each item.
    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>>;

    /// Check if a key exists.
    async fn exists(&self, key: &[&str]) -> StorageResult<bool>;

    /// Read raw bytes stored under a key.
    async fn read_raw(&self, key: &[&str]) -> StorageResult<Option<Vec<u8>>>;

    /// Write raw bytes under a key, atomically.
    async fn write_raw(&self, key: &[&str], bytes: &[u8]) -> StorageResult<()>;

    /// Remove every raw value stored below a prefix.
    async fn remove_raw_prefix(&self, prefix: &[&str]) -> StorageResult<()>;

    /// Remove leftovers from interrupted writes.
    ///
    /// Returns the number of orphaned scratch files removed.
    async fn cleanup_scratch(&self) -> StorageResult<usize> {
        Ok(0)
    }
}

/// The conversation/message store consumed by rollback and the UI layer.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a conversation.
    async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>>;

    /// Save a conversation, returning the stored (possibly repaired) record.
    async fn save_conversation(&self, conversation: &Conversation) -> StorageResult<Conversation>;

    /// Load a message.
    async fn get_message(&self, id: &str) -> StorageResult<Option<Message>>;

    /// Load the messages of a conversation in conversation order.
    async fn get_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>>;

    /// Save a message and attach it to its conversation.
    async fn save_message(&self, message: &Message) -> StorageResult<()>;

    /// Delete a message (and its snapshot collection).
    async fn delete_message(&self, id: &str) -> StorageResult<bool>;
}
