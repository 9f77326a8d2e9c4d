//! Conversation and message records.
//!
//! A conversation owns an ordered list of message ids. Each message is a
//! checkpoint that can own at most one snapshot collection.

use serde::{Deserialize, Serialize};
use waypoint_util::Identifier;

/// Lifecycle state of a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

/// Derived counters kept on the conversation record.
///
/// These must agree with the conversation's message set; the integrity
/// pass recomputes them when they drift.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default)]
    pub message_count: usize,
    /// Timestamp (ms) of the newest message, or creation time when empty.
    #[serde(default)]
    pub last_activity: i64,
}

/// A conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID (descending - newer sorts first).
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: ConversationStatus,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Creation time in milliseconds.
    #[serde(default)]
    pub created: i64,

    /// Last modification time in milliseconds.
    #[serde(default)]
    pub updated: i64,

    /// Message ids in conversation order.
    #[serde(default)]
    pub messages: Vec<String>,

    #[serde(default)]
    pub metadata: ConversationMetadata,
}

impl Conversation {
    /// Create a new, empty conversation.
    pub fn new(title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Identifier::conversation(),
            title: title.into(),
            status: ConversationStatus::Active,
            tags: Vec::new(),
            created: now,
            updated: now,
            messages: Vec::new(),
            metadata: ConversationMetadata {
                message_count: 0,
                last_activity: now,
            },
        }
    }

    /// Add tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Update the last modified time.
    pub fn touch(&mut self) {
        self.updated = chrono::Utc::now().timestamp_millis();
    }

    /// Position of a message in this conversation.
    pub fn position_of(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m == message_id)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

/// A message in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub conversation_id: String,

    #[serde(default)]
    pub role: MessageRole,

    #[serde(default)]
    pub content: String,

    /// Creation time in milliseconds.
    #[serde(default)]
    pub timestamp: i64,

    /// The snapshot collection captured at this checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl Message {
    /// Create a new message.
    pub fn new(
        conversation_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Identifier::message(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            snapshot_id: None,
        }
    }
}

/// Filter for [`crate::MetadataStore::get_conversations`].
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    /// Case-insensitive text matched against titles and message content.
    pub search: Option<String>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    /// Inclusive range (ms) on the conversation's last update.
    pub updated_between: Option<(i64, i64)>,
}

impl ConversationFilter {
    pub fn status(mut self, status: ConversationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn updated_between(mut self, from: i64, to: i64) -> Self {
        self.updated_between = Some((from, to));
        self
    }

    /// Lowercased search needle, if any.
    pub(crate) fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}
