//! Integrity checks for persisted records.
//!
//! Minor issues (stale counters, missing optional fields) can be repaired
//! in place. Major issues (missing ids, impossible timestamps, duplicate
//! paths) block saving the record.

use crate::conversation::{Conversation, Message};
use crate::snapshot::{FileSnapshotPayload, SnapshotCollection};
use serde::Serialize;
use std::fmt;

/// Tolerance for capture timestamps ahead of the local clock.
pub const CLOCK_SKEW_TOLERANCE_MS: i64 = 5 * 60 * 1000;

/// Which kind of record an issue concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Conversation,
    Message,
    Snapshot,
    Index,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Conversation => "conversation",
            EntityKind::Message => "message",
            EntityKind::Snapshot => "snapshot",
            EntityKind::Index => "index",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Repairable without losing information.
    Minor,
    /// Needs a human; blocks the save.
    Major,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityIssue {
    pub entity: EntityKind,
    pub id: String,
    pub severity: IssueSeverity,
    pub description: String,
}

impl IntegrityIssue {
    pub(crate) fn minor(entity: EntityKind, id: &str, description: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.to_string(),
            severity: IssueSeverity::Minor,
            description: description.into(),
        }
    }

    pub(crate) fn major(entity: EntityKind, id: &str, description: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.to_string(),
            severity: IssueSeverity::Major,
            description: description.into(),
        }
    }

    pub fn is_major(&self) -> bool {
        self.severity == IssueSeverity::Major
    }
}

/// Result of an integrity pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    /// `true` when every issue found is minor.
    pub can_auto_repair: bool,
}

impl IntegrityReport {
    pub fn new(issues: Vec<IntegrityIssue>) -> Self {
        let can_auto_repair = issues.iter().all(|i| !i.is_major());
        Self {
            issues,
            can_auto_repair,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn major(&self) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues.iter().filter(|i| i.is_major())
    }
}

/// Check a conversation record on its own.
///
/// `last_activity` can only be validated against real message timestamps;
/// see [`conversation_activity_issue`].
pub fn check_conversation(conversation: &Conversation) -> Vec<IntegrityIssue> {
    let id = conversation.id.as_str();
    let mut issues = Vec::new();

    if id.is_empty() {
        issues.push(IntegrityIssue::major(
            EntityKind::Conversation,
            id,
            "missing conversation id",
        ));
    }
    if conversation.metadata.message_count != conversation.messages.len() {
        issues.push(IntegrityIssue::minor(
            EntityKind::Conversation,
            id,
            format!(
                "message_count is {} but {} messages are attached",
                conversation.metadata.message_count,
                conversation.messages.len()
            ),
        ));
    }
    if conversation.created <= 0 {
        issues.push(IntegrityIssue::minor(
            EntityKind::Conversation,
            id,
            "missing creation time",
        ));
    }
    if conversation.updated < conversation.created {
        issues.push(IntegrityIssue::minor(
            EntityKind::Conversation,
            id,
            "updated precedes created",
        ));
    }

    issues
}

/// Compare `last_activity` with the newest message timestamp.
pub fn conversation_activity_issue(
    conversation: &Conversation,
    newest_message: Option<i64>,
) -> Option<IntegrityIssue> {
    let expected = newest_message.unwrap_or(conversation.created);
    (conversation.metadata.last_activity != expected).then(|| {
        IntegrityIssue::minor(
            EntityKind::Conversation,
            &conversation.id,
            format!(
                "last_activity is {} but the newest message is at {}",
                conversation.metadata.last_activity, expected
            ),
        )
    })
}

/// Fix the minor issues [`check_conversation`] reports.
///
/// Returns `true` if anything changed.
pub fn repair_conversation(conversation: &mut Conversation, newest_message: Option<i64>) -> bool {
    let mut changed = false;

    if conversation.created <= 0 {
        conversation.created = conversation
            .updated
            .max(newest_message.unwrap_or(0))
            .max(1);
        changed = true;
    }
    if conversation.updated < conversation.created {
        conversation.updated = conversation.created;
        changed = true;
    }
    if conversation.metadata.message_count != conversation.messages.len() {
        conversation.metadata.message_count = conversation.messages.len();
        changed = true;
    }
    let expected = newest_message.unwrap_or(conversation.created);
    if conversation.metadata.last_activity != expected {
        conversation.metadata.last_activity = expected;
        changed = true;
    }

    changed
}

/// Check a message record.
pub fn check_message(message: &Message) -> Vec<IntegrityIssue> {
    let id = message.id.as_str();
    let mut issues = Vec::new();

    if id.is_empty() {
        issues.push(IntegrityIssue::major(
            EntityKind::Message,
            id,
            "missing message id",
        ));
    }
    if message.conversation_id.is_empty() {
        issues.push(IntegrityIssue::major(
            EntityKind::Message,
            id,
            "message is not attached to a conversation",
        ));
    }
    if message.timestamp <= 0 {
        issues.push(IntegrityIssue::minor(
            EntityKind::Message,
            id,
            "missing timestamp",
        ));
    }

    issues
}

/// Check a snapshot collection against the clock `now` (ms).
pub fn check_snapshot(collection: &SnapshotCollection, now: i64) -> Vec<IntegrityIssue> {
    let id = collection.id.as_str();
    let mut issues = Vec::new();

    if id.is_empty() {
        issues.push(IntegrityIssue::major(
            EntityKind::Snapshot,
            id,
            "missing snapshot id",
        ));
    }
    if collection.message_id.is_empty() {
        issues.push(IntegrityIssue::major(
            EntityKind::Snapshot,
            id,
            "snapshot is not attached to a message",
        ));
    }
    for path in collection.duplicate_paths() {
        issues.push(IntegrityIssue::major(
            EntityKind::Snapshot,
            id,
            format!("{} captured more than once", path.display()),
        ));
    }

    for entry in &collection.snapshots {
        let path = entry.file_path.display();
        if entry.timestamp <= 0 || entry.timestamp > now + CLOCK_SKEW_TOLERANCE_MS {
            issues.push(IntegrityIssue::major(
                EntityKind::Snapshot,
                id,
                format!("{path}: capture time {} is out of range", entry.timestamp),
            ));
        }
        if !is_hex_checksum(&entry.checksum) {
            issues.push(IntegrityIssue::major(
                EntityKind::Snapshot,
                id,
                format!("{path}: malformed checksum"),
            ));
        }
        if !entry.file_path.is_absolute() {
            issues.push(IntegrityIssue::major(
                EntityKind::Snapshot,
                id,
                format!("{path}: path is not absolute"),
            ));
        }
        if let FileSnapshotPayload::Deduplicated { reference_path } = &entry.payload {
            if reference_path.as_os_str().is_empty() {
                issues.push(IntegrityIssue::major(
                    EntityKind::Snapshot,
                    id,
                    format!("{path}: deduplicated entry has no reference path"),
                ));
            }
        }
    }

    issues
}

fn is_hex_checksum(checksum: &str) -> bool {
    checksum.len() == 64 && checksum.bytes().all(|b| b.is_ascii_hexdigit())
}
