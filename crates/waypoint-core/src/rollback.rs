//! Rollback to a message checkpoint.
//!
//! The executor restores the snapshot collection owned by a message:
//!
//! ```text
//! Validating -> (BackingUp) -> Preparing -> Executing -> (RestoringBackup) -> Done
//! ```
//!
//! File operations run strictly in order and the first failure stops the
//! batch. Partially applied writes are not undone one by one; when a backup
//! was taken it is replayed instead, and files the rollback created are
//! removed.

use crate::backup::BackupManager;
use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};
use waypoint_snapshot::SnapshotManager;
use waypoint_storage::{ConversationStore, JsonStorage, Message, SnapshotCollection, Storage};
use waypoint_util::fs::remove_if_exists;
use waypoint_util::{Operation, TimingGuard};

/// Phase of a rollback, reported to [`RollbackProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPhase {
    Validating,
    BackingUp,
    Preparing,
    Executing,
    RestoringBackup,
    ResettingContext,
    Done,
}

/// Receives progress updates while a rollback runs.
pub trait RollbackProgress: Send + Sync {
    /// `fraction` is the overall progress in `0.0..=1.0`.
    fn report(&self, phase: RollbackPhase, message: &str, fraction: f32);
}

/// Discards progress updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl RollbackProgress for NoProgress {
    fn report(&self, _phase: RollbackPhase, _message: &str, _fraction: f32) {}
}

/// Options for a single rollback.
#[derive(Debug, Clone)]
pub struct RollbackOptions {
    /// Back up the whole workspace first and replay it if the rollback fails.
    pub create_backup: bool,

    /// Restrict the rollback to these files (absolute or workspace-relative).
    pub file_paths: Option<Vec<PathBuf>>,

    /// Remove the messages that follow the target message.
    pub reset_context: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            file_paths: None,
            reset_context: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackDetails {
    pub files_rolled_back: usize,
    pub context_reset: bool,
    pub duration_ms: u64,
}

/// Outcome of one rollback attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    /// `true` only when every planned file operation completed.
    pub success: bool,
    /// Files written or deleted, in the order they were processed.
    pub modified_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<RollbackDetails>,
}

/// Rolls the workspace back to the state captured at a message.
pub struct RollbackExecutor<S: Storage = JsonStorage> {
    conversations: Arc<dyn ConversationStore>,
    snapshots: Arc<SnapshotManager<S>>,
    backups: Arc<BackupManager>,
}

impl<S: Storage> RollbackExecutor<S> {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        snapshots: Arc<SnapshotManager<S>>,
        backups: Arc<BackupManager>,
    ) -> Self {
        Self {
            conversations,
            snapshots,
            backups,
        }
    }

    /// Roll back to `message_id`.
    ///
    /// Returns `Err` only when the message or its snapshot collection does
    /// not exist; every later failure is reported in the result.
    pub async fn rollback_to_message(
        &self,
        message_id: &str,
        options: &RollbackOptions,
        progress: &dyn RollbackProgress,
    ) -> CoreResult<RollbackResult> {
        let timing = TimingGuard::new(Operation::Rollback, message_id);
        info!(message_id, "Rolling back to message");

        progress.report(RollbackPhase::Validating, "Loading checkpoint", 0.0);
        let (message, collection) = self.validate(message_id).await?;

        let mut result = RollbackResult::default();

        if options.create_backup {
            progress.report(RollbackPhase::BackingUp, "Backing up workspace", 0.1);
            let description = format!("Before rollback to {message_id}");
            match self.backups.create_backup(Some(&description)).await {
                Ok(id) => result.backup_id = Some(id),
                Err(e) => {
                    warn!(message_id, "Backup failed, rollback aborted: {e}");
                    result.error = Some(format!("backup failed: {e}"));
                    return Ok(finish(result, false, &timing, progress));
                }
            }
        }

        progress.report(RollbackPhase::Preparing, "Planning file operations", 0.2);
        let operations = self
            .snapshots
            .plan_restore(&collection, options.file_paths.as_deref());
        debug!(message_id, operations = operations.len(), "Planned rollback");

        let total = operations.len().max(1) as f32;
        let mut failure = None;
        let mut created = Vec::new();
        for (i, operation) in operations.iter().enumerate() {
            let path = operation.path();
            progress.report(
                RollbackPhase::Executing,
                &path.display().to_string(),
                0.2 + 0.7 * (i as f32 / total),
            );
            let existed = fs::symlink_metadata(path).await.is_ok();
            match self.snapshots.apply(operation).await {
                Ok(_) => {
                    if !existed {
                        created.push(path.to_path_buf());
                    }
                    result.modified_files.push(path.to_path_buf());
                }
                Err(e) => {
                    warn!(path = %path.display(), "Rollback stopped: {e}");
                    failure = Some(CoreError::from(e));
                    break;
                }
            }
        }

        if let Some(e) = failure {
            result.error = Some(e.to_string());
            if let Some(backup_id) = &result.backup_id {
                progress.report(RollbackPhase::RestoringBackup, "Restoring backup", 0.9);
                match self.backups.restore_backup(backup_id).await {
                    Ok(_) => remove_created(&created).await,
                    Err(recovery) => error!(
                        backup_id = %backup_id,
                        "Failed to restore backup after rollback failure: {recovery}"
                    ),
                }
            }
            return Ok(finish(result, false, &timing, progress));
        }

        let context_reset = if options.reset_context {
            progress.report(RollbackPhase::ResettingContext, "Removing later messages", 0.95);
            self.reset_context(&message).await
        } else {
            false
        };

        let mut result = finish(result, true, &timing, progress);
        if let Some(details) = result.details.as_mut() {
            details.context_reset = context_reset;
        }
        info!(
            message_id,
            files = result.modified_files.len(),
            context_reset,
            "Rollback complete"
        );
        Ok(result)
    }

    async fn validate(&self, message_id: &str) -> CoreResult<(Message, SnapshotCollection)> {
        let message = self
            .conversations
            .get_message(message_id)
            .await?
            .ok_or_else(|| CoreError::not_found("message", message_id))?;

        let collection = match &message.snapshot_id {
            Some(snapshot_id) => match self.snapshots.get_snapshot(snapshot_id).await {
                Ok(collection) => collection,
                Err(e) if e.is_not_found() => {
                    return Err(CoreError::not_found("snapshot", snapshot_id.as_str()))
                }
                Err(e) => return Err(e.into()),
            },
            None => self
                .snapshots
                .get_snapshot_for_message(message_id)
                .await?
                .ok_or_else(|| CoreError::not_found("snapshot", message_id))?,
        };

        Ok((message, collection))
    }

    /// Remove the messages after `message` from its conversation.
    ///
    /// Returns `false` if any of them could not be removed.
    async fn reset_context(&self, message: &Message) -> bool {
        let conversation = match self
            .conversations
            .get_conversation(&message.conversation_id)
            .await
        {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                warn!(conversation_id = %message.conversation_id, "Conversation missing, context not reset");
                return false;
            }
            Err(e) => {
                warn!(conversation_id = %message.conversation_id, "Failed to load conversation: {e}");
                return false;
            }
        };

        let Some(position) = conversation.position_of(&message.id) else {
            warn!(message_id = %message.id, "Message not in its conversation, context not reset");
            return false;
        };

        let mut complete = true;
        for later in &conversation.messages[position + 1..] {
            if let Err(e) = self.conversations.delete_message(later).await {
                warn!(message_id = %later, error = %e, "Failed to delete message");
                complete = false;
            }
        }
        complete
    }
}

/// Delete files a failed rollback wrote where nothing existed before. The
/// backup predates them, so replaying it leaves them behind.
async fn remove_created(paths: &[PathBuf]) {
    for path in paths {
        match remove_if_exists(path).await {
            Ok(true) => debug!(path = %path.display(), "Removed file created by failed rollback"),
            Ok(false) => {}
            Err(e) => warn!(path = %path.display(), "Failed to remove file created by failed rollback: {e}"),
        }
    }
}

fn finish(
    mut result: RollbackResult,
    success: bool,
    timing: &TimingGuard,
    progress: &dyn RollbackProgress,
) -> RollbackResult {
    result.success = success;
    if !success {
        timing.fail();
    }
    result.details = Some(RollbackDetails {
        files_rolled_back: result.modified_files.len(),
        context_reset: false,
        duration_ms: timing.elapsed_ms(),
    });
    let message = if success { "Rollback complete" } else { "Rollback failed" };
    progress.report(RollbackPhase::Done, message, 1.0);
    result
}
