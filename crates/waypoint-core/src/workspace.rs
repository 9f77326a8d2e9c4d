//! Workspace state management.
//!
//! A workspace bundles everything waypoint keeps for one project directory:
//! the metadata store, snapshot manager, backup manager and rollback
//! executor, all rooted at `<workspace>/.waypoint`.
//!
//! # Example
//!
//! ```ignore
//! use waypoint_core::Workspace;
//!
//! let workspace = Workspace::load("/path/to/project").await?;
//!
//! let capture = workspace.create_snapshot("msg_1", &Default::default()).await?;
//! // ... files change ...
//! let result = workspace.rollback_to_message("msg_1").await?;
//! assert!(result.success);
//! ```

use crate::backup::{BackupInfo, BackupManager};
use crate::config::Config;
use crate::error::CoreResult;
use crate::rollback::{NoProgress, RollbackExecutor, RollbackOptions, RollbackProgress, RollbackResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use waypoint_snapshot::{
    RestoreReport, SnapshotCapture, SnapshotComparison, SnapshotManager, SnapshotOptions,
    SnapshotStats,
};
use waypoint_storage::{ConversationStore, JsonStorage, MetadataConfig, MetadataStore, Storage};
use waypoint_util::path::{normalize, workspace_data_dir};

/// A workspace managing snapshots, backups and rollbacks for a directory.
pub struct Workspace<S: Storage = JsonStorage> {
    inner: Arc<WorkspaceInner<S>>,
}

impl<S: Storage> Clone for Workspace<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct WorkspaceInner<S: Storage> {
    root: PathBuf,
    data_dir: PathBuf,
    config: Config,
    metadata: Arc<MetadataStore<S>>,
    snapshots: Arc<SnapshotManager<S>>,
    backups: Arc<BackupManager>,
    executor: RollbackExecutor<S>,
}

impl Workspace<JsonStorage> {
    /// Open a workspace, loading configuration from the usual sources.
    pub async fn load(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref();
        let (config, _sources) = Config::load(Some(root)).await?;
        Self::open(root, config).await
    }

    /// Open a workspace with an explicit configuration, storing metadata as
    /// JSON files under `<root>/.waypoint`.
    pub async fn open(root: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let data_dir = workspace_data_dir(root.as_ref());
        Self::with_storage(root, config, JsonStorage::new(data_dir)).await
    }
}

impl<S: Storage + 'static> Workspace<S> {
    /// Open a workspace on top of a specific storage backend.
    pub async fn with_storage(root: impl AsRef<Path>, config: Config, storage: S) -> CoreResult<Self> {
        config.validate()?;
        let root = normalize(root.as_ref());
        let data_dir = workspace_data_dir(&root);
        let snapshot_config = config.snapshot_config();

        let metadata = Arc::new(
            MetadataStore::open(
                storage,
                MetadataConfig {
                    optimize_threshold_bytes: snapshot_config.optimize_threshold_bytes,
                },
            )
            .await?,
        );
        let snapshots = Arc::new(
            SnapshotManager::open(&root, &data_dir, snapshot_config, Arc::clone(&metadata)).await?,
        );
        let backups = Arc::new(BackupManager::new(&root, &data_dir, config.backup_config())?);
        if let Err(e) = backups.sweep_incomplete().await {
            warn!("Failed to remove incomplete backups: {e}");
        }
        let conversations: Arc<dyn ConversationStore> = metadata.clone();
        let executor = RollbackExecutor::new(conversations, Arc::clone(&snapshots), Arc::clone(&backups));

        debug!(root = %root.display(), "Opened workspace");
        Ok(Self {
            inner: Arc::new(WorkspaceInner {
                root,
                data_dir,
                config,
                metadata,
                snapshots,
                backups,
                executor,
            }),
        })
    }

    /// Get the workspace root.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Get the data directory (`<root>/.waypoint`).
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The conversation/message store.
    pub fn conversations(&self) -> &Arc<MetadataStore<S>> {
        &self.inner.metadata
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager<S>> {
        &self.inner.snapshots
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.inner.backups
    }

    pub fn executor(&self) -> &RollbackExecutor<S> {
        &self.inner.executor
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn create_snapshot(
        &self,
        message_id: &str,
        options: &SnapshotOptions,
    ) -> CoreResult<SnapshotCapture> {
        Ok(self.inner.snapshots.create_snapshot(message_id, options).await?)
    }

    pub async fn restore_from_snapshot(
        &self,
        snapshot_id: &str,
        file_paths: Option<&[PathBuf]>,
    ) -> CoreResult<RestoreReport> {
        Ok(self
            .inner
            .snapshots
            .restore_from_snapshot(snapshot_id, file_paths)
            .await?)
    }

    pub async fn compare_snapshots(&self, first_id: &str, second_id: &str) -> CoreResult<SnapshotComparison> {
        Ok(self
            .inner
            .snapshots
            .compare_snapshots(first_id, second_id)
            .await?)
    }

    pub async fn get_snapshot_stats(&self, snapshot_id: &str) -> CoreResult<SnapshotStats> {
        Ok(self.inner.snapshots.get_snapshot_stats(snapshot_id).await?)
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Roll back to a message using the configured defaults.
    pub async fn rollback_to_message(&self, message_id: &str) -> CoreResult<RollbackResult> {
        let options = self.inner.config.rollback_options();
        self.inner
            .executor
            .rollback_to_message(message_id, &options, &NoProgress)
            .await
    }

    /// Roll back with explicit options and progress reporting.
    pub async fn rollback_with(
        &self,
        message_id: &str,
        options: &RollbackOptions,
        progress: &dyn RollbackProgress,
    ) -> CoreResult<RollbackResult> {
        self.inner
            .executor
            .rollback_to_message(message_id, options, progress)
            .await
    }

    // ------------------------------------------------------------------
    // Backups
    // ------------------------------------------------------------------

    pub async fn create_backup(&self, description: Option<&str>) -> CoreResult<String> {
        self.inner.backups.create_backup(description).await
    }

    pub async fn restore_backup(&self, backup_id: &str) -> CoreResult<()> {
        self.inner.backups.restore_backup(backup_id).await.map(|_| ())
    }

    pub async fn list_backups(&self) -> CoreResult<Vec<BackupInfo>> {
        self.inner.backups.list_backups().await
    }

    pub async fn delete_backup(&self, backup_id: &str) -> CoreResult<()> {
        self.inner.backups.delete_backup(backup_id).await
    }
}
