//! Workspace backups.
//!
//! A backup mirrors every workspace file (minus excludes) under
//! `backups/<id>/files/` and describes it in `backups/<id>/manifest.json`.
//! The manifest is written last, so a directory without one is an
//! interrupted backup: listing ignores it and [`BackupManager::sweep_incomplete`]
//! deletes it.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use waypoint_storage::json::SCRATCH_DIR;
use waypoint_util::fs::atomic_write;
use waypoint_util::path::{normalize, relative_to, resolve_within, to_slash};
use waypoint_util::{GlobSet, Identifier, Operation, TimingGuard};

/// Directory under the data dir holding backups.
pub const BACKUP_DIR: &str = "backups";
const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// Backup retention and selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Oldest backups beyond this count are pruned after each backup.
    pub max_backups: usize,

    /// Glob patterns excluded from backups.
    pub exclude_patterns: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_backups: 10,
            exclude_patterns: waypoint_snapshot::SnapshotConfig::default().exclude_patterns,
        }
    }
}

/// A file recorded in a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub size: u64,
}

/// Description of a backup, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    /// Creation time in milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub workspace_root: PathBuf,
    pub files: Vec<BackupEntry>,
}

/// Listing entry for a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub id: String,
    pub timestamp: i64,
    pub description: Option<String>,
    pub file_count: usize,
}

impl From<&BackupManifest> for BackupInfo {
    fn from(manifest: &BackupManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            timestamp: manifest.timestamp,
            description: manifest.description.clone(),
            file_count: manifest.files.len(),
        }
    }
}

/// Creates and replays whole-workspace backups.
pub struct BackupManager {
    root: PathBuf,
    data_dir: PathBuf,
    backups_dir: PathBuf,
    scratch_dir: PathBuf,
    config: BackupConfig,
    excludes: GlobSet,
}

impl BackupManager {
    pub fn new(
        root: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        config: BackupConfig,
    ) -> CoreResult<Self> {
        let root = normalize(&root.into());
        let data_dir = normalize(&data_dir.into());
        let excludes = GlobSet::new(&config.exclude_patterns)?;

        Ok(Self {
            backups_dir: data_dir.join(BACKUP_DIR),
            scratch_dir: data_dir.join(SCRATCH_DIR),
            root,
            data_dir,
            config,
            excludes,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Back up the workspace. Returns the new backup id.
    ///
    /// Files that cannot be read are left out with a warning.
    pub async fn create_backup(&self, description: Option<&str>) -> CoreResult<String> {
        let id = Identifier::backup();
        let timing = TimingGuard::new(Operation::Backup, id.as_str());
        let dir = self.backups_dir.join(&id);

        let manifest = match self.write_backup(&id, &dir, description).await {
            Ok(manifest) => manifest,
            Err(e) => {
                timing.fail();
                remove_partial(&dir).await;
                return Err(e);
            }
        };
        info!(backup_id = %id, files = manifest.files.len(), "Created backup");

        if let Err(e) = self.prune().await {
            warn!("Failed to prune old backups: {e}");
        }
        Ok(id)
    }

    async fn write_backup(
        &self,
        id: &str,
        dir: &Path,
        description: Option<&str>,
    ) -> CoreResult<BackupManifest> {
        let files_dir = dir.join(FILES_DIR);

        let mut files = Vec::new();
        for path in self.candidates() {
            let Some(rel) = relative_to(&path, &self.root) else {
                continue;
            };
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), "Leaving unreadable file out of backup: {e}");
                    continue;
                }
            };
            atomic_write(&files_dir.join(&rel), &bytes, Some(&self.scratch_dir)).await?;
            files.push(BackupEntry {
                path: to_slash(&rel),
                size: bytes.len() as u64,
            });
        }

        let manifest = BackupManifest {
            id: id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            description: description.map(str::to_string),
            workspace_root: self.root.clone(),
            files,
        };
        let json = serde_json::to_vec_pretty(&manifest)?;
        atomic_write(&dir.join(MANIFEST_FILE), &json, Some(&self.scratch_dir)).await?;
        Ok(manifest)
    }

    /// Delete backup directories that have no manifest, left behind by a
    /// backup that was interrupted. Returns how many were removed.
    ///
    /// Only safe while no backup is being written, so it runs when a
    /// workspace is opened.
    pub async fn sweep_incomplete(&self) -> CoreResult<usize> {
        let mut entries = match fs::read_dir(&self.backups_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir = entry.path();
            if fs::try_exists(dir.join(MANIFEST_FILE)).await? {
                continue;
            }
            warn!(backup_id = %entry.file_name().to_string_lossy(), "Removing incomplete backup");
            fs::remove_dir_all(&dir).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Write every file recorded in a backup back into the workspace.
    ///
    /// Files created after the backup are left in place. Returns the number
    /// of files restored.
    pub async fn restore_backup(&self, backup_id: &str) -> CoreResult<usize> {
        let _timing = TimingGuard::new(Operation::BackupRestore, backup_id);
        let manifest = self.manifest(backup_id).await?;
        let files_dir = self.backups_dir.join(backup_id).join(FILES_DIR);

        for entry in &manifest.files {
            let target = resolve_within(&self.root, Path::new(&entry.path)).map_err(|e| {
                CoreError::InvalidBackup {
                    id: backup_id.to_string(),
                    reason: e.to_string(),
                }
            })?;
            let bytes = fs::read(files_dir.join(&entry.path)).await.map_err(|e| {
                CoreError::InvalidBackup {
                    id: backup_id.to_string(),
                    reason: format!("{}: {e}", entry.path),
                }
            })?;
            atomic_write(&target, &bytes, Some(&self.scratch_dir)).await?;
            debug!(path = %entry.path, "Restored file from backup");
        }

        info!(backup_id, files = manifest.files.len(), "Restored backup");
        Ok(manifest.files.len())
    }

    /// Complete backups, newest first.
    pub async fn list_backups(&self) -> CoreResult<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        let mut entries = match fs::read_dir(&self.backups_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(backups),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.manifest(&id).await {
                Ok(manifest) => backups.push(BackupInfo::from(&manifest)),
                Err(e) => warn!(backup_id = %id, "Ignoring incomplete backup: {e}"),
            }
        }

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(backups)
    }

    pub async fn delete_backup(&self, backup_id: &str) -> CoreResult<()> {
        let dir = self.backup_dir(backup_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(backup_id, "Deleted backup");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("backup", backup_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the oldest backups beyond `max_backups`.
    pub async fn prune(&self) -> CoreResult<usize> {
        let backups = self.list_backups().await?;
        let mut removed = 0;
        for old in backups.iter().skip(self.config.max_backups) {
            self.delete_backup(&old.id).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "Pruned old backups");
        }
        Ok(removed)
    }

    /// Load a backup's manifest.
    pub async fn manifest(&self, backup_id: &str) -> CoreResult<BackupManifest> {
        let path = self.backup_dir(backup_id)?.join(MANIFEST_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::not_found("backup", backup_id));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| CoreError::InvalidBackup {
            id: backup_id.to_string(),
            reason: e.to_string(),
        })
    }

    fn backup_dir(&self, backup_id: &str) -> CoreResult<PathBuf> {
        if backup_id.is_empty() || backup_id.contains(['/', '\\']) || backup_id.starts_with('.') {
            return Err(CoreError::not_found("backup", backup_id));
        }
        Ok(self.backups_dir.join(backup_id))
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let walker = walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded(e.path(), e.file_type().is_dir()));

        walker
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry during backup: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if path.starts_with(&self.data_dir) {
            return true;
        }
        let Some(rel) = relative_to(path, &self.root).map(|p| to_slash(&p)) else {
            return true;
        };
        if is_dir {
            self.excludes.matches_dir(&rel)
        } else {
            self.excludes.matches(&rel)
        }
    }
}

async fn remove_partial(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(path = %dir.display(), "Failed to remove partial backup: {e}");
        }
        _ => {}
    }
}
