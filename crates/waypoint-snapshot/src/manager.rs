//! Snapshot manager.
//!
//! Owns the content store and capture cache and persists collections
//! through the [`MetadataStore`]. Layout under the data directory:
//! ```text
//! snapshots/<snapshot_id>.json               # collection (see MetadataStore)
//! snapshots/deduplicated/<checksum>          # content store
//! snapshots/deduplication-map.json           # checksum -> stored path
//! snapshots/incremental/checksum-cache.json  # path -> last checksum
//! ```

use crate::builder::{SnapshotBuilder, SnapshotCapture};
use crate::cache::CaptureCache;
use crate::config::{SnapshotConfig, SnapshotOptions};
use crate::content::ContentStore;
use crate::restorer::{FileOperation, FileOutcome, RestoreReport, SnapshotRestorer};
use crate::{SnapshotError, SnapshotResult};
use chrono::{Duration, Utc};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use waypoint_storage::json::SCRATCH_DIR;
use waypoint_storage::{JsonStorage, SnapshotCollection, SnapshotSummary, Storage};
use waypoint_storage::MetadataStore;
use waypoint_util::path::{normalize, relative_to, to_slash};
use waypoint_util::{Operation, TimingGuard};

/// Paths that differ between two collections, keyed by checksum per path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotComparison {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl SnapshotComparison {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub file_count: usize,
    pub total_size: u64,
    /// Distinct detected languages, sorted.
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub snapshots_removed: usize,
    pub content_removed: usize,
}

/// Captures between garbage collections when `auto_cleanup` is on and
/// retention has removed nothing.
pub const GC_INTERVAL: usize = 32;

/// Creates, restores and inspects snapshot collections for one workspace.
pub struct SnapshotManager<S: Storage = JsonStorage> {
    root: PathBuf,
    data_dir: PathBuf,
    config: SnapshotConfig,
    metadata: Arc<MetadataStore<S>>,
    content: ContentStore,
    cache: Mutex<CaptureCache>,
    captures_since_gc: AtomicUsize,
}

impl<S: Storage> SnapshotManager<S> {
    /// Create a manager for the workspace at `root`, storing content under
    /// `data_dir`.
    pub async fn open(
        root: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        config: SnapshotConfig,
        metadata: Arc<MetadataStore<S>>,
    ) -> SnapshotResult<Self> {
        let root = normalize(&root.into());
        let data_dir = normalize(&data_dir.into());
        let scratch_dir = data_dir.join(SCRATCH_DIR);

        let content = ContentStore::new(&data_dir, scratch_dir.clone());
        fs::create_dir_all(content.dir()).await?;
        let cache = CaptureCache::load(&data_dir, scratch_dir).await;

        Ok(Self {
            root,
            data_dir,
            config,
            metadata,
            content,
            cache: Mutex::new(cache),
            captures_since_gc: AtomicUsize::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<MetadataStore<S>> {
        &self.metadata
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }

    /// Resolve a path given by a caller (absolute or workspace-relative).
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        }
    }

    /// Capture the workspace (or the files listed in `options`) for a
    /// message and persist the collection.
    ///
    /// A message owns one collection; capturing again replaces it.
    pub async fn create_snapshot(
        &self,
        message_id: &str,
        options: &SnapshotOptions,
    ) -> SnapshotResult<SnapshotCapture> {
        let _timing = TimingGuard::new(Operation::Snapshot, message_id);

        let capture = {
            let mut cache = self.cache.lock().await;
            let builder = SnapshotBuilder::new(
                &self.root,
                &self.data_dir,
                &self.config,
                options,
                &self.content,
            )?;
            let capture = builder.build(message_id, &mut cache).await?;
            self.metadata.save_snapshot(&capture.collection).await?;
            if let Err(e) = cache.save().await {
                warn!(snapshot_id = %capture.collection.id, "Failed to persist capture cache: {e}");
            }
            capture
        };

        if capture.is_empty() {
            warn!(message_id, skipped = capture.skipped.len(), "Snapshot captured no files");
        }
        info!(
            snapshot_id = %capture.collection.id,
            message_id,
            files = capture.collection.snapshots.len(),
            skipped = capture.skipped.len(),
            "Created snapshot"
        );

        if self.config.auto_cleanup {
            self.auto_cleanup().await;
        }

        Ok(capture)
    }

    /// Expire old collections after a capture. Content is garbage-collected
    /// only when that removed something or every [`GC_INTERVAL`] captures.
    async fn auto_cleanup(&self) {
        let expired = self.expire(self.config.max_age_days).await;
        let captures = self.captures_since_gc.fetch_add(1, Ordering::Relaxed) + 1;
        if expired == 0 && captures < GC_INTERVAL {
            return;
        }
        self.captures_since_gc.store(0, Ordering::Relaxed);
        match self.collect_garbage().await {
            Ok(removed) => debug!(expired, content_removed = removed, "Automatic cleanup finished"),
            Err(e) => warn!("Snapshot garbage collection failed: {e}"),
        }
    }

    /// Load a collection.
    pub async fn get_snapshot(&self, snapshot_id: &str) -> SnapshotResult<SnapshotCollection> {
        self.metadata
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| SnapshotError::not_found(snapshot_id))
    }

    /// Load the collection owned by a message.
    pub async fn get_snapshot_for_message(
        &self,
        message_id: &str,
    ) -> SnapshotResult<Option<SnapshotCollection>> {
        Ok(self.metadata.get_snapshot_for_message(message_id).await?)
    }

    /// Summaries of every collection, newest first.
    pub async fn list_snapshots(&self) -> Vec<SnapshotSummary> {
        self.metadata.list_snapshots().await
    }

    /// Delete a collection. Stored content is kept until
    /// [`collect_garbage`](Self::collect_garbage) finds it unreferenced.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> SnapshotResult<()> {
        if !self.metadata.delete_snapshot(snapshot_id).await? {
            return Err(SnapshotError::not_found(snapshot_id));
        }
        Ok(())
    }

    /// Plan the file operations restoring `collection`, optionally limited
    /// to `file_paths` (absolute or workspace-relative).
    pub fn plan_restore(
        &self,
        collection: &SnapshotCollection,
        file_paths: Option<&[PathBuf]>,
    ) -> Vec<FileOperation> {
        let only: Option<Vec<PathBuf>> =
            file_paths.map(|paths| paths.iter().map(|p| self.resolve_path(p)).collect());
        FileOperation::plan(collection, only.as_deref())
    }

    /// Apply a single operation, returning its error instead of skipping.
    pub async fn apply(&self, operation: &FileOperation) -> SnapshotResult<FileOutcome> {
        let cache = self.cache.lock().await;
        SnapshotRestorer::new(&self.content, &cache)
            .apply(operation)
            .await
    }

    /// Restore the captured state of a collection into the workspace.
    ///
    /// Files whose content cannot be resolved are skipped and reported.
    pub async fn restore_from_snapshot(
        &self,
        snapshot_id: &str,
        file_paths: Option<&[PathBuf]>,
    ) -> SnapshotResult<RestoreReport> {
        let _timing = TimingGuard::new(Operation::Restore, snapshot_id);
        let collection = self.get_snapshot(snapshot_id).await?;
        let operations = self.plan_restore(&collection, file_paths);

        let cache = self.cache.lock().await;
        let report = SnapshotRestorer::new(&self.content, &cache)
            .restore(snapshot_id, &operations, |p| Some(p.to_path_buf()))
            .await;

        info!(
            snapshot_id,
            restored = report.modified().count(),
            skipped = report.skipped().count(),
            "Restored snapshot"
        );
        Ok(report)
    }

    /// Restore a collection into another directory, mirroring the
    /// workspace layout below it.
    pub async fn restore_into(
        &self,
        snapshot_id: &str,
        destination: &Path,
    ) -> SnapshotResult<RestoreReport> {
        let collection = self.get_snapshot(snapshot_id).await?;
        let operations = FileOperation::plan(&collection, None);

        let cache = self.cache.lock().await;
        let report = SnapshotRestorer::new(&self.content, &cache)
            .restore(snapshot_id, &operations, |p| {
                relative_to(p, &self.root).map(|rel| destination.join(rel))
            })
            .await;
        Ok(report)
    }

    /// Compare two collections path by path.
    pub async fn compare_snapshots(
        &self,
        first_id: &str,
        second_id: &str,
    ) -> SnapshotResult<SnapshotComparison> {
        let first = present_checksums(&self.get_snapshot(first_id).await?);
        let second = present_checksums(&self.get_snapshot(second_id).await?);

        let mut comparison = SnapshotComparison::default();
        for (path, checksum) in &second {
            match first.get(path) {
                None => comparison.added.push(path.clone()),
                Some(old) if old != checksum => comparison.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        comparison.deleted = first
            .keys()
            .filter(|p| !second.contains_key(*p))
            .cloned()
            .collect();

        Ok(comparison)
    }

    pub async fn get_snapshot_stats(&self, snapshot_id: &str) -> SnapshotResult<SnapshotStats> {
        let collection = self.get_snapshot(snapshot_id).await?;
        let languages: BTreeSet<String> = collection
            .snapshots
            .iter()
            .filter_map(|s| s.metadata.language.clone())
            .collect();

        Ok(SnapshotStats {
            file_count: collection.snapshots.len(),
            total_size: collection.total_size(),
            languages: languages.into_iter().collect(),
        })
    }

    /// Unified diff between a file's captured content and its current
    /// content. Missing sides diff as empty.
    pub async fn diff_file(&self, snapshot_id: &str, path: &Path) -> SnapshotResult<String> {
        let collection = self.get_snapshot(snapshot_id).await?;
        let path = self.resolve_path(path);
        let entry = collection
            .get(&path)
            .ok_or_else(|| SnapshotError::FileNotInSnapshot {
                snapshot_id: snapshot_id.to_string(),
                path: path.clone(),
            })?;

        let old_bytes = if entry.metadata.existed {
            let cache = self.cache.lock().await;
            SnapshotRestorer::new(&self.content, &cache)
                .resolve(entry)
                .await?
        } else {
            Vec::new()
        };
        let new_bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let display = relative_to(&path, &self.root).unwrap_or_else(|| path.clone());
        Ok(generate_diff(
            &String::from_utf8_lossy(&old_bytes),
            &String::from_utf8_lossy(&new_bytes),
            &to_slash(&display),
        ))
    }

    /// Resolve every entry of a collection and report the ones whose
    /// content is missing or corrupted.
    pub async fn verify_snapshot(&self, snapshot_id: &str) -> SnapshotResult<Vec<(PathBuf, String)>> {
        let collection = self.get_snapshot(snapshot_id).await?;
        let cache = self.cache.lock().await;
        let restorer = SnapshotRestorer::new(&self.content, &cache);

        let mut problems = Vec::new();
        for entry in collection.snapshots.iter().filter(|s| s.metadata.existed) {
            if let Err(e) = restorer.resolve(entry).await {
                problems.push((entry.file_path.clone(), e.to_string()));
            }
        }
        Ok(problems)
    }

    /// Delete collections older than `max_age_days` (the configured value
    /// when `None`) and garbage-collect unreferenced content.
    pub async fn cleanup(&self, max_age_days: Option<u32>) -> SnapshotResult<CleanupStats> {
        let days = max_age_days.unwrap_or(self.config.max_age_days);
        let snapshots_removed = self.expire(days).await;
        let stats = CleanupStats {
            snapshots_removed,
            content_removed: self.collect_garbage().await?,
        };
        if stats != CleanupStats::default() {
            info!(
                snapshots_removed = stats.snapshots_removed,
                content_removed = stats.content_removed,
                "Cleaned up snapshots"
            );
        }
        Ok(stats)
    }

    /// Delete collections older than `days`. Returns how many were removed.
    async fn expire(&self, days: u32) -> usize {
        let cutoff = (Utc::now() - Duration::days(i64::from(days))).timestamp_millis();
        let mut removed = 0;
        for summary in self.metadata.list_snapshots().await {
            if summary.timestamp >= cutoff {
                continue;
            }
            match self.metadata.delete_snapshot(&summary.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(snapshot_id = %summary.id, "Failed to delete old snapshot: {e}"),
            }
        }
        removed
    }

    /// Remove stored content no remaining collection references.
    ///
    /// Returns the number of content files removed.
    pub async fn collect_garbage(&self) -> SnapshotResult<usize> {
        let mut cache = self.cache.lock().await;

        let mut live = HashSet::new();
        for summary in self.metadata.list_snapshots().await {
            let collection = self.get_snapshot(&summary.id).await?;
            live.extend(
                collection
                    .snapshots
                    .into_iter()
                    .filter(|s| s.metadata.existed)
                    .map(|s| s.checksum),
            );
        }

        let mut removed = 0;
        for checksum in self.content.list().await? {
            if !live.contains(&checksum) && self.content.remove(&checksum).await? {
                debug!(%checksum, "Removed unreferenced content");
                removed += 1;
            }
        }
        cache.retain(&live);
        cache.save().await?;

        Ok(removed)
    }
}

fn present_checksums(collection: &SnapshotCollection) -> BTreeMap<PathBuf, String> {
    collection
        .snapshots
        .iter()
        .filter(|s| s.metadata.existed)
        .map(|s| (s.file_path.clone(), s.checksum.clone()))
        .collect()
}

/// Generate a unified diff between two strings.
fn generate_diff(old: &str, new: &str, path: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    output.push_str(&format!("--- a/{path}\n"));
    output.push_str(&format!("+++ b/{path}\n"));

    for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
        if idx > 0 {
            output.push_str("...\n");
        }

        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };

                output.push_str(sign);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push('\n');
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_storage::{MemoryStorage, MetadataConfig};
    use waypoint_test_utils::{BuiltTestProject, TestProject};

    async fn manager(project: &BuiltTestProject, config: SnapshotConfig) -> SnapshotManager<MemoryStorage> {
        let metadata = MetadataStore::open(MemoryStorage::new(), MetadataConfig::default())
            .await
            .unwrap();
        SnapshotManager::open(
            project.path(),
            project.data_dir(),
            config,
            Arc::new(metadata),
        )
        .await
        .unwrap()
    }

    fn no_cleanup() -> SnapshotConfig {
        SnapshotConfig {
            auto_cleanup: false,
            ..SnapshotConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dedup_scenario_restores_into_fresh_directory() {
        let project = TestProject::new()
            .with_file("a.txt", "x")
            .with_file("b.txt", "x")
            .with_file("c.txt", "y")
            .build();
        let manager = manager(&project, no_cleanup()).await;

        let capture = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();
        let entries = &capture.collection.snapshots;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content(), Some("x"));
        assert!(entries[1].is_deduplicated());
        assert_eq!(entries[1].checksum, entries[0].checksum);
        assert_eq!(entries[2].content(), Some("y"));

        let fresh = tempfile::TempDir::new().unwrap();
        let report = manager
            .restore_into(&capture.collection.id, fresh.path())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(report.modified().count(), 3);
        for (name, body) in [("a.txt", "x"), ("b.txt", "x"), ("c.txt", "y")] {
            assert_eq!(std::fs::read_to_string(fresh.path().join(name)).unwrap(), body);
        }
    }

    #[tokio::test]
    async fn test_incremental_entry_restores_same_bytes() {
        let project = TestProject::new().with_file("src/lib.rs", "pub fn a() {}\n").build();
        let manager = manager(&project, no_cleanup()).await;

        let first = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();
        let second = manager
            .create_snapshot("msg_2", &SnapshotOptions::default())
            .await
            .unwrap();
        assert!(second.collection.snapshots[0].is_incremental());

        for id in [&first.collection.id, &second.collection.id] {
            project.write_file("src/lib.rs", "garbage");
            let report = manager.restore_from_snapshot(id, None).await.unwrap();
            assert!(report.is_complete());
            assert_eq!(project.read_file("src/lib.rs"), "pub fn a() {}\n");
        }
    }

    #[tokio::test]
    async fn test_restore_subset_and_absent_files() {
        let project = TestProject::new().with_file("a.txt", "a1").with_file("b.txt", "b1").build();
        let manager = manager(&project, no_cleanup()).await;

        let options = SnapshotOptions::files(["a.txt", "b.txt", "d.txt"]);
        let capture = manager.create_snapshot("msg_1", &options).await.unwrap();

        project.write_file("a.txt", "a2");
        project.write_file("b.txt", "b2");
        project.write_file("d.txt", "z");

        let only = [PathBuf::from("a.txt"), PathBuf::from("d.txt")];
        manager
            .restore_from_snapshot(&capture.collection.id, Some(&only))
            .await
            .unwrap();

        assert_eq!(project.read_file("a.txt"), "a1");
        assert_eq!(project.read_file("b.txt"), "b2");
        assert!(!project.path().join("d.txt").exists());
    }

    #[tokio::test]
    async fn test_compare_and_stats() {
        let project = TestProject::new()
            .with_file("keep.rs", "same")
            .with_file("edit.rs", "v1")
            .with_file("gone.md", "bye")
            .build();
        let manager = manager(&project, no_cleanup()).await;
        let before = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();

        project.write_file("edit.rs", "v2");
        project.delete_file("gone.md");
        project.write_file("new.py", "print()");
        let after = manager
            .create_snapshot("msg_2", &SnapshotOptions::default())
            .await
            .unwrap();

        let diff = manager
            .compare_snapshots(&before.collection.id, &after.collection.id)
            .await
            .unwrap();
        assert_eq!(diff.added, vec![project.path().join("new.py")]);
        assert_eq!(diff.modified, vec![project.path().join("edit.rs")]);
        assert_eq!(diff.deleted, vec![project.path().join("gone.md")]);

        let stats = manager
            .get_snapshot_stats(&before.collection.id)
            .await
            .unwrap();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.total_size, 9);
        assert_eq!(stats.languages, vec!["markdown", "rust"]);
    }

    #[tokio::test]
    async fn test_diff_file() {
        let project = TestProject::new()
            .with_file("test.txt", "line 1\nline 2\nline 3\n")
            .build();
        let manager = manager(&project, no_cleanup()).await;
        let capture = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();

        project.write_file("test.txt", "line 1\nmodified line\nline 3\n");
        let diff = manager
            .diff_file(&capture.collection.id, Path::new("test.txt"))
            .await
            .unwrap();

        assert!(diff.starts_with("--- a/test.txt\n+++ b/test.txt\n"));
        assert!(diff.contains("-line 2"));
        assert!(diff.contains("+modified line"));

        let err = manager
            .diff_file(&capture.collection.id, Path::new("other.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::FileNotInSnapshot { .. }));
    }

    #[tokio::test]
    async fn test_shared_content_survives_until_last_reference() {
        let project = TestProject::new().with_file("a.txt", "shared").build();
        let manager = manager(&project, no_cleanup()).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let options = SnapshotOptions::files(["a.txt"]);
            let capture = manager
                .create_snapshot(&format!("msg_{i}"), &options)
                .await
                .unwrap();
            ids.push(capture.collection.id);
        }
        assert_eq!(manager.content_store().list().await.unwrap().len(), 1);

        for id in &ids[..2] {
            manager.delete_snapshot(id).await.unwrap();
            assert_eq!(manager.collect_garbage().await.unwrap(), 0);
        }
        project.write_file("a.txt", "changed");
        let report = manager.restore_from_snapshot(&ids[2], None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(project.read_file("a.txt"), "shared");

        manager.delete_snapshot(&ids[2]).await.unwrap();
        assert_eq!(manager.collect_garbage().await.unwrap(), 1);
        assert!(manager.content_store().list().await.unwrap().is_empty());

        // The path cache no longer vouches for removed content.
        let capture = manager
            .create_snapshot("msg_new", &SnapshotOptions::files(["a.txt"]))
            .await
            .unwrap();
        assert_eq!(capture.collection.snapshots[0].content(), Some("shared"));
    }

    #[tokio::test]
    async fn test_cleanup_by_age() {
        let project = TestProject::new().with_file("a.txt", "a").build();
        let manager = manager(&project, no_cleanup()).await;
        let capture = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();

        let stats = manager.cleanup(Some(1)).await.unwrap();
        assert_eq!(stats, CleanupStats::default());

        let mut old = capture.collection.clone();
        old.id = waypoint_util::Identifier::snapshot();
        old.message_id = "msg_old".into();
        old.timestamp -= 3 * 24 * 60 * 60 * 1000;
        manager.metadata().save_snapshot(&old).await.unwrap();

        let stats = manager.cleanup(Some(1)).await.unwrap();
        assert_eq!(stats.snapshots_removed, 1);
        assert_eq!(stats.content_removed, 0);
        assert_eq!(manager.list_snapshots().await.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_cleanup_collects_garbage_only_when_needed() {
        let project = TestProject::new().with_file("a.txt", "a").build();
        let manager = manager(&project, SnapshotConfig::default()).await;

        let orphan = crate::content::checksum(b"orphan");
        manager.content_store().store(&orphan, b"orphan").await.unwrap();

        let first = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();
        assert!(manager.content_store().list().await.unwrap().contains(&orphan));

        // An expired collection makes the next capture collect garbage.
        let mut old = first.collection.clone();
        old.id = waypoint_util::Identifier::snapshot();
        old.message_id = "msg_old".into();
        old.timestamp -= 60 * 24 * 60 * 60 * 1000;
        manager.metadata().save_snapshot(&old).await.unwrap();

        manager
            .create_snapshot("msg_2", &SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(manager.list_snapshots().await.len(), 2);
        assert!(!manager.content_store().list().await.unwrap().contains(&orphan));
    }

    #[tokio::test]
    async fn test_interval_triggers_garbage_collection() {
        let project = TestProject::new().with_file("a.txt", "a").build();
        let manager = manager(&project, SnapshotConfig::default()).await;
        let orphan = crate::content::checksum(b"orphan");
        manager.content_store().store(&orphan, b"orphan").await.unwrap();

        for i in 0..GC_INTERVAL {
            assert!(manager.content_store().list().await.unwrap().contains(&orphan));
            manager
                .create_snapshot(&format!("msg_{i}"), &SnapshotOptions::default())
                .await
                .unwrap();
        }
        assert!(!manager.content_store().list().await.unwrap().contains(&orphan));
    }

    #[tokio::test]
    async fn test_capture_survives_cache_write_failure() {
        let project = TestProject::new().with_file("a.txt", "a").build();
        let manager = manager(&project, no_cleanup()).await;
        // A directory where the dedup map file belongs makes the cache write fail.
        std::fs::create_dir_all(project.data_dir().join(crate::cache::DEDUP_MAP_FILE)).unwrap();

        let capture = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();
        assert_eq!(
            manager.get_snapshot_for_message("msg_1").await.unwrap(),
            Some(capture.collection)
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_found() {
        let project = TestProject::new().build();
        let manager = manager(&project, no_cleanup()).await;

        assert!(manager.get_snapshot("snp_missing").await.unwrap_err().is_not_found());
        assert!(manager
            .restore_from_snapshot("snp_missing", None)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(manager.delete_snapshot("snp_missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_verify_reports_lost_content() {
        let project = TestProject::new().with_file("a.txt", "a").with_file("b.txt", "a").build();
        let manager = manager(&project, no_cleanup()).await;
        let capture = manager
            .create_snapshot("msg_1", &SnapshotOptions::default())
            .await
            .unwrap();
        assert!(manager
            .verify_snapshot(&capture.collection.id)
            .await
            .unwrap()
            .is_empty());

        let checksum = &capture.collection.snapshots[0].checksum;
        manager.content_store().remove(checksum).await.unwrap();
        let problems = manager.verify_snapshot(&capture.collection.id).await.unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].0, project.path().join("b.txt"));
    }
}
