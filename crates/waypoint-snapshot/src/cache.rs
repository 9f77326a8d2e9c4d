//! Deduplication map and per-path checksum cache.
//!
//! ```text
//! snapshots/deduplication-map.json              # checksum -> stored path
//! snapshots/incremental/checksum-cache.json     # file path -> last checksum
//! ```
//!
//! Both are mirrored in memory. [`CaptureCache`] is owned by the snapshot
//! manager behind a mutex, so writers are queued and readers see the last
//! committed state.

use crate::SnapshotResult;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use waypoint_util::fs::atomic_write;

/// Location of the deduplication map (relative to the data dir).
pub const DEDUP_MAP_FILE: &str = "snapshots/deduplication-map.json";

/// Location of the persisted checksum cache (relative to the data dir).
pub const CHECKSUM_CACHE_FILE: &str = "snapshots/incremental/checksum-cache.json";

/// In-memory mirror of the deduplication map and checksum cache.
#[derive(Debug, Default)]
pub struct CaptureCache {
    dedup: BTreeMap<String, PathBuf>,
    checksums: BTreeMap<PathBuf, String>,
    dedup_path: PathBuf,
    cache_path: PathBuf,
    scratch_dir: PathBuf,
    dirty: bool,
}

impl CaptureCache {
    /// Load both files from `data_dir`. Missing or unreadable files start
    /// empty.
    pub async fn load(data_dir: &Path, scratch_dir: PathBuf) -> Self {
        let dedup_path = data_dir.join(DEDUP_MAP_FILE);
        let cache_path = data_dir.join(CHECKSUM_CACHE_FILE);

        let dedup = read_map(&dedup_path).await;
        let checksums = read_map(&cache_path).await;
        debug!(
            dedup_entries = dedup.len(),
            cached_paths = checksums.len(),
            "Loaded capture cache"
        );

        Self {
            dedup,
            checksums,
            dedup_path,
            cache_path,
            scratch_dir,
            dirty: false,
        }
    }

    /// Stored path registered for a checksum.
    pub fn lookup(&self, checksum: &str) -> Option<&Path> {
        self.dedup.get(checksum).map(PathBuf::as_path)
    }

    /// Register stored content for a checksum.
    pub fn register(&mut self, checksum: &str, stored: PathBuf) {
        if self.dedup.get(checksum) != Some(&stored) {
            self.dedup.insert(checksum.to_string(), stored);
            self.dirty = true;
        }
    }

    /// Checksum recorded for `path` at its last capture.
    pub fn last_checksum(&self, path: &Path) -> Option<&str> {
        self.checksums.get(path).map(String::as_str)
    }

    /// Record the checksum captured for `path`.
    pub fn record(&mut self, path: &Path, checksum: &str) {
        if self.checksums.get(path).map(String::as_str) != Some(checksum) {
            self.checksums.insert(path.to_path_buf(), checksum.to_string());
            self.dirty = true;
        }
    }

    /// Forget the last capture of `path`.
    pub fn forget(&mut self, path: &Path) {
        if self.checksums.remove(path).is_some() {
            self.dirty = true;
        }
    }

    /// Registered checksums.
    pub fn checksums(&self) -> impl Iterator<Item = &str> {
        self.dedup.keys().map(String::as_str)
    }

    /// Drop every checksum not in `live` from both maps.
    ///
    /// Returns the dropped checksums.
    pub fn retain(&mut self, live: &HashSet<String>) -> Vec<String> {
        let dropped: Vec<String> = self
            .dedup
            .keys()
            .filter(|c| !live.contains(*c))
            .cloned()
            .collect();
        for checksum in &dropped {
            self.dedup.remove(checksum);
        }

        let before = self.checksums.len();
        self.checksums.retain(|_, c| live.contains(c));

        if !dropped.is_empty() || self.checksums.len() != before {
            self.dirty = true;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.dedup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dedup.is_empty()
    }

    /// Persist both maps if anything changed since the last save.
    pub async fn save(&mut self) -> SnapshotResult<()> {
        if !self.dirty {
            return Ok(());
        }
        write_map(&self.dedup_path, &self.dedup, &self.scratch_dir).await?;
        write_map(&self.cache_path, &self.checksums, &self.scratch_dir).await?;
        self.dirty = false;
        Ok(())
    }
}

async fn read_map<K, V>(path: &Path) -> BTreeMap<K, V>
where
    K: Ord + DeserializeOwned,
    V: DeserializeOwned,
{
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), "Failed to read cache file: {e}");
            return BTreeMap::new();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), "Ignoring malformed cache file: {e}");
            BTreeMap::new()
        }
    }
}

async fn write_map<K, V>(path: &Path, map: &BTreeMap<K, V>, scratch_dir: &Path) -> SnapshotResult<()>
where
    K: Ord + Serialize,
    V: Serialize,
{
    let bytes = serde_json::to_vec_pretty(map)?;
    atomic_write(path, &bytes, Some(scratch_dir)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("temp");

        let mut cache = CaptureCache::load(dir.path(), scratch.clone()).await;
        assert!(cache.is_empty());
        cache.register("aa", PathBuf::from("/store/aa"));
        cache.record(Path::new("/w/a.txt"), "aa");
        cache.save().await.unwrap();

        let cache = CaptureCache::load(dir.path(), scratch).await;
        assert_eq!(cache.lookup("aa"), Some(Path::new("/store/aa")));
        assert_eq!(cache.last_checksum(Path::new("/w/a.txt")), Some("aa"));
        assert!(dir.path().join(CHECKSUM_CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn test_malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEDUP_MAP_FILE);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, b"{not json").await.unwrap();

        let cache = CaptureCache::load(dir.path(), dir.path().join("temp")).await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_retain_drops_dead_checksums_everywhere() {
        let dir = TempDir::new().unwrap();
        let mut cache = CaptureCache::load(dir.path(), dir.path().join("temp")).await;
        cache.register("live", PathBuf::from("/store/live"));
        cache.register("dead", PathBuf::from("/store/dead"));
        cache.record(Path::new("/w/a.txt"), "live");
        cache.record(Path::new("/w/b.txt"), "dead");

        let live: HashSet<String> = ["live".to_string()].into_iter().collect();
        assert_eq!(cache.retain(&live), vec!["dead".to_string()]);
        assert_eq!(cache.lookup("dead"), None);
        assert_eq!(cache.last_checksum(Path::new("/w/b.txt")), None);
        assert_eq!(cache.last_checksum(Path::new("/w/a.txt")), Some("live"));
    }
}
