//! Throwaway workspaces on disk.
//!
//! ```rust
//! use waypoint_test_utils::fixtures::TestProject;
//!
//! let project = TestProject::new()
//!     .with_file("src/main.rs", "fn main() {}")
//!     .with_dir("docs")
//!     .build();
//!
//! project.write_file("src/main.rs", "fn main() { run() }");
//! assert_eq!(project.tree().len(), 1);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use waypoint_util::path::{to_slash, workspace_data_dir, DATA_DIR_NAME};

enum Seed {
    File(PathBuf, Vec<u8>),
    Dir(PathBuf),
}

/// Builder for a workspace living in a temporary directory.
pub struct TestProject {
    seeds: Vec<Seed>,
}

impl TestProject {
    pub fn new() -> Self {
        Self { seeds: Vec::new() }
    }

    /// Seed a file. Missing parent directories are created on build.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Self {
        self.seeds.push(Seed::File(
            path.as_ref().to_path_buf(),
            contents.as_ref().to_vec(),
        ));
        self
    }

    /// Seed an empty directory.
    pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.seeds.push(Seed::Dir(path.as_ref().to_path_buf()));
        self
    }

    /// Seed a `waypoint.json` project config.
    pub fn with_config(self, json: &str) -> Self {
        self.with_file("waypoint.json", json)
    }

    pub fn build(self) -> BuiltTestProject {
        let project = BuiltTestProject {
            temp_dir: TempDir::new().unwrap_or_else(|e| panic!("cannot create temp dir: {e}")),
        };
        for seed in self.seeds {
            match seed {
                Seed::File(path, contents) => project.write_file(path, contents),
                Seed::Dir(path) => create_dirs(&project.resolve(path)),
            }
        }
        project
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// A workspace on disk, removed when dropped.
pub struct BuiltTestProject {
    temp_dir: TempDir,
}

impl BuiltTestProject {
    /// Workspace root.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// `<root>/.waypoint`
    pub fn data_dir(&self) -> PathBuf {
        workspace_data_dir(self.path())
    }

    fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.path().join(path)
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> String {
        let target = self.resolve(path);
        fs::read_to_string(&target)
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", target.display()))
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).exists()
    }

    /// Create or overwrite a file, creating parents as needed.
    pub fn write_file(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            create_dirs(parent);
        }
        fs::write(&target, contents)
            .unwrap_or_else(|e| panic!("cannot write {}: {e}", target.display()));
    }

    pub fn delete_file(&self, path: impl AsRef<Path>) {
        let target = self.resolve(path);
        fs::remove_file(&target)
            .unwrap_or_else(|e| panic!("cannot delete {}: {e}", target.display()));
    }

    /// Workspace files keyed by `/`-separated relative path.
    pub fn tree(&self) -> BTreeMap<String, Vec<u8>> {
        read_tree(self.path())
    }
}

fn create_dirs(path: &Path) {
    fs::create_dir_all(path).unwrap_or_else(|e| panic!("cannot create {}: {e}", path.display()));
}

/// Files below `root` keyed by `/`-separated relative path, skipping
/// waypoint data directories.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut tree = BTreeMap::new();
    let walker = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != DATA_DIR_NAME);
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path())
            .unwrap_or_else(|e| panic!("cannot read {}: {e}", entry.path().display()));
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        tree.insert(to_slash(rel), bytes);
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_are_materialized() {
        let project = TestProject::new()
            .with_file("notes.txt", "Hello")
            .with_file("src/lib.rs", "pub fn f() {}")
            .with_file("blob.bin", [0u8, 255])
            .with_dir("empty")
            .build();

        assert_eq!(project.read_file("notes.txt"), "Hello");
        assert!(project.path().join("empty").is_dir());
        assert_eq!(
            project.tree().keys().collect::<Vec<_>>(),
            ["blob.bin", "notes.txt", "src/lib.rs"]
        );
        assert_eq!(project.tree()["blob.bin"], vec![0u8, 255]);
    }

    #[test]
    fn test_tree_ignores_data_dir() {
        let project = TestProject::new().with_file("a.txt", "a").build();
        project.write_file(".waypoint/snapshots/snp_1.json", "{}");

        assert_eq!(project.tree().len(), 1);
        assert_eq!(project.data_dir(), project.path().join(".waypoint"));
    }

    #[test]
    fn test_mutations() {
        let project = TestProject::new().with_config(r#"{"log_level": "warn"}"#).build();
        assert!(project.exists("waypoint.json"));

        project.write_file("deep/nested/file.txt", "content");
        assert!(project.exists("deep/nested/file.txt"));
        project.delete_file("deep/nested/file.txt");
        assert!(!project.exists("deep/nested/file.txt"));
    }
}
