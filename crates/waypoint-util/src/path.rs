//! Path utilities.
//!
//! This module provides utilities for working with file paths.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Name of the per-workspace data directory.
pub const DATA_DIR_NAME: &str = ".waypoint";

/// Get the waypoint configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/waypoint` if set
/// - `~/.config/waypoint` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("waypoint"))
}

/// Get the data directory for a workspace (`<root>/.waypoint`).
pub fn workspace_data_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(DATA_DIR_NAME)
}

/// Normalize a path by removing `.` and `..` components.
///
/// Unlike `canonicalize`, this doesn't require the path to exist.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            _ => result.push(component),
        }
    }

    result
}

/// Make a path relative to a base directory.
///
/// Returns `None` if the path is not within the base directory.
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Resolve `path` against `root`, rejecting anything that escapes it.
///
/// Relative paths are joined onto the root; absolute paths must already
/// live beneath it.
pub fn resolve_within(root: &Path, path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let normalized = normalize(&joined);

    if normalized.starts_with(normalize(root)) {
        Ok(normalized)
    } else {
        Err(Error::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

/// Render a relative path with `/` separators, as used for glob matching.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
