//! Snapshot configuration and per-call options.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Patterns excluded from every capture unless overridden.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/.waypoint/**",
];

/// Extensions treated as binary and skipped unless `include_binary` is set.
pub const DEFAULT_BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tgz", "bz2", "xz",
    "7z", "tar", "jar", "exe", "dll", "so", "dylib", "a", "o", "class", "wasm", "mp3", "mp4",
    "mov", "avi", "woff", "woff2", "ttf", "otf", "sqlite", "db",
];

/// Configuration for snapshot capture and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Files larger than this (bytes) are skipped.
    pub max_file_size: u64,

    /// Maximum age of snapshots in days.
    pub max_age_days: u32,

    /// Serialized collection size (bytes) above which the optimized
    /// layout is used.
    pub optimize_threshold_bytes: usize,

    /// Glob patterns excluded from capture.
    pub exclude_patterns: Vec<String>,

    /// Extensions (without dot, lowercase) treated as binary.
    pub binary_extensions: Vec<String>,

    /// Expire old snapshots after each capture. Unreferenced content is
    /// collected when that removes something, or periodically.
    pub auto_cleanup: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            max_age_days: 30,
            optimize_threshold_bytes: 1024 * 1024,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            binary_extensions: DEFAULT_BINARY_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            auto_cleanup: true,
        }
    }
}

/// Options for a single capture.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// Capture exactly these files (absolute or relative to the workspace
    /// root) instead of walking the workspace. Listed files that do not
    /// exist are recorded as absent.
    pub include_files: Option<Vec<PathBuf>>,

    /// Files to leave out.
    pub exclude_files: Vec<PathBuf>,

    /// Extra glob patterns to leave out, on top of the configured ones.
    pub exclude_patterns: Vec<String>,

    /// Overrides [`SnapshotConfig::max_file_size`].
    pub max_file_size: Option<u64>,

    /// Capture files with binary extensions; non-UTF-8 bodies are stored
    /// base64 encoded.
    pub include_binary: bool,

    pub description: Option<String>,
}

impl SnapshotOptions {
    /// Capture only the given files.
    pub fn files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            include_files: Some(files.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn exclude_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude_files.push(path.into());
        self
    }

    pub fn exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn include_binary(mut self) -> Self {
        self.include_binary = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SnapshotConfig = serde_json::from_str(r#"{"max_age_days": 7}"#).unwrap();
        assert_eq!(config.max_age_days, 7);
        assert_eq!(config.max_file_size, 1024 * 1024);
        assert!(config.exclude_patterns.iter().any(|p| p == "**/.git/**"));
        assert!(config.auto_cleanup);
    }

    #[test]
    fn test_options_builder() {
        let options = SnapshotOptions::files(["a.txt", "b.txt"])
            .exclude_file("b.txt")
            .max_file_size(10)
            .description("before edit");
        assert_eq!(options.include_files.as_ref().map(Vec::len), Some(2));
        assert_eq!(options.exclude_files, vec![PathBuf::from("b.txt")]);
        assert_eq!(options.max_file_size, Some(10));
        assert!(!options.include_binary);
    }
}
