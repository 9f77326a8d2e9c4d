//! Configuration management for waypoint.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/waypoint/config.json`
//! 2. Environment variable: `WAYPOINT_CONFIG_CONTENT`
//! 3. Project config: `waypoint.jsonc` or `waypoint.json` in the workspace root
//!
//! Files may contain `//` and `/* */` comments. Every field is optional;
//! later sources override earlier ones field by field.

use crate::backup::BackupConfig;
use crate::error::{ConfigError, CoreResult};
use crate::rollback::RollbackOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use waypoint_snapshot::SnapshotConfig;
use waypoint_util::log::LogConfig;

/// Environment variable holding inline configuration.
pub const CONFIG_CONTENT_ENV: &str = "WAYPOINT_CONFIG_CONTENT";

/// Project config file names, in lookup order.
pub const PROJECT_CONFIG_FILES: &[&str] = &["waypoint.jsonc", "waypoint.json"];

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSection>,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for waypoint_util::log::LogLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::Trace,
            LogLevel::Debug => Self::Debug,
            LogLevel::Info => Self::Info,
            LogLevel::Warn => Self::Warn,
            LogLevel::Error => Self::Error,
        }
    }
}

/// Snapshot capture and retention settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSection {
    /// Files larger than this (bytes) are not captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,

    /// Snapshots older than this are removed by cleanup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,

    /// Collections serializing larger than this are stored optimized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_threshold_bytes: Option<usize>,

    /// Replaces the default exclude patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,

    /// Replaces the default binary extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_extensions: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cleanup: Option<bool>,
}

impl SnapshotSection {
    /// Merge another section into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            max_file_size: merge_option(self.max_file_size, other.max_file_size),
            max_age_days: merge_option(self.max_age_days, other.max_age_days),
            optimize_threshold_bytes: merge_option(
                self.optimize_threshold_bytes,
                other.optimize_threshold_bytes,
            ),
            exclude_patterns: merge_option(self.exclude_patterns, other.exclude_patterns),
            binary_extensions: merge_option(self.binary_extensions, other.binary_extensions),
            auto_cleanup: merge_option(self.auto_cleanup, other.auto_cleanup),
        }
    }
}

/// Backup settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    /// Oldest backups beyond this count are pruned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<usize>,

    /// Replaces the default exclude patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
}

impl BackupSection {
    pub fn merge(self, other: Self) -> Self {
        Self {
            max_backups: merge_option(self.max_backups, other.max_backups),
            exclude_patterns: merge_option(self.exclude_patterns, other.exclude_patterns),
        }
    }
}

/// Rollback defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSection {
    /// Back up the workspace before every rollback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_backup: Option<bool>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        Self::load_layers(
            Self::global_config_dir().as_deref(),
            std::env::var(CONFIG_CONTENT_ENV).ok(),
            project_dir,
        )
        .await
    }

    /// Load and merge the given layers, in override order.
    pub async fn load_layers(
        global_dir: Option<&Path>,
        env_content: Option<String>,
        project_dir: Option<&Path>,
    ) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        // 1. Global config
        if let Some(dir) = global_dir {
            for name in &["config.json", "config.jsonc"] {
                let path = dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        // 2. Inline config from the environment
        if let Some(content) = env_content {
            config = config.merge(Self::parse_jsonc(&content, "<env>")?);
        }

        // 3. Project config
        if let Some(dir) = project_dir {
            for name in PROJECT_CONFIG_FILES {
                let path = dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        if !sources.is_empty() {
            tracing::debug!(?sources, "Loaded configuration");
        }
        Ok((config, sources))
    }

    /// Get the global config directory.
    ///
    /// On Unix, prefers `~/.config/waypoint` over the platform-specific
    /// directory when it exists.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("waypoint");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        waypoint_util::path::config_dir()
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(self, other: Self) -> Self {
        Self {
            schema: merge_option(self.schema, other.schema),
            log_level: merge_option(self.log_level, other.log_level),
            snapshot: merge_section(self.snapshot, other.snapshot, SnapshotSection::merge),
            backup: merge_section(self.backup, other.backup, BackupSection::merge),
            rollback: match (self.rollback, other.rollback) {
                (Some(base), Some(other)) => Some(RollbackSection {
                    create_backup: merge_option(base.create_backup, other.create_backup),
                }),
                (base, other) => other.or(base),
            },
        }
    }

    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(max) = self.backup.as_ref().and_then(|b| b.max_backups) {
            if max == 0 {
                return Err(ConfigError::Validation {
                    message: "backup.max_backups must be at least 1".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Resolved snapshot settings.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        let mut config = SnapshotConfig::default();
        let Some(section) = &self.snapshot else {
            return config;
        };
        if let Some(v) = section.max_file_size {
            config.max_file_size = v;
        }
        if let Some(v) = section.max_age_days {
            config.max_age_days = v;
        }
        if let Some(v) = section.optimize_threshold_bytes {
            config.optimize_threshold_bytes = v;
        }
        if let Some(v) = &section.exclude_patterns {
            config.exclude_patterns = v.clone();
        }
        if let Some(v) = &section.binary_extensions {
            config.binary_extensions = v.clone();
        }
        if let Some(v) = section.auto_cleanup {
            config.auto_cleanup = v;
        }
        config
    }

    /// Resolved backup settings.
    pub fn backup_config(&self) -> BackupConfig {
        let mut config = BackupConfig::default();
        if let Some(section) = &self.backup {
            if let Some(v) = section.max_backups {
                config.max_backups = v;
            }
            if let Some(v) = &section.exclude_patterns {
                config.exclude_patterns = v.clone();
            }
        }
        config
    }

    /// Default options for rollbacks.
    pub fn rollback_options(&self) -> RollbackOptions {
        let mut options = RollbackOptions::default();
        if let Some(v) = self.rollback.as_ref().and_then(|r| r.create_backup) {
            options.create_backup = v;
        }
        options
    }

    /// Logging settings for hosts calling [`waypoint_util::log::init`].
    pub fn log_config(&self, data_dir: &Path) -> LogConfig {
        LogConfig::for_workspace(data_dir, self.log_level.map(Into::into).unwrap_or_default())
    }
}

/// Strip JSON comments, leaving string contents untouched.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }

        if c == '"' {
            in_string = true;
            result.push(c);
            continue;
        }

        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            result.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        // Keep line numbers stable for error messages
                        if c == '\n' {
                            result.push('\n');
                        }
                        prev = c;
                    }
                    continue;
                }
                _ => {}
            }
        }

        result.push(c);
    }

    result
}

fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    other.or(base)
}

fn merge_section<T>(base: Option<T>, other: Option<T>, merge: fn(T, T) -> T) -> Option<T> {
    match (base, other) {
        (Some(b), Some(o)) => Some(merge(b, o)),
        (b, o) => o.or(b),
    }
}
