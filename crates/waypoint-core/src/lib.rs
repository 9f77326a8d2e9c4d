//! Core coordination layer for waypoint.
//!
//! This crate ties the storage and snapshot layers together for a
//! workspace:
//! - Configuration management (multi-source, JSONC support)
//! - Whole-workspace backups
//! - Rollback to a message checkpoint, with backup recovery on failure
//! - The [`Workspace`] facade exposing all of the above

pub mod backup;
pub mod config;
pub mod error;
pub mod rollback;
pub mod workspace;

pub use backup::{BackupConfig, BackupEntry, BackupInfo, BackupManager, BackupManifest};
pub use config::Config;
pub use error::{ConfigError, CoreError, CoreResult};
pub use rollback::{
    NoProgress, RollbackDetails, RollbackExecutor, RollbackOptions, RollbackPhase,
    RollbackProgress, RollbackResult,
};
pub use workspace::Workspace;
