//! Error types for the core crate.

use thiserror::Error;
use waypoint_snapshot::SnapshotError;
use waypoint_storage::StorageError;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A conversation, message, snapshot or backup does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A backup on disk cannot be replayed.
    #[error("backup {id} is invalid: {reason}")]
    InvalidBackup { id: String, reason: String },

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Snapshot error.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Invalid glob pattern or path.
    #[error(transparent)]
    Util(#[from] waypoint_util::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether this error means the requested entity does not exist,
    /// whichever layer reported it.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            Self::Snapshot(e) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_from_every_layer() {
        assert!(CoreError::not_found("backup", "bak_1").is_not_found());
        assert!(CoreError::from(StorageError::not_found("message", "msg_1")).is_not_found());
        assert!(CoreError::from(SnapshotError::not_found("snp_1")).is_not_found());
        assert!(!CoreError::from(ConfigError::Validation {
            message: "bad".into()
        })
        .is_not_found());
    }

    #[test]
    fn test_display_names_entity() {
        let err = CoreError::not_found("message", "msg_42");
        assert_eq!(err.to_string(), "message not found: msg_42");
    }
}
