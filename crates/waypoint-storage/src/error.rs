//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Invalid key format
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A record failed validation (missing id, bad timestamps, ...).
    #[error("Integrity error in {entity} {id}: {reason}")]
    Integrity {
        entity: &'static str,
        id: String,
        reason: String,
    },
}

impl StorageError {
    /// Create a not found error for an entity.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Create an integrity error.
    pub fn integrity(entity: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            entity,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Check whether this error means the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
