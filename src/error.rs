//! Error types for the storage, index and migration layers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Expected absence. Callers decide whether it matters; never logged as an error.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Persisted content failed to parse or failed shape validation.
    #[error("corrupt {kind} '{id}': {reason}")]
    CorruptEntity {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("invalid id '{0}'")]
    InvalidId(String),

    /// A vault path with a segment that is not a plain name, such as `..`.
    #[error("invalid vault path '{0}'")]
    InvalidPath(String),

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("index drift in {family}: {count} discrepancies (run repair)")]
    IndexDrift { family: &'static str, count: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn corrupt(kind: &'static str, id: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::CorruptEntity {
            kind,
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
