//! Blob store errors

use thiserror::Error;

/// Errors returned by blob store operations.
///
/// Stores never retry on their own; callers decide based on
/// [`BlobError::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid blob key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("blob writer is already committed or aborted")]
    WriterClosed,
}

/// Result type alias for blob operations
pub type BlobResult<T> = std::result::Result<T, BlobError>;

impl BlobError {
    /// Transient failures a caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobError::Io(_))
    }

    /// Map an I/O error for the given key onto the blob taxonomy
    pub fn from_io(key: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                BlobError::PermissionDenied(format!("{}: {}", key, err))
            }
            std::io::ErrorKind::AlreadyExists => BlobError::AlreadyExists(key.to_string()),
            _ => BlobError::Io(format!("{}: {}", key, err)),
        }
    }
}

impl From<sqlx::Error> for BlobError {
    fn from(err: sqlx::Error) -> Self {
        BlobError::Io(format!("database: {}", err))
    }
}
