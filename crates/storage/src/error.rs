//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
///
/// `UploadNotFound`, `BlobNotFound`, and `ManifestNotFound` are the
/// well-defined absence conditions handlers translate to wire errors;
/// everything else surfaces as an opaque internal failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload not found: {0}")]
    UploadNotFound(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
