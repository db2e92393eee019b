use stowage_backend::BackendError;
use stowage_transfer::TransferError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("invalid snapshot name {0:?}")]
    InvalidName(String),

    #[error("snapshot {0:?} already exists - delete it first")]
    AlreadyExists(String),

    #[error("unsupported snapshot type {file:?}: {reason} - use the types command to see available types")]
    UnsupportedType { file: String, reason: String },

    #[error("{path:?} is not a regular file")]
    NotAFile { path: String },

    #[error("failed to delete {failed} of {total} objects")]
    PartialFailure { failed: usize, total: usize },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
