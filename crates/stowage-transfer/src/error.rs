use stowage_backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to upload chunk {path}: {source}")]
    ChunkUpload {
        path: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to upload manifest {path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: BackendError,
    },

    #[error("invalid upload configuration: {0}")]
    InvalidConfig(String),

    #[error("stream needs more than {max} chunks; use a larger chunk size")]
    TooManyChunks { max: u32 },

    #[error("upload task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;
