/// Errors from object backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The requested object does not exist.
    #[error("object not found: {container}/{path}")]
    NotFound { container: String, path: String },

    /// The container does not exist.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// The server answered with a non-success status.
    #[error("unexpected HTTP status {code} from {url}")]
    Status { code: u16, url: String },

    /// Authentication was refused or returned an incomplete session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request could not be delivered or the response not read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server returned something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A failure injected by a test backend.
    #[error("injected failure for {0}")]
    Injected(String),

    /// I/O error while streaming an object body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
