use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::BackendResult;
use crate::object::{Headers, ObjectInfo};

/// Streamed body of an object read.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Swift-style object storage.
///
/// Implementations must satisfy these rules:
/// - Handles are shared across concurrent uploads, so every method takes
///   `&self` and the implementation must be `Send + Sync`.
/// - Listings are returned sorted by name.
/// - Reading a manifest object yields the ordered concatenation of the
///   chunk objects it references.
/// - No method retries on its own. Callers decide what a failure means.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Whether the container exists.
    async fn container_exists(&self, container: &str) -> BackendResult<bool>;

    /// Create the container. Creating an existing container is not an error.
    async fn create_container(&self, container: &str) -> BackendResult<()>;

    /// List objects whose names start with `prefix`.
    ///
    /// With a delimiter, names that contain it after the prefix are
    /// collapsed into one pseudo-directory entry per distinct sub-prefix.
    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> BackendResult<Vec<ObjectInfo>>;

    /// Open an object for streaming.
    async fn get_object(&self, container: &str, path: &str) -> BackendResult<ObjectReader>;

    /// Store `data` as an object.
    async fn put_object_bytes(
        &self,
        container: &str,
        path: &str,
        data: &[u8],
        mime_type: &str,
    ) -> BackendResult<()>;

    /// Store `body` as an object with extra headers.
    async fn put_object_with_headers(
        &self,
        container: &str,
        path: &str,
        body: &[u8],
        headers: &Headers,
        mime_type: &str,
    ) -> BackendResult<()>;

    /// Delete one object.
    async fn delete_object(&self, container: &str, path: &str) -> BackendResult<()>;
}
