use std::sync::Arc;

use stowage_backend::{manifest_reference, Headers, ObjectBackend, MANIFEST_HEADER};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{TransferError, TransferResult};
use crate::latch::ErrorLatch;
use crate::pool::ChunkPool;

/// Default chunk size: 64 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024 * 1024;
/// Default number of filled chunks waiting for an uploader.
pub const DEFAULT_QUEUE_DEPTH: usize = 2;
/// Default number of concurrent chunk uploads.
pub const DEFAULT_CONCURRENCY: usize = 2;
/// Largest chunk count whose four digit names still sort in upload order.
pub const MAX_CHUNKS: u32 = 9999;
/// Content type of the zero-byte manifest object.
pub const MANIFEST_CONTENT_TYPE: &str = "application/octet-stream";

/// Tuning for [`ChunkedUploader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub queue_depth: usize,
    pub concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl UploadConfig {
    fn validate(&self) -> TransferResult<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.queue_depth == 0 {
            return Err(TransferError::InvalidConfig("queue_depth must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidConfig("concurrency must be positive".into()));
        }
        Ok(())
    }
}

/// Where one chunked upload lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadTarget {
    /// Container of the manifest object.
    pub container: String,
    /// Path of the manifest object.
    pub object_path: String,
    /// Container the chunks are stored in.
    pub chunks_container: String,
    /// Chunks are stored as `<chunks_prefix>/0001`, `<chunks_prefix>/0002`, ...
    pub chunks_prefix: String,
    /// Content type of every chunk.
    pub mime_type: String,
}

impl UploadTarget {
    pub fn chunk_path(&self, index: u32) -> String {
        chunk_path(&self.chunks_prefix, index)
    }

    /// Value of the manifest header for this target.
    pub fn manifest_value(&self) -> String {
        manifest_reference(&self.chunks_container, &self.chunks_prefix)
    }
}

/// Object path of chunk `index` (1-based) under `prefix`.
pub fn chunk_path(prefix: &str, index: u32) -> String {
    format!("{prefix}/{index:04}")
}

/// Outcome of a successful upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    /// Bytes read from the stream, equal to the sum of chunk sizes.
    pub bytes: u64,
    /// Chunks written.
    pub chunks: u32,
}

struct Chunk {
    index: u32,
    path: String,
    buf: Vec<u8>,
    len: usize,
}

/// Splits a stream into chunk objects and ties them together with a
/// manifest.
///
/// A stream may span at most [`MAX_CHUNKS`] chunks. The manifest joins
/// chunks in name order, so a longer stream fails before its first
/// five digit chunk is sent.
///
/// The caller's future reads the stream and fills chunk buffers; a fixed
/// set of uploader tasks takes filled chunks off a bounded queue and stores
/// them. A full queue stops the reader. The first failure is latched, stops
/// the reader and keeps any further chunk from being sent. The manifest is
/// written only after every chunk has been stored. Nothing is retried and
/// chunks stored before a failure are left in place.
pub struct ChunkedUploader {
    backend: Arc<dyn ObjectBackend>,
    config: UploadConfig,
    pool: Arc<ChunkPool>,
}

impl ChunkedUploader {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: UploadConfig) -> TransferResult<Self> {
        config.validate()?;
        let pool = ChunkPool::new(config.chunk_size, config.queue_depth + config.concurrency + 1);
        Ok(Self {
            backend,
            config,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    /// Upload `stream` to `target`.
    ///
    /// Dropping the returned future aborts the uploader tasks.
    pub async fn upload<R>(&self, stream: &mut R, target: &UploadTarget) -> TransferResult<UploadSummary>
    where
        R: AsyncRead + Unpin,
    {
        let latch: ErrorLatch<TransferError> = ErrorLatch::new();
        let (tx, rx) = mpsc::channel::<Chunk>(self.config.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        let mut uploaders = JoinSet::new();
        for _ in 0..self.config.concurrency {
            uploaders.spawn(run_uploader(
                Arc::clone(&rx),
                Arc::clone(&self.backend),
                Arc::clone(&self.pool),
                latch.clone(),
                target.chunks_container.clone(),
                target.mime_type.clone(),
            ));
        }
        drop(rx);

        let mut bytes = 0u64;
        let mut index = 1u32;
        loop {
            if latch.is_set() {
                break;
            }
            let mut buf = self.pool.acquire();
            let len = match fill_window(stream, &mut buf).await {
                Ok(len) => len,
                Err(err) => {
                    self.pool.release(buf);
                    latch.set(TransferError::Io(err));
                    break;
                }
            };
            // A stream ending on a chunk boundary needs no trailing empty
            // chunk, but an empty stream still gets one.
            if len == 0 && index > 1 {
                self.pool.release(buf);
                break;
            }
            if index > MAX_CHUNKS {
                self.pool.release(buf);
                latch.set(TransferError::TooManyChunks { max: MAX_CHUNKS });
                break;
            }
            let last = len < buf.len();
            bytes += len as u64;
            let chunk = Chunk {
                index,
                path: target.chunk_path(index),
                buf,
                len,
            };
            if let Err(mpsc::error::SendError(chunk)) = tx.send(chunk).await {
                // Every uploader has stopped; the latch says why.
                self.pool.release(chunk.buf);
                break;
            }
            index += 1;
            if last {
                break;
            }
        }
        drop(tx);

        while let Some(joined) = uploaders.join_next().await {
            if let Err(err) = joined {
                latch.set(TransferError::Task(err.to_string()));
            }
        }
        if let Some(err) = latch.into_error() {
            return Err(err);
        }

        let chunks = index - 1;
        let mut headers = Headers::new();
        headers.insert(MANIFEST_HEADER.to_string(), target.manifest_value());
        info!(
            container = %target.container,
            path = %target.object_path,
            manifest = %target.manifest_value(),
            chunks,
            bytes,
            "uploading manifest"
        );
        self.backend
            .put_object_with_headers(
                &target.container,
                &target.object_path,
                &[],
                &headers,
                MANIFEST_CONTENT_TYPE,
            )
            .await
            .map_err(|source| TransferError::Manifest {
                path: target.object_path.clone(),
                source,
            })?;

        debug!(pool = ?self.pool.stats(), "upload complete");
        Ok(UploadSummary { bytes, chunks })
    }
}

/// Fill `buf` from `stream` until it is full or the stream ends.
async fn fill_window<R>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut len = 0;
    while len < buf.len() {
        let n = stream.read(&mut buf[len..]).await?;
        if n == 0 {
            break;
        }
        len += n;
    }
    Ok(len)
}

async fn run_uploader(
    rx: Arc<Mutex<mpsc::Receiver<Chunk>>>,
    backend: Arc<dyn ObjectBackend>,
    pool: Arc<ChunkPool>,
    latch: ErrorLatch<TransferError>,
    container: String,
    mime_type: String,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(chunk) = next else {
            break;
        };
        if latch.is_set() {
            pool.release(chunk.buf);
            break;
        }

        info!(path = %chunk.path, index = chunk.index, bytes = chunk.len, "uploading chunk");
        let result = backend
            .put_object_bytes(&container, &chunk.path, &chunk.buf[..chunk.len], &mime_type)
            .await;
        let Chunk { path, buf, .. } = chunk;
        pool.release(buf);

        if let Err(source) = result {
            warn!(path = %path, error = %source, "chunk upload failed");
            latch.set(TransferError::ChunkUpload { path, source });
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use stowage_backend::{BackendResult, InMemoryBackend, ObjectInfo, ObjectReader};
    use tokio::sync::Semaphore;

    const CONTAINER: &str = "snapshots";

    fn target() -> UploadTarget {
        UploadTarget {
            container: CONTAINER.into(),
            object_path: "snap1/disk.tar".into(),
            chunks_container: CONTAINER.into(),
            chunks_prefix: "snap1/disk".into(),
            mime_type: "application/x-tar".into(),
        }
    }

    fn config(chunk_size: usize) -> UploadConfig {
        UploadConfig {
            chunk_size,
            ..UploadConfig::default()
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn chunk_names(backend: &InMemoryBackend) -> Vec<String> {
        backend
            .object_names(CONTAINER)
            .into_iter()
            .filter(|name| name.starts_with("snap1/disk/"))
            .collect()
    }

    #[test]
    fn chunk_paths_are_zero_padded() {
        assert_eq!(chunk_path("snap1/disk", 1), "snap1/disk/0001");
        assert_eq!(chunk_path("snap1/disk", 12), "snap1/disk/0012");
        assert_eq!(target().manifest_value(), "snapshots/snap1/disk");
    }

    #[test]
    fn zero_sized_config_is_rejected() {
        let backend = Arc::new(InMemoryBackend::new());
        for bad in [
            UploadConfig { chunk_size: 0, ..UploadConfig::default() },
            UploadConfig { queue_depth: 0, ..UploadConfig::default() },
            UploadConfig { concurrency: 0, ..UploadConfig::default() },
        ] {
            assert!(matches!(
                ChunkedUploader::new(backend.clone(), bad),
                Err(TransferError::InvalidConfig(_))
            ));
        }
    }

    #[tokio::test]
    async fn splits_into_numbered_chunks_and_writes_manifest() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(10)).unwrap();
        let input = sample(25);

        let summary = uploader
            .upload(&mut std::io::Cursor::new(input.clone()), &target())
            .await
            .unwrap();
        assert_eq!(summary, UploadSummary { bytes: 25, chunks: 3 });
        assert_eq!(
            chunk_names(&backend),
            vec!["snap1/disk/0001", "snap1/disk/0002", "snap1/disk/0003"]
        );
        assert_eq!(backend.object_data(CONTAINER, "snap1/disk/0003").unwrap().len(), 5);

        let headers = backend.object_headers(CONTAINER, "snap1/disk.tar").unwrap();
        assert_eq!(headers.get(MANIFEST_HEADER).map(String::as_str), Some("snapshots/snap1/disk"));
        assert_eq!(
            backend.content_type(CONTAINER, "snap1/disk.tar").as_deref(),
            Some(MANIFEST_CONTENT_TYPE)
        );
        assert_eq!(
            backend.content_type(CONTAINER, "snap1/disk/0001").as_deref(),
            Some("application/x-tar")
        );
        assert_eq!(backend.object_data(CONTAINER, "snap1/disk.tar").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_empty_chunk() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(8)).unwrap();
        let summary = uploader
            .upload(&mut std::io::Cursor::new(sample(24)), &target())
            .await
            .unwrap();
        assert_eq!(summary.chunks, 3);
        assert_eq!(chunk_names(&backend).len(), 3);
    }

    #[tokio::test]
    async fn empty_stream_writes_one_empty_chunk() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(8)).unwrap();
        let summary = uploader.upload(&mut tokio::io::empty(), &target()).await.unwrap();
        assert_eq!(summary, UploadSummary { bytes: 0, chunks: 1 });
        assert_eq!(chunk_names(&backend), vec!["snap1/disk/0001"]);
        assert!(backend.object_data(CONTAINER, "snap1/disk/0001").unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunk_failure_skips_manifest() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        backend.fail_put("snap1/disk/0003");
        let uploader = ChunkedUploader::new(backend.clone(), config(4)).unwrap();

        let err = uploader
            .upload(&mut std::io::Cursor::new(sample(40)), &target())
            .await
            .unwrap_err();
        match err {
            TransferError::ChunkUpload { path, .. } => assert_eq!(path, "snap1/disk/0003"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(backend.object_headers(CONTAINER, "snap1/disk.tar").is_none());
        assert!(!chunk_names(&backend).contains(&"snap1/disk/0003".to_string()));
    }

    #[tokio::test]
    async fn manifest_failure_is_reported() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        backend.fail_put("snap1/disk.tar");
        let uploader = ChunkedUploader::new(backend.clone(), config(4)).unwrap();
        let err = uploader
            .upload(&mut std::io::Cursor::new(sample(9)), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Manifest { .. }));
        assert_eq!(chunk_names(&backend).len(), 3);
    }

    #[tokio::test]
    async fn read_error_aborts_upload() {
        struct Failing;
        impl AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("disk on fire")))
            }
        }

        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(4)).unwrap();
        let err = uploader.upload(&mut Failing, &target()).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
        assert!(backend.object_names(CONTAINER).is_empty());
    }

    #[tokio::test]
    async fn manifest_reads_back_as_original_stream() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(1000)).unwrap();
        let input = sample(12_345);
        uploader
            .upload(&mut std::io::Cursor::new(input.clone()), &target())
            .await
            .unwrap();

        let mut reader = backend.get_object(CONTAINER, "snap1/disk.tar").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn buffers_are_reused_across_chunks() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(16)).unwrap();
        uploader
            .upload(&mut std::io::Cursor::new(sample(16 * 40)), &target())
            .await
            .unwrap();
        let stats = uploader.pool().stats();
        assert!(stats.reused > 0);
        assert!(stats.allocated <= (DEFAULT_QUEUE_DEPTH + DEFAULT_CONCURRENCY + 2) as u64);
    }

    #[tokio::test]
    async fn stream_past_chunk_limit_fails_without_manifest() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(1)).unwrap();
        let input = sample(MAX_CHUNKS as usize + 1);

        let err = uploader
            .upload(&mut std::io::Cursor::new(input), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::TooManyChunks { max: MAX_CHUNKS }));
        assert!(backend.object_headers(CONTAINER, "snap1/disk.tar").is_none());
        let names = chunk_names(&backend);
        assert!(names.len() <= MAX_CHUNKS as usize);
        assert!(names.iter().all(|name| name.len() == "snap1/disk/0001".len()));
    }

    #[tokio::test]
    async fn stream_at_chunk_limit_reads_back_in_order() {
        let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
        let uploader = ChunkedUploader::new(backend.clone(), config(1)).unwrap();
        let input = sample(MAX_CHUNKS as usize);

        let summary = uploader
            .upload(&mut std::io::Cursor::new(input.clone()), &target())
            .await
            .unwrap();
        assert_eq!(summary.chunks, MAX_CHUNKS);

        let mut reader = backend.get_object(CONTAINER, "snap1/disk.tar").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, input);
    }

    /// Counts chunk puts and holds each one until the gate opens.
    struct GatedBackend {
        inner: InMemoryBackend,
        gate: Semaphore,
        puts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectBackend for GatedBackend {
        async fn container_exists(&self, container: &str) -> BackendResult<bool> {
            self.inner.container_exists(container).await
        }

        async fn create_container(&self, container: &str) -> BackendResult<()> {
            self.inner.create_container(container).await
        }

        async fn list_objects(
            &self,
            container: &str,
            prefix: &str,
            delimiter: Option<char>,
        ) -> BackendResult<Vec<ObjectInfo>> {
            self.inner.list_objects(container, prefix, delimiter).await
        }

        async fn get_object(&self, container: &str, path: &str) -> BackendResult<ObjectReader> {
            self.inner.get_object(container, path).await
        }

        async fn put_object_bytes(
            &self,
            container: &str,
            path: &str,
            data: &[u8],
            mime_type: &str,
        ) -> BackendResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.expect("gate closed");
            self.inner.put_object_bytes(container, path, data, mime_type).await
        }

        async fn put_object_with_headers(
            &self,
            container: &str,
            path: &str,
            body: &[u8],
            headers: &Headers,
            mime_type: &str,
        ) -> BackendResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.expect("gate closed");
            self.inner
                .put_object_with_headers(container, path, body, headers, mime_type)
                .await
        }

        async fn delete_object(&self, container: &str, path: &str) -> BackendResult<()> {
            self.inner.delete_object(container, path).await
        }
    }

    #[tokio::test]
    async fn dropping_upload_stops_uploaders() {
        let backend = Arc::new(GatedBackend {
            inner: InMemoryBackend::with_container(CONTAINER),
            gate: Semaphore::new(0),
            puts: AtomicUsize::new(0),
        });
        let uploader = ChunkedUploader::new(backend.clone(), config(4)).unwrap();
        let mut input = std::io::Cursor::new(sample(400));

        let target = target();
        let outcome = tokio::time::timeout(Duration::from_millis(100), uploader.upload(&mut input, &target)).await;
        assert!(outcome.is_err());
        let started = backend.puts.load(Ordering::SeqCst);
        assert_eq!(started, DEFAULT_CONCURRENCY);

        backend.gate.add_permits(1000);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.puts.load(Ordering::SeqCst), started);
        assert!(backend.inner.object_names(CONTAINER).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn chunks_concatenate_to_input(len in 0usize..5000, chunk_size in 1usize..700) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let backend = Arc::new(InMemoryBackend::with_container(CONTAINER));
                let uploader = ChunkedUploader::new(backend.clone(), config(chunk_size)).unwrap();
                let input = sample(len);
                let summary = uploader
                    .upload(&mut std::io::Cursor::new(input.clone()), &target())
                    .await
                    .unwrap();

                let names = chunk_names(&backend);
                let expected_chunks = if len == 0 { 1 } else { len.div_ceil(chunk_size) };
                assert_eq!(names.len(), expected_chunks);
                assert_eq!(summary.chunks as usize, expected_chunks);
                assert_eq!(summary.bytes, len as u64);

                let mut joined = Vec::new();
                for (i, name) in names.iter().enumerate() {
                    assert_eq!(name, &chunk_path("snap1/disk", i as u32 + 1));
                    joined.extend(backend.object_data(CONTAINER, name).unwrap());
                }
                assert_eq!(joined, input);
            });
        }
    }
}
