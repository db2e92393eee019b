//! Streaming transfer engine for Stowage.
//!
//! Turns an unbounded byte stream into a chunked object in the backend
//! without ever holding more than a bounded number of chunks in memory.
//!
//! # Architecture
//!
//! - **ChunkPool**: reusable chunk-sized buffers shared by producer and uploaders
//! - **ErrorLatch**: first-error-wins slot shared by concurrent tasks
//! - **CodecReader**: gzip / gunzip on read, driven by a feeder task and a blocking codec task
//! - **DecompressionCounter**: counts decompressed bytes written into it
//! - **TeeReader**: copies everything read into a sink
//! - **DigestReader**: running MD5 over the bytes that pass through
//! - **TransformPipeline**: composes the above for one upload
//! - **ChunkedUploader**: splits, uploads concurrently, then writes the manifest
//!
//! # Upload flow
//!
//! ```text
//! source --> [tee -> counter]? --> [gunzip]? --> [gzip]? --> md5 --> uploader
//!                                                                    |
//!                                             chunks 0001..N, then manifest
//! ```

pub mod codec;
pub mod counter;
pub mod digest;
pub mod error;
pub mod latch;
pub mod pipeline;
pub mod pool;
pub mod tee;
pub mod upload;

pub use codec::CodecReader;
pub use counter::{CounterSink, DecompressionCounter};
pub use digest::DigestReader;
pub use error::{TransferError, TransferResult};
pub use latch::ErrorLatch;
pub use pipeline::{PipelineOutput, TransformPipeline, Transforms, GZIP_SUFFIX};
pub use pool::{ChunkPool, PoolStats};
pub use tee::TeeReader;
pub use upload::{
    chunk_path, ChunkedUploader, UploadConfig, UploadSummary, UploadTarget, DEFAULT_CHUNK_SIZE,
    DEFAULT_CONCURRENCY, DEFAULT_QUEUE_DEPTH, MANIFEST_CONTENT_TYPE,
};
