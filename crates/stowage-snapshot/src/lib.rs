//! Snapshot management for Stowage.
//!
//! A snapshot is a named directory of objects in one container: a disk or
//! filesystem image, stored as chunks behind a manifest, and a `README.txt`
//! describing it. [`SnapshotManager`] lists, uploads, downloads and deletes
//! snapshots; [`TypeCatalog`] decides which files can be stored and how
//! they are transformed on the way up.

pub mod catalog;
pub mod error;
pub mod manager;
pub mod readme;
pub mod record;

pub use catalog::{DiskSizeSource, SnapshotType, TypeCatalog};
pub use error::{SnapshotError, SnapshotResult};
pub use manager::{ManagerConfig, SnapshotManager, DEFAULT_CONTAINER};
pub use readme::{ReadmeFields, README_CONTENT_TYPE, README_DATE_FORMAT, README_NAME};
pub use record::{SnapshotRecord, SnapshotState, BROKEN_COMMENT, UPLOADED_SOURCE};

// Re-export the pieces callers need to build a manager.
pub use stowage_backend::{InMemoryBackend, ObjectBackend, SwiftBackend, SwiftConfig};
