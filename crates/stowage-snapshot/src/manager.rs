use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_backend::{BackendError, ObjectBackend, ObjectInfo};
use stowage_transfer::{
    ChunkedUploader, TransformPipeline, UploadConfig, UploadTarget, DEFAULT_CHUNK_SIZE,
    DEFAULT_CONCURRENCY, DEFAULT_QUEUE_DEPTH,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::catalog::{DiskSizeSource, SnapshotType, TypeCatalog};
use crate::error::{SnapshotError, SnapshotResult};
use crate::readme::{README_CONTENT_TYPE, README_NAME};
use crate::record::{SnapshotRecord, SnapshotState, UPLOADED_SOURCE};

/// Container used when none is configured.
pub const DEFAULT_CONTAINER: &str = "miniserver-snapshots";

/// Settings for a [`SnapshotManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub container: String,
    pub chunk_size: usize,
    pub queue_depth: usize,
    pub concurrency: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_CONTAINER.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ManagerConfig {
    fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            queue_depth: self.queue_depth,
            concurrency: self.concurrency,
        }
    }
}

/// Lists, uploads, downloads and deletes snapshots in one container.
///
/// A snapshot named `n` is every object under `n/`: one image object
/// (usually a manifest over chunks stored under `n/<stem>/`) and a
/// `README.txt` with its metadata.
pub struct SnapshotManager {
    backend: Arc<dyn ObjectBackend>,
    catalog: TypeCatalog,
    config: ManagerConfig,
    uploader: ChunkedUploader,
}

impl SnapshotManager {
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        catalog: TypeCatalog,
        config: ManagerConfig,
    ) -> SnapshotResult<Self> {
        let uploader = ChunkedUploader::new(Arc::clone(&backend), config.upload_config())?;
        Ok(Self {
            backend,
            catalog,
            config,
            uploader,
        })
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn container(&self) -> &str {
        &self.config.container
    }

    pub async fn container_exists(&self) -> SnapshotResult<bool> {
        Ok(self.backend.container_exists(self.container()).await?)
    }

    /// Create the container unless it already exists.
    pub async fn ensure_container(&self) -> SnapshotResult<()> {
        if !self.container_exists().await? {
            info!(container = %self.container(), "creating container");
            self.backend.create_container(self.container()).await?;
        }
        Ok(())
    }

    /// Direct children of snapshot `name`, pseudo-directories included.
    pub async fn objects(&self, name: &str) -> SnapshotResult<Vec<ObjectInfo>> {
        Ok(self
            .backend
            .list_objects(self.container(), &snapshot_prefix(name), Some('/'))
            .await?)
    }

    /// Whether anything is stored under `name`. A missing container means
    /// no snapshot exists.
    pub async fn exists(&self, name: &str) -> SnapshotResult<bool> {
        match self.objects(name).await {
            Ok(objects) => Ok(!objects.is_empty()),
            Err(SnapshotError::Backend(
                BackendError::ContainerNotFound(_) | BackendError::NotFound { .. },
            )) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn state(&self, name: &str) -> SnapshotResult<SnapshotState> {
        match self.read(name).await {
            Ok(record) => Ok(record.state()),
            Err(SnapshotError::NotFound(_)) => Ok(SnapshotState::NonExistent),
            Err(err) => Err(err),
        }
    }

    /// Rebuild the record of snapshot `name` from its objects.
    pub async fn read(&self, name: &str) -> SnapshotResult<SnapshotRecord> {
        validate_name(name)?;
        if !self.exists(name).await? {
            return Err(SnapshotError::NotFound(name.to_string()));
        }
        let objects = self.objects(name).await?;
        Ok(self.reconstruct(name, &objects).await)
    }

    /// Every snapshot in the container, in name order.
    pub async fn list(&self) -> SnapshotResult<Vec<SnapshotRecord>> {
        if !self.container_exists().await? {
            return Ok(Vec::new());
        }
        let top = self.backend.list_objects(self.container(), "", Some('/')).await?;
        let mut records = Vec::new();
        for entry in top.iter().filter(|entry| entry.is_pseudo_directory) {
            let name = entry.name.trim_end_matches('/');
            let objects = self.objects(name).await?;
            records.push(self.reconstruct(name, &objects).await);
        }
        debug!(container = %self.container(), count = records.len(), "listed snapshots");
        Ok(records)
    }

    async fn reconstruct(&self, name: &str, objects: &[ObjectInfo]) -> SnapshotRecord {
        let mut record = SnapshotRecord::new(name);

        for object in objects
            .iter()
            .filter(|o| !o.is_pseudo_directory && o.name.ends_with(README_NAME))
        {
            match self.read_text(&object.name).await {
                Ok(text) => record.apply_readme(&text),
                Err(err) => warn!(path = %object.name, error = %err, "couldn't read README, ignoring"),
            }
        }

        let primary = objects
            .iter()
            .filter(|o| !o.is_pseudo_directory)
            .find(|o| self.catalog.find(o.leaf()).is_some());
        match primary {
            Some(object) => {
                record.object_path = object.name.clone();
                if record.date.is_none() {
                    record.date = object.last_modified;
                }
                if record.image_leaf.is_empty() {
                    record.image_leaf = object.leaf().to_string();
                }
            }
            None => record.mark_broken(),
        }
        record
    }

    async fn read_text(&self, path: &str) -> SnapshotResult<String> {
        let mut reader = self.backend.get_object(self.container(), path).await?;
        let mut text = String::new();
        reader.read_to_string(&mut text).await?;
        Ok(text)
    }

    /// Upload `file` as the new snapshot `name`.
    ///
    /// The file type is checked before anything touches the backend. A
    /// failure part way leaves whatever was already stored in place.
    pub async fn upload(&self, name: &str, file: &Path) -> SnapshotResult<SnapshotRecord> {
        validate_name(name)?;
        let file_label = file.display().to_string();
        let leaf = file
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .ok_or_else(|| SnapshotError::NotAFile { path: file_label.clone() })?;
        let ty = self.uploadable_type(&leaf, &file_label)?.clone();
        let stem = leaf[..leaf.len() - ty.suffix.to_lowercase().len()].to_string();
        if stem.is_empty() {
            return Err(SnapshotError::UnsupportedType {
                file: file_label,
                reason: format!("file name needs a stem before {}", ty.suffix),
            });
        }

        let meta = tokio::fs::metadata(file).await?;
        if !meta.is_file() {
            return Err(SnapshotError::NotAFile { path: file_label });
        }
        if self.exists(name).await? {
            return Err(SnapshotError::AlreadyExists(name.to_string()));
        }
        self.ensure_container().await?;

        let source = tokio::fs::File::open(file).await?;
        let mut pipeline = TransformPipeline::build(source, &leaf, ty.transforms());
        let target = UploadTarget {
            container: self.container().to_string(),
            object_path: format!("{name}/{}", pipeline.target_leaf()),
            chunks_container: self.container().to_string(),
            chunks_prefix: format!("{name}/{stem}"),
            mime_type: ty.mime_type.clone(),
        };
        let image_leaf = pipeline.target_leaf().to_string();

        info!(
            snapshot = name,
            file = %file_label,
            object = %target.object_path,
            image_type = %ty.image_type,
            "uploading snapshot"
        );
        let summary = self.uploader.upload(&mut pipeline, &target).await?;
        let output = pipeline.finish().await?;
        debug!(bytes = summary.bytes, chunks = summary.chunks, md5 = %output.md5_hex, "image uploaded");

        let disk_size = match ty.disk_size_source {
            DiskSizeSource::FromFile => meta.len(),
            DiskSizeSource::FromUploadedBytes => output.bytes_post_transform,
            DiskSizeSource::FromDecompressedBytes => output.decompressed_size.unwrap_or(0),
            DiskSizeSource::Unknown => 0,
        };

        let mut record = SnapshotRecord::new(name);
        record.object_path = target.object_path;
        record.comment = format!("Uploaded from original file '{file_label}'");
        record.date = meta.modified().ok().map(DateTime::<Utc>::from);
        record.source_label = UPLOADED_SOURCE.to_string();
        record.image_type = ty.image_type;
        record.image_leaf = image_leaf;
        record.md5 = output.md5_hex;
        record.disk_size = disk_size;
        record.readme = record.readme_fields().render(name, Utc::now());

        let readme_path = format!("{name}/{README_NAME}");
        self.backend
            .put_object_bytes(
                self.container(),
                &readme_path,
                record.readme.as_bytes(),
                README_CONTENT_TYPE,
            )
            .await?;
        info!(snapshot = name, disk_size, "snapshot uploaded");
        Ok(record)
    }

    fn uploadable_type(&self, leaf: &str, file: &str) -> SnapshotResult<&SnapshotType> {
        let ty = self.catalog.find(leaf).ok_or_else(|| SnapshotError::UnsupportedType {
            file: file.to_string(),
            reason: "unknown snapshot type".to_string(),
        })?;
        if !ty.upload_allowed {
            return Err(SnapshotError::UnsupportedType {
                file: file.to_string(),
                reason: format!("uploading {} files is not supported", ty.suffix),
            });
        }
        Ok(ty)
    }

    /// Copy every object of snapshot `name` into `dir`, one file per
    /// object named after its leaf. Returns the files written.
    pub async fn download(&self, name: &str, dir: &Path) -> SnapshotResult<Vec<PathBuf>> {
        let record = self.read(name).await?;
        if record.state() != SnapshotState::Complete {
            return Err(SnapshotError::NotFound(name.to_string()));
        }
        tokio::fs::create_dir_all(dir).await?;

        let mut written = Vec::new();
        for object in self.objects(name).await? {
            if object.is_pseudo_directory {
                continue;
            }
            let dest = dir.join(object.leaf());
            info!(path = %object.name, dest = %dest.display(), "downloading");
            // Chunked objects carry no whole-object MD5, so nothing is verified.
            let mut reader = self.backend.get_object(self.container(), &object.name).await?;
            let mut out = tokio::fs::File::create(&dest).await?;
            tokio::io::copy(&mut reader, &mut out).await?;
            out.flush().await?;
            written.push(dest);
        }
        Ok(written)
    }

    /// Delete every object under `name/`, chunks included. Returns how many
    /// objects were deleted.
    pub async fn delete(&self, name: &str) -> SnapshotResult<usize> {
        validate_name(name)?;
        let objects = match self
            .backend
            .list_objects(self.container(), &snapshot_prefix(name), None)
            .await
        {
            Ok(objects) => objects,
            Err(BackendError::ContainerNotFound(_)) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let paths: Vec<&str> = objects
            .iter()
            .filter(|o| !o.is_pseudo_directory)
            .map(|o| o.name.as_str())
            .collect();
        if paths.is_empty() {
            return Err(SnapshotError::NotFound(name.to_string()));
        }

        let total = paths.len();
        let mut failed = 0;
        for path in paths {
            info!(path, "deleting");
            if let Err(err) = self.backend.delete_object(self.container(), path).await {
                warn!(path, error = %err, "failed to delete");
                failed += 1;
            }
        }
        if failed != 0 {
            return Err(SnapshotError::PartialFailure { failed, total });
        }
        Ok(total)
    }
}

fn snapshot_prefix(name: &str) -> String {
    format!("{name}/")
}

fn validate_name(name: &str) -> SnapshotResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("config", &self.config)
            .field("types", &self.catalog.len())
            .finish()
    }
}
