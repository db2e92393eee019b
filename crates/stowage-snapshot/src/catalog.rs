use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use stowage_transfer::Transforms;

/// Where the `disk_size` recorded for a snapshot comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskSizeSource {
    /// Size of the uploaded file on disk.
    FromFile,
    /// Bytes that left the transform pipeline.
    FromUploadedBytes,
    /// Decompressed size of a gzip file, counted while uploading.
    FromDecompressedBytes,
    /// Not known; nothing is recorded.
    Unknown,
}

/// One kind of snapshot image, recognised by file name suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotType {
    pub suffix: String,
    pub upload_allowed: bool,
    pub needs_gzip: bool,
    pub needs_gunzip: bool,
    pub disk_size_source: DiskSizeSource,
    pub mime_type: String,
    /// Written to the `image_type` key of README.txt.
    pub image_type: String,
    pub virtualisation: String,
    pub comment: String,
}

impl SnapshotType {
    /// Pipeline transforms an upload of this type needs.
    pub fn transforms(&self) -> Transforms {
        Transforms {
            gunzip: self.needs_gunzip,
            gzip: self.needs_gzip,
            count_decompressed: self.disk_size_source == DiskSizeSource::FromDecompressedBytes,
        }
    }

    /// Whether `file_name` ends in this type's suffix, ignoring case.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.to_lowercase().ends_with(&self.suffix.to_lowercase())
    }

    #[allow(clippy::too_many_arguments)]
    fn builtin(
        suffix: &str,
        upload_allowed: bool,
        needs_gzip: bool,
        needs_gunzip: bool,
        disk_size_source: DiskSizeSource,
        mime_type: &str,
        image_type: &str,
        virtualisation: &str,
        comment: &str,
    ) -> Self {
        Self {
            suffix: suffix.into(),
            upload_allowed,
            needs_gzip,
            needs_gunzip,
            disk_size_source,
            mime_type: mime_type.into(),
            image_type: image_type.into(),
            virtualisation: virtualisation.into(),
            comment: comment.into(),
        }
    }
}

const PARAVIRTUAL: &str = "Paravirtualisation - Linux only";
const FULL_VIRTUAL: &str = "Full virtualisation with PV Drivers";

/// Ordered, immutable table of known snapshot types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeCatalog {
    types: Vec<SnapshotType>,
}

impl TypeCatalog {
    pub fn new(types: Vec<SnapshotType>) -> Self {
        Self { types }
    }

    /// Type for `file_name`, or `None` if no suffix matches.
    ///
    /// Matching ignores case. The longest matching suffix wins, so
    /// `disk.raw.gz` is a `.raw.gz` and not a `.gz` of some other kind;
    /// equal lengths go to the entry declared first.
    pub fn find(&self, file_name: &str) -> Option<&SnapshotType> {
        let lowered = file_name.to_lowercase();
        let mut best: Option<&SnapshotType> = None;
        for ty in &self.types {
            if !lowered.ends_with(&ty.suffix.to_lowercase()) {
                continue;
            }
            if best.map_or(true, |b| ty.suffix.len() > b.suffix.len()) {
                best = Some(ty);
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Write a human readable description of every type.
    pub fn render(&self, out: &mut impl Write) -> io::Result<()> {
        for ty in &self.types {
            writeln!(out, "{} - {}", ty.suffix, ty.image_type)?;
            writeln!(out, "  Upload:         {}", ty.upload_allowed)?;
            writeln!(out, "  Comment:        {}", ty.comment)?;
            writeln!(out, "  Virtualisation: {}", ty.virtualisation)?;
        }
        Ok(())
    }
}

impl Default for TypeCatalog {
    fn default() -> Self {
        use DiskSizeSource::*;
        Self::new(vec![
            SnapshotType::builtin(
                ".tar", true, false, false, FromFile,
                "application/x-tar", "Tarball file",
                PARAVIRTUAL, "A tar of whole file system",
            ),
            SnapshotType::builtin(
                ".tar.gz", true, false, true, FromUploadedBytes,
                "application/x-tar", "Tarball file",
                PARAVIRTUAL, "A tar of whole file system",
            ),
            SnapshotType::builtin(
                ".raw.gz", true, false, false, FromDecompressedBytes,
                "x-application/x-gzip", "gzipped Raw file",
                FULL_VIRTUAL, "A raw disk image including partitions, gzipped",
            ),
            SnapshotType::builtin(
                ".raw", true, true, false, FromFile,
                "x-application/x-gzip", "gzipped Raw file",
                FULL_VIRTUAL, "A raw disk image including partitions",
            ),
            SnapshotType::builtin(
                ".xmbr", false, false, false, Unknown,
                "x-application/x-gzip", "gzipped NTFS Image file",
                FULL_VIRTUAL, "ntfsclone + boot sector + partitions",
            ),
            SnapshotType::builtin(
                ".vmdk", false, false, false, Unknown,
                "application/vmdk", "VMDK",
                FULL_VIRTUAL, "Raw disk image with partitions, VMDK format",
            ),
            SnapshotType::builtin(
                ".vhd", false, false, false, Unknown,
                "application/vhd", "VHD",
                FULL_VIRTUAL, "Raw disk image with partitions, VHD format",
            ),
        ])
    }
}
