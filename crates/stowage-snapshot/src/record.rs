use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::readme::ReadmeFields;

/// Comment given to snapshots with no recognisable image object.
pub const BROKEN_COMMENT: &str = "The snapshot probably failed and some files were left behind.";
/// Source label recorded for snapshots uploaded from a local file.
pub const UPLOADED_SOURCE: &str = "uploaded";

/// Lifecycle state of a named snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// Nothing is stored under the name.
    NonExistent,
    /// Objects exist but none of them is a recognised image.
    Broken,
    /// An image object exists.
    Complete,
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonExistent => write!(f, "non-existent"),
            Self::Broken => write!(f, "broken"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Everything known about one stored snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    /// Path of the image object, empty when broken.
    pub object_path: String,
    pub comment: String,
    pub date: Option<DateTime<Utc>>,
    pub broken: bool,
    /// Machine the snapshot came from, or `uploaded`.
    pub source_label: String,
    pub image_type: String,
    pub image_leaf: String,
    pub md5: String,
    pub disk_size: u64,
    /// Raw README text, when one was read or written.
    pub readme: String,
}

impl SnapshotRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn state(&self) -> SnapshotState {
        if self.broken {
            SnapshotState::Broken
        } else {
            SnapshotState::Complete
        }
    }

    /// Fill fields from README text. Values absent from the text are kept.
    pub fn apply_readme(&mut self, text: &str) {
        let fields = ReadmeFields::parse(text);
        self.readme = text.to_string();
        if fields.date.is_some() {
            self.date = fields.date;
        }
        let pairs = [
            (&mut self.source_label, fields.miniserver),
            (&mut self.comment, fields.user_comment),
            (&mut self.image_type, fields.image_type),
            (&mut self.image_leaf, fields.snapshot_image),
            (&mut self.md5, fields.md5),
        ];
        for (slot, value) in pairs {
            if !value.is_empty() {
                *slot = value;
            }
        }
        if fields.disk_size != 0 {
            self.disk_size = fields.disk_size;
        }
    }

    /// Metadata to persist in README.txt.
    pub fn readme_fields(&self) -> ReadmeFields {
        ReadmeFields {
            date: self.date,
            miniserver: self.source_label.clone(),
            user_comment: self.comment.clone(),
            image_type: self.image_type.clone(),
            snapshot_image: self.image_leaf.clone(),
            md5: self.md5.clone(),
            disk_size: self.disk_size,
        }
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
        self.comment = BROKEN_COMMENT.to_string();
    }
}

impl fmt::Display for SnapshotRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        if !self.comment.is_empty() {
            writeln!(f, "  Comment    - {}", self.comment)?;
        }
        if !self.object_path.is_empty() {
            writeln!(f, "  Path       - {}", self.object_path)?;
        }
        if let Some(date) = self.date {
            writeln!(f, "  Date       - {date}")?;
        }
        writeln!(f, "  Broken     - {}", self.broken)?;
        if !self.source_label.is_empty() {
            writeln!(f, "  Miniserver - {}", self.source_label)?;
        }
        if !self.image_type.is_empty() {
            writeln!(f, "  ImageType  - {}", self.image_type)?;
        }
        if !self.image_leaf.is_empty() {
            writeln!(f, "  ImageLeaf  - {}", self.image_leaf)?;
        }
        if !self.md5.is_empty() {
            writeln!(f, "  Md5        - {}", self.md5)?;
        }
        if self.disk_size != 0 {
            writeln!(f, "  DiskSize   - {}", self.disk_size)?;
        }
        Ok(())
    }
}
