use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header naming the `<container>/<prefix>` a manifest object stands for.
pub const MANIFEST_HEADER: &str = "X-Object-Manifest";

/// Extra request headers attached to an object on upload.
pub type Headers = BTreeMap<String, String>;

/// One entry of a container listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full object name, or the shared prefix (ending in the delimiter) for
    /// a pseudo-directory.
    pub name: String,
    /// `true` when the entry only represents a common name prefix.
    pub is_pseudo_directory: bool,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
    /// Stored size in bytes (0 for pseudo-directories and manifests).
    pub bytes: u64,
}

impl ObjectInfo {
    /// A listing entry for a real object.
    pub fn object(name: impl Into<String>, bytes: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            is_pseudo_directory: false,
            last_modified,
            bytes,
        }
    }

    /// A listing entry for a pseudo-directory.
    pub fn pseudo_directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_pseudo_directory: true,
            last_modified: None,
            bytes: 0,
        }
    }

    /// The last `/`-separated component of the name.
    pub fn leaf(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// Build the [`MANIFEST_HEADER`] value for a chunk set.
pub fn manifest_reference(chunks_container: &str, chunks_prefix: &str) -> String {
    format!("{chunks_container}/{chunks_prefix}")
}

/// Split a [`MANIFEST_HEADER`] value into `(container, prefix)`.
pub fn parse_manifest_reference(value: &str) -> Option<(&str, &str)> {
    let (container, prefix) = value.split_once('/')?;
    if container.is_empty() {
        return None;
    }
    Some((container, prefix))
}
