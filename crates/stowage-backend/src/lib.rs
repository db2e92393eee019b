//! Object storage backends for Stowage.
//!
//! Everything above this crate talks to storage through the [`ObjectBackend`]
//! trait, which models a Swift-style object store: named containers holding
//! flat object names, where `/` inside a name is only a convention that
//! listings can collapse into pseudo-directories.
//!
//! # Backends
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based store for tests and embedding.
//!   It emulates dynamic large objects on read and can inject failures.
//! - [`SwiftBackend`] -- HTTP client for OpenStack Swift with v1 auth.
//!
//! # Dynamic large objects
//!
//! A logical object larger than one upload is stored as numbered chunk
//! objects plus a zero-byte manifest object carrying a single
//! [`MANIFEST_HEADER`]. Reading the manifest yields the ordered
//! concatenation of every object under the referenced prefix. Assembling
//! that stream is the backend's job, never the caller's.

pub mod error;
pub mod memory;
pub mod object;
pub mod swift;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use memory::InMemoryBackend;
pub use object::{manifest_reference, parse_manifest_reference, Headers, ObjectInfo, MANIFEST_HEADER};
pub use swift::{SwiftBackend, SwiftConfig};
pub use traits::{ObjectBackend, ObjectReader};
