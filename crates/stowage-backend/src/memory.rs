use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::object::{parse_manifest_reference, Headers, ObjectInfo, MANIFEST_HEADER};
use crate::traits::{ObjectBackend, ObjectReader};

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Vec<u8>,
    content_type: String,
    headers: Headers,
    last_modified: DateTime<Utc>,
}

impl MemoryObject {
    fn manifest(&self) -> Option<&str> {
        self.headers.get(MANIFEST_HEADER).map(String::as_str)
    }
}

type Container = BTreeMap<String, MemoryObject>;

/// In-memory, `BTreeMap`-based object backend.
///
/// Intended for tests and embedding. Containers live behind a `RwLock` so
/// concurrent chunk uploads are safe. Manifest objects are expanded on read
/// the same way a Swift proxy expands dynamic large objects.
///
/// Failures can be injected per object path for puts and deletes, and every
/// trait call is counted so tests can assert that no backend work happened.
///
/// `last_modified` comes from a logical clock: each stored object is stamped
/// one second after the previous one, counting from the Unix epoch.
pub struct InMemoryBackend {
    containers: RwLock<BTreeMap<String, Container>>,
    failing_puts: RwLock<HashSet<String>>,
    failing_deletes: RwLock<HashSet<String>>,
    calls: AtomicUsize,
    clock: AtomicI64,
}

impl InMemoryBackend {
    /// Create a new backend with no containers.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            failing_puts: RwLock::new(HashSet::new()),
            failing_deletes: RwLock::new(HashSet::new()),
            calls: AtomicUsize::new(0),
            clock: AtomicI64::new(0),
        }
    }

    /// Create a backend that already holds the given empty container.
    pub fn with_container(container: &str) -> Self {
        let backend = Self::new();
        backend
            .containers
            .write()
            .expect("lock poisoned")
            .insert(container.to_string(), Container::new());
        backend
    }

    /// Make every later put of `path` fail.
    pub fn fail_put(&self, path: impl Into<String>) {
        self.failing_puts.write().expect("lock poisoned").insert(path.into());
    }

    /// Make every later delete of `path` fail.
    pub fn fail_delete(&self, path: impl Into<String>) {
        self.failing_deletes.write().expect("lock poisoned").insert(path.into());
    }

    /// Forget all injected failures.
    pub fn clear_failures(&self) {
        self.failing_puts.write().expect("lock poisoned").clear();
        self.failing_deletes.write().expect("lock poisoned").clear();
    }

    /// Number of trait calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw stored bytes of an object, without manifest expansion.
    pub fn object_data(&self, container: &str, path: &str) -> Option<Vec<u8>> {
        let containers = self.containers.read().expect("lock poisoned");
        containers.get(container)?.get(path).map(|obj| obj.data.clone())
    }

    /// Headers stored with an object.
    pub fn object_headers(&self, container: &str, path: &str) -> Option<Headers> {
        let containers = self.containers.read().expect("lock poisoned");
        containers.get(container)?.get(path).map(|obj| obj.headers.clone())
    }

    /// Content type stored with an object.
    pub fn content_type(&self, container: &str, path: &str) -> Option<String> {
        let containers = self.containers.read().expect("lock poisoned");
        containers
            .get(container)?
            .get(path)
            .map(|obj| obj.content_type.clone())
    }

    /// Sorted names of every object in a container.
    pub fn object_names(&self, container: &str) -> Vec<String> {
        let containers = self.containers.read().expect("lock poisoned");
        containers
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of objects across all containers.
    pub fn len(&self) -> usize {
        self.containers
            .read()
            .expect("lock poisoned")
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns `true` if no container holds any object.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tick(&self) -> DateTime<Utc> {
        let seconds = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        DateTime::<Utc>::default() + Duration::seconds(seconds)
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_put(&self, path: &str) -> BackendResult<()> {
        if self.failing_puts.read().expect("lock poisoned").contains(path) {
            return Err(BackendError::Injected(path.to_string()));
        }
        Ok(())
    }

    fn store(
        &self,
        container: &str,
        path: &str,
        data: &[u8],
        headers: Headers,
        mime_type: &str,
    ) -> BackendResult<()> {
        self.check_put(path)?;
        let mut containers = self.containers.write().expect("lock poisoned");
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?;
        objects.insert(
            path.to_string(),
            MemoryObject {
                data: data.to_vec(),
                content_type: mime_type.to_string(),
                headers,
                last_modified: self.tick(),
            },
        );
        debug!(container, path, bytes = data.len(), "stored object");
        Ok(())
    }

    /// Concatenate every non-manifest object under `<container>/<prefix>`.
    fn assemble(
        containers: &BTreeMap<String, Container>,
        reference: &str,
    ) -> BackendResult<Vec<u8>> {
        let (container, prefix) = parse_manifest_reference(reference)
            .ok_or_else(|| BackendError::Protocol(format!("bad manifest reference {reference:?}")))?;
        let objects = containers
            .get(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?;
        let mut data = Vec::new();
        for (_, segment) in objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .filter(|(_, obj)| obj.manifest().is_none())
        {
            data.extend_from_slice(&segment.data);
        }
        Ok(data)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn container_exists(&self, container: &str) -> BackendResult<bool> {
        self.count_call();
        Ok(self
            .containers
            .read()
            .expect("lock poisoned")
            .contains_key(container))
    }

    async fn create_container(&self, container: &str) -> BackendResult<()> {
        self.count_call();
        self.containers
            .write()
            .expect("lock poisoned")
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> BackendResult<Vec<ObjectInfo>> {
        self.count_call();
        let containers = self.containers.read().expect("lock poisoned");
        let objects = containers
            .get(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?;

        let mut listing: BTreeMap<String, ObjectInfo> = BTreeMap::new();
        for (name, obj) in objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
        {
            let rest = &name[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|at| at + d.len_utf8())) {
                Some(end) => {
                    let dir = format!("{prefix}{}", &rest[..end]);
                    listing
                        .entry(dir.clone())
                        .or_insert_with(|| ObjectInfo::pseudo_directory(dir));
                }
                None => {
                    listing.insert(
                        name.clone(),
                        ObjectInfo::object(name.clone(), obj.data.len() as u64, Some(obj.last_modified)),
                    );
                }
            }
        }
        Ok(listing.into_values().collect())
    }

    async fn get_object(&self, container: &str, path: &str) -> BackendResult<ObjectReader> {
        self.count_call();
        let containers = self.containers.read().expect("lock poisoned");
        let obj = containers
            .get(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?
            .get(path)
            .ok_or_else(|| BackendError::NotFound {
                container: container.to_string(),
                path: path.to_string(),
            })?;
        let data = match obj.manifest() {
            Some(reference) => Self::assemble(&containers, reference)?,
            None => obj.data.clone(),
        };
        Ok(Box::new(Cursor::new(data)))
    }

    async fn put_object_bytes(
        &self,
        container: &str,
        path: &str,
        data: &[u8],
        mime_type: &str,
    ) -> BackendResult<()> {
        self.count_call();
        self.store(container, path, data, Headers::new(), mime_type)
    }

    async fn put_object_with_headers(
        &self,
        container: &str,
        path: &str,
        body: &[u8],
        headers: &Headers,
        mime_type: &str,
    ) -> BackendResult<()> {
        self.count_call();
        self.store(container, path, body, headers.clone(), mime_type)
    }

    async fn delete_object(&self, container: &str, path: &str) -> BackendResult<()> {
        self.count_call();
        if self.failing_deletes.read().expect("lock poisoned").contains(path) {
            return Err(BackendError::Injected(path.to_string()));
        }
        let mut containers = self.containers.write().expect("lock poisoned");
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?;
        objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound {
                container: container.to_string(),
                path: path.to_string(),
            })
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("object_count", &self.len())
            .field("calls", &self.call_count())
            .finish()
    }
}
