use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::TryStreamExt;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::error::{BackendError, BackendResult};
use crate::object::{Headers, ObjectInfo};
use crate::traits::{ObjectBackend, ObjectReader};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const STORAGE_URL_HEADER: &str = "X-Storage-Url";
const LISTING_PAGE_SIZE: usize = 10_000;
const LISTING_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Connection settings for a Swift cluster using v1 authentication.
#[derive(Clone, Debug)]
pub struct SwiftConfig {
    pub user: String,
    pub key: String,
    pub auth_url: String,
    pub timeout: Duration,
}

impl Default for SwiftConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            key: String::new(),
            auth_url: "https://auth.storage.memset.com/v1.0".into(),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug)]
struct Session {
    storage_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingEntry {
    Subdir {
        subdir: String,
    },
    Object {
        name: String,
        #[serde(default)]
        bytes: u64,
        #[serde(default)]
        last_modified: Option<String>,
    },
}

impl ListingEntry {
    fn into_info(self) -> ObjectInfo {
        match self {
            Self::Subdir { subdir } => ObjectInfo::pseudo_directory(subdir),
            Self::Object {
                name,
                bytes,
                last_modified,
            } => {
                let modified = last_modified.as_deref().and_then(parse_listing_date);
                ObjectInfo::object(name, bytes, modified)
            }
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Subdir { subdir } => subdir,
            Self::Object { name, .. } => name,
        }
    }
}

fn decode_listing(body: &[u8], container: &str) -> BackendResult<Vec<ListingEntry>> {
    serde_json::from_slice(body)
        .map_err(|e| BackendError::Protocol(format!("bad listing for {container}: {e}")))
}

fn parse_listing_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, LISTING_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Object backend speaking the OpenStack Swift HTTP API.
///
/// Authenticates lazily on first use and caches the storage URL and token
/// for the life of the backend. Requests are never retried.
pub struct SwiftBackend {
    client: Client,
    config: SwiftConfig,
    session: RwLock<Option<Session>>,
}

impl SwiftBackend {
    pub fn new(config: SwiftConfig) -> BackendResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            session: RwLock::new(None),
        })
    }

    /// Exchange the configured credentials for a storage URL and token.
    pub async fn authenticate(&self) -> BackendResult<()> {
        let response = self
            .client
            .get(&self.config.auth_url)
            .header("X-Auth-User", &self.config.user)
            .header("X-Auth-Key", &self.config.key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Auth(format!(
                "{} returned {}",
                self.config.auth_url,
                response.status()
            )));
        }
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| BackendError::Auth(format!("response is missing {name}")))
        };
        let storage_url = header(STORAGE_URL_HEADER)?;
        let token = header(AUTH_TOKEN_HEADER)?;
        let storage_url = Url::parse(&storage_url)
            .map_err(|e| BackendError::Auth(format!("bad storage URL {storage_url:?}: {e}")))?;

        info!(user = %self.config.user, storage = %storage_url, "authenticated");
        *self.session.write().await = Some(Session { storage_url, token });
        Ok(())
    }

    async fn session(&self) -> BackendResult<Session> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        self.authenticate().await?;
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| BackendError::Auth("no session after authentication".into()))
    }

    fn url(session: &Session, container: &str, path: Option<&str>) -> BackendResult<Url> {
        let mut url = session.storage_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::Protocol("storage URL cannot be a base".into()))?;
            segments.pop_if_empty().push(container);
            if let Some(path) = path {
                segments.extend(path.split('/'));
            }
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        container: &str,
        path: Option<&str>,
    ) -> BackendResult<(RequestBuilder, Url)> {
        let session = self.session().await?;
        let url = Self::url(&session, container, path)?;
        let builder = self
            .client
            .request(method, url.clone())
            .header(AUTH_TOKEN_HEADER, session.token);
        Ok((builder, url))
    }

    /// Map a response status into the backend error taxonomy.
    fn check(response: Response, container: &str, path: Option<&str>) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(match (status, path) {
            (StatusCode::NOT_FOUND, Some(path)) => BackendError::NotFound {
                container: container.to_string(),
                path: path.to_string(),
            },
            (StatusCode::NOT_FOUND, None) => BackendError::ContainerNotFound(container.to_string()),
            (StatusCode::UNAUTHORIZED, _) => {
                BackendError::Auth(format!("token rejected by {}", response.url()))
            }
            _ => BackendError::Status {
                code: status.as_u16(),
                url: response.url().to_string(),
            },
        })
    }

    async fn put(
        &self,
        container: &str,
        path: &str,
        body: &[u8],
        headers: &Headers,
        mime_type: &str,
    ) -> BackendResult<()> {
        let (mut builder, url) = self.request(Method::PUT, container, Some(path)).await?;
        builder = builder.header(reqwest::header::CONTENT_TYPE, mime_type);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(body.to_vec()).send().await?;
        Self::check(response, container, Some(path))?;
        debug!(%url, bytes = body.len(), "put object");
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for SwiftBackend {
    async fn container_exists(&self, container: &str) -> BackendResult<bool> {
        let (builder, _) = self.request(Method::HEAD, container, None).await?;
        let response = builder.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response, container, None)?;
        Ok(true)
    }

    async fn create_container(&self, container: &str) -> BackendResult<()> {
        let (builder, _) = self.request(Method::PUT, container, None).await?;
        let response = builder.header(reqwest::header::CONTENT_LENGTH, 0).send().await?;
        Self::check(response, container, None)?;
        info!(container, "created container");
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> BackendResult<Vec<ObjectInfo>> {
        let mut listing = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let (mut builder, _) = self.request(Method::GET, container, None).await?;
            let limit = LISTING_PAGE_SIZE.to_string();
            builder = builder.query(&[("format", "json"), ("prefix", prefix), ("limit", limit.as_str())]);
            if let Some(delimiter) = delimiter {
                builder = builder.query(&[("delimiter", delimiter.to_string())]);
            }
            if let Some(marker) = &marker {
                builder = builder.query(&[("marker", marker)]);
            }
            let response = Self::check(builder.send().await?, container, None)?;
            let body = response.bytes().await?;
            let page = decode_listing(&body, container)?;

            let full_page = page.len() == LISTING_PAGE_SIZE;
            marker = page.last().map(|entry| entry.name().to_string());
            listing.extend(page.into_iter().map(ListingEntry::into_info));
            if !full_page {
                break;
            }
        }
        Ok(listing)
    }

    async fn get_object(&self, container: &str, path: &str) -> BackendResult<ObjectReader> {
        let (builder, url) = self.request(Method::GET, container, Some(path)).await?;
        let response = Self::check(builder.send().await?, container, Some(path))?;
        debug!(%url, "streaming object");
        let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(Box::new(StreamReader::new(body)))
    }

    async fn put_object_bytes(
        &self,
        container: &str,
        path: &str,
        data: &[u8],
        mime_type: &str,
    ) -> BackendResult<()> {
        self.put(container, path, data, &Headers::new(), mime_type).await
    }

    async fn put_object_with_headers(
        &self,
        container: &str,
        path: &str,
        body: &[u8],
        headers: &Headers,
        mime_type: &str,
    ) -> BackendResult<()> {
        self.put(container, path, body, headers, mime_type).await
    }

    async fn delete_object(&self, container: &str, path: &str) -> BackendResult<()> {
        let (builder, url) = self.request(Method::DELETE, container, Some(path)).await?;
        Self::check(builder.send().await?, container, Some(path))?;
        debug!(%url, "deleted object");
        Ok(())
    }
}

impl std::fmt::Debug for SwiftBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftBackend")
            .field("user", &self.config.user)
            .field("auth_url", &self.config.auth_url)
            .finish()
    }
}
