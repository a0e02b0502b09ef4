//! Minimal Kubernetes API client for namespaced custom resources.

mod informer;

use std::path::{Path, PathBuf};

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

pub use informer::KubeTenantSource;

pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Server-side watch timeout; the informer re-watches when it elapses.
const WATCH_TIMEOUT_SECS: u32 = 290;

#[derive(thiserror::Error, Debug)]
pub enum KubeError {
    #[error("kubernetes request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("kubernetes API returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("could not decode kubernetes response: {0}")]
    Decode(String),
    #[error("resource version is too old")]
    Gone,
    #[error("invalid kubernetes configuration: {0}")]
    Config(String),
}

impl KubeError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Status { code: 409, .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct KubeConfig {
    pub api_server: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
}

impl KubeConfig {
    /// Service-account credentials of the pod this process runs in.
    pub fn in_cluster() -> Result<Self, KubeError> {
        Self::from_parts(None, None, None)
    }

    /// Explicit settings, each falling back to its in-cluster default. A
    /// missing default token or CA file is not an error.
    pub fn from_parts(
        api_server: Option<String>,
        token_file: Option<PathBuf>,
        ca_file: Option<PathBuf>,
    ) -> Result<Self, KubeError> {
        let api_server = match api_server {
            Some(server) => server,
            None => {
                let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
                    KubeError::Config(
                        "KUBERNETES_SERVICE_HOST is not set and no API server was given".into(),
                    )
                })?;
                let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
                if host.contains(':') {
                    format!("https://[{host}]:{port}")
                } else {
                    format!("https://{host}:{port}")
                }
            }
        };

        let token = read_optional(token_file, SERVICE_ACCOUNT_TOKEN)?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|token| !token.is_empty());
        let ca_pem = read_optional(ca_file, SERVICE_ACCOUNT_CA)?;

        Ok(Self {
            api_server: api_server.trim_end_matches('/').to_string(),
            token,
            ca_pem,
        })
    }
}

fn read_optional(explicit: Option<PathBuf>, default: &str) -> Result<Option<Vec<u8>>, KubeError> {
    match explicit {
        Some(path) => std::fs::read(&path)
            .map(Some)
            .map_err(|err| KubeError::Config(format!("{}: {err}", path.display()))),
        None if Path::new(default).exists() => std::fs::read(default)
            .map(Some)
            .map_err(|err| KubeError::Config(format!("{default}: {err}"))),
        None => Ok(None),
    }
}

/// A namespaced custom resource collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub group: String,
    pub version: String,
    pub plural: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        plural: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            plural: plural.into(),
            namespace: namespace.into(),
        }
    }

    pub fn projects(namespace: impl Into<String>) -> Self {
        use crate::models::project::{API_GROUP, API_VERSION, PLURAL};
        Self::new(API_GROUP, API_VERSION, PLURAL, namespace)
    }

    pub fn path(&self) -> String {
        format!(
            "/apis/{}/{}/namespaces/{}/{}",
            self.group, self.version, self.namespace, self.plural
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<Value>,
    pub resource_version: String,
}

#[derive(Debug, Deserialize)]
struct RawList {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    metadata: RawListMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListMeta {
    #[serde(default)]
    resource_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameKind {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One line of a watch response.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub object: Value,
}

impl WatchFrame {
    pub fn decode(line: &[u8]) -> Result<Self, KubeError> {
        serde_json::from_slice(line).map_err(|err| KubeError::Decode(err.to_string()))
    }
}

/// Newline-delimited watch frames read from a streaming response.
#[derive(Debug)]
pub struct WatchStream {
    response: reqwest::Response,
    buffer: Vec<u8>,
}

impl WatchStream {
    /// Next frame, or `None` once the server closes the watch.
    pub async fn next_frame(&mut self) -> Result<Option<WatchFrame>, KubeError> {
        loop {
            if let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=end).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return WatchFrame::decode(&line).map(Some);
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None if self.buffer.iter().all(u8::is_ascii_whitespace) => return Ok(None),
                None => {
                    let line = std::mem::take(&mut self.buffer);
                    return WatchFrame::decode(&line).map(Some);
                }
            }
        }
    }
}

/// Thin client over the Kubernetes REST API. Built once and shared.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(config: KubeConfig) -> Result<Self, KubeError> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|err| KubeError::Config(format!("invalid CA bundle: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base: config.api_server.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn list(
        &self,
        resource: &ResourceRef,
        label_selector: Option<&str>,
    ) -> Result<ObjectList, KubeError> {
        let mut request = self.request(Method::GET, format!("{}{}", self.base, resource.path()));
        if let Some(selector) = label_selector {
            request = request.query(&[("labelSelector", selector)]);
        }

        let response = check(request.send().await?).await?;
        let list: RawList = response
            .json()
            .await
            .map_err(|err| KubeError::Decode(err.to_string()))?;
        Ok(ObjectList {
            items: list.items,
            resource_version: list.metadata.resource_version,
        })
    }

    pub async fn get(&self, resource: &ResourceRef, name: &str) -> Result<Option<Value>, KubeError> {
        let url = format!("{}{}/{}", self.base, resource.path(), name);
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let object = check(response)
            .await?
            .json()
            .await
            .map_err(|err| KubeError::Decode(err.to_string()))?;
        Ok(Some(object))
    }

    pub async fn create(&self, resource: &ResourceRef, object: &Value) -> Result<Value, KubeError> {
        let response = self
            .request(Method::POST, format!("{}{}", self.base, resource.path()))
            .json(object)
            .send()
            .await?;
        check(response)
            .await?
            .json()
            .await
            .map_err(|err| KubeError::Decode(err.to_string()))
    }

    /// Open a watch starting after `resource_version` (empty means "now").
    pub async fn watch(
        &self,
        resource: &ResourceRef,
        label_selector: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream, KubeError> {
        let mut query = vec![
            ("watch", "true".to_string()),
            ("allowWatchBookmarks", "true".to_string()),
            ("timeoutSeconds", WATCH_TIMEOUT_SECS.to_string()),
        ];
        if !resource_version.is_empty() {
            query.push(("resourceVersion", resource_version.to_string()));
        }
        if let Some(selector) = label_selector {
            query.push(("labelSelector", selector.to_string()));
        }

        let response = self
            .request(Method::GET, format!("{}{}", self.base, resource.path()))
            .query(&query)
            .send()
            .await?;
        if response.status() == StatusCode::GONE {
            return Err(KubeError::Gone);
        }

        Ok(WatchStream {
            response: check(response).await?,
            buffer: Vec::new(),
        })
    }
}

/// Turn a non-success response into `KubeError::Status`, using the API's
/// `Status.message` when the body carries one.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, KubeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(KubeError::Status {
        code: status.as_u16(),
        message,
    })
}
