use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{FrameKind, KubeClient, KubeError, ResourceRef};
use crate::models::tenant::ObjectKey;
use crate::sync::{SourceError, TenantSource, WatchEvent};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// List-then-watch source over a namespaced custom resource.
#[derive(Debug, Clone)]
pub struct KubeTenantSource {
    client: Arc<KubeClient>,
    resource: ResourceRef,
    label_selector: Option<String>,
    capacity: usize,
}

impl KubeTenantSource {
    pub fn new(client: Arc<KubeClient>, resource: ResourceRef) -> Self {
        Self {
            client,
            resource,
            label_selector: None,
            capacity: 256,
        }
    }

    pub fn with_label_selector(mut self, selector: Option<String>) -> Self {
        self.label_selector = selector.filter(|s| !s.is_empty());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl TenantSource for KubeTenantSource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<WatchEvent>, SourceError> {
        let list = self
            .client
            .list(&self.resource, self.label_selector.as_deref())
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        tracing::info!(
            resource = %self.resource.plural,
            namespace = %self.resource.namespace,
            objects = list.items.len(),
            resource_version = %list.resource_version,
            "initial listing fetched"
        );

        let (tx, rx) = mpsc::channel(self.capacity);
        let informer = Informer {
            client: self.client.clone(),
            resource: self.resource.clone(),
            label_selector: self.label_selector.clone(),
            cache: BTreeMap::new(),
            resource_version: list.resource_version,
            tx,
        };
        tokio::spawn(informer.run(list.items));
        Ok(rx)
    }
}

enum Flow {
    /// The server ended the watch; `bool` is whether any frame arrived.
    Ended(bool),
    /// The consumer dropped its receiver.
    Closed,
}

struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

struct Informer {
    client: Arc<KubeClient>,
    resource: ResourceRef,
    label_selector: Option<String>,
    cache: BTreeMap<ObjectKey, Value>,
    resource_version: String,
    tx: mpsc::Sender<WatchEvent>,
}

impl Informer {
    async fn run(mut self, initial: Vec<Value>) {
        for object in initial {
            if let Some(key) = ObjectKey::from_object(&object) {
                self.cache.insert(key, object.clone());
            }
            if !self.emit(WatchEvent::Added(object)).await {
                return;
            }
        }
        if !self.emit(WatchEvent::Synced).await {
            return;
        }

        let mut backoff = Backoff::new();
        loop {
            let outcome = match self.watch_once().await {
                Ok(Flow::Closed) => break,
                Ok(Flow::Ended(true)) => {
                    backoff.reset();
                    continue;
                }
                Ok(Flow::Ended(false)) => Ok(()),
                Err(KubeError::Gone) => {
                    tracing::info!(
                        resource_version = %self.resource_version,
                        "watch expired, relisting"
                    );
                    match self.relist().await {
                        Ok(()) => {
                            backoff.reset();
                            continue;
                        }
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(err),
            };

            let delay = match outcome {
                Ok(()) if self.tx.is_closed() => break,
                Ok(()) => backoff.next_delay(),
                Err(err) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(error = %err, retry_in = ?delay, "tenant watch failed");
                    delay
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.tx.closed() => break,
            }
        }
        tracing::debug!(resource = %self.resource.plural, "tenant informer stopped");
    }

    async fn watch_once(&mut self) -> Result<Flow, KubeError> {
        let mut stream = self
            .client
            .watch(
                &self.resource,
                self.label_selector.as_deref(),
                &self.resource_version,
            )
            .await?;

        let mut seen = false;
        loop {
            let frame = tokio::select! {
                frame = stream.next_frame() => frame?,
                _ = self.tx.closed() => return Ok(Flow::Closed),
            };
            let Some(frame) = frame else {
                return Ok(Flow::Ended(seen));
            };
            seen = true;

            if frame.kind == FrameKind::Error {
                let code = frame.object.get("code").and_then(Value::as_u64).unwrap_or(0);
                if code == 410 {
                    return Err(KubeError::Gone);
                }
                let message = frame
                    .object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("watch error")
                    .to_string();
                return Err(KubeError::Status {
                    code: u16::try_from(code).unwrap_or(500),
                    message,
                });
            }

            if let Some(version) = resource_version(&frame.object) {
                self.resource_version = version;
            }
            let event = match frame.kind {
                FrameKind::Bookmark | FrameKind::Error => continue,
                FrameKind::Added | FrameKind::Modified => self.upsert(frame.object),
                FrameKind::Deleted => {
                    if let Some(key) = ObjectKey::from_object(&frame.object) {
                        self.cache.remove(&key);
                    }
                    WatchEvent::Deleted(frame.object)
                }
            };
            if !self.emit(event).await {
                return Ok(Flow::Closed);
            }
        }
    }

    fn upsert(&mut self, object: Value) -> WatchEvent {
        let Some(key) = ObjectKey::from_object(&object) else {
            return WatchEvent::Added(object);
        };
        match self.cache.insert(key, object.clone()) {
            Some(old) => WatchEvent::Updated { old, new: object },
            None => WatchEvent::Added(object),
        }
    }

    /// Fetch a fresh listing and emit the difference against the cache.
    async fn relist(&mut self) -> Result<(), KubeError> {
        let list = self
            .client
            .list(&self.resource, self.label_selector.as_deref())
            .await?;

        let mut fresh = BTreeMap::new();
        for object in list.items {
            if let Some(key) = ObjectKey::from_object(&object) {
                fresh.insert(key, object);
            }
        }

        let mut events = Vec::new();
        for (key, object) in &fresh {
            match self.cache.get(key) {
                Some(old) if old == object => {}
                Some(old) => events.push(WatchEvent::Updated {
                    old: old.clone(),
                    new: object.clone(),
                }),
                None => events.push(WatchEvent::Added(object.clone())),
            }
        }
        for (key, old) in &self.cache {
            if !fresh.contains_key(key) {
                events.push(WatchEvent::Deleted(old.clone()));
            }
        }

        self.cache = fresh;
        self.resource_version = list.resource_version;
        tracing::info!(changes = events.len(), "relist reconciled against cache");
        for event in events {
            if !self.emit(event).await {
                break;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: WatchEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

fn resource_version(object: &Value) -> Option<String> {
    object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .map(str::to_string)
}
