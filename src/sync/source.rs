use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Change notification for one watched tenant-definition object. Objects are
/// raw JSON; decoding happens in the consumer so a bad object only affects
/// itself.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Value),
    Updated { old: Value, new: Value },
    Deleted(Value),
    /// The initial listing has been fully delivered.
    Synced,
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("tenant source unavailable: {0}")]
    Unavailable(String),
    #[error("tenant source supports a single subscriber")]
    AlreadySubscribed,
}

/// Something that can list and watch tenant definitions.
///
/// `subscribe` establishes the subscription (failure here is fatal for
/// startup) and returns the event stream: the initial listing as `Added`
/// events, then `Synced`, then live changes. Dropping the receiver ends the
/// subscription.
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<WatchEvent>, SourceError>;
}

/// A source driven by hand through a channel sender, for embedding and tests.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<WatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            receiver: Mutex::new(Some(rx)),
        };
        (source, tx)
    }
}

#[async_trait]
impl TenantSource for ChannelSource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<WatchEvent>, SourceError> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SourceError::AlreadySubscribed)
    }
}
