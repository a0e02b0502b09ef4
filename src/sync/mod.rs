//! Tenant sync: keeps the policy store equal to the union of all tenant
//! definitions the source reports, plus the pinned bootstrap policy.

mod ledger;
pub mod offline;
mod reconciler;
mod source;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::authz::{PolicyStore, PolicyTuple};

pub use ledger::{Delta, PolicyLedger};
pub use reconciler::TenantReconciler;
pub use source::{ChannelSource, SourceError, TenantSource, WatchEvent};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Sync cannot proceed; the process should not serve.
    #[error("tenant sync failed: {0}")]
    Fatal(String),
    /// One object was skipped; sync continues.
    #[error("skipping tenant definition {key}: {reason}")]
    Transient { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Stopped,
    Starting,
    Syncing,
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Stopped => "stopped",
            SyncState::Starting => "starting",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscribes a [`TenantSource`] to a [`PolicyStore`].
pub struct TenantSync {
    source: Arc<dyn TenantSource>,
    reconciler: TenantReconciler,
}

impl TenantSync {
    pub fn new(store: Arc<PolicyStore>, source: Arc<dyn TenantSource>) -> Self {
        Self {
            source,
            reconciler: TenantReconciler::new(store),
        }
    }

    pub fn with_bootstrap(mut self, tuples: Vec<PolicyTuple>) -> Self {
        self.reconciler.pin(tuples);
        self
    }

    /// Subscribe and spawn the event loop. A failed subscription is fatal.
    pub async fn start(self) -> Result<SyncHandle, SyncError> {
        let (state_tx, state_rx) = watch::channel(SyncState::Starting);
        tracing::info!("starting tenant sync");

        let events = match self.source.subscribe().await {
            Ok(events) => events,
            Err(err) => {
                state_tx.send_replace(SyncState::Stopped);
                tracing::error!(error = %err, "tenant source subscription failed");
                return Err(SyncError::Fatal(err.to_string()));
            }
        };

        state_tx.send_replace(SyncState::Syncing);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(self.reconciler, events, shutdown_rx, state_tx));

        Ok(SyncHandle {
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

async fn run(
    mut reconciler: TenantReconciler,
    mut events: mpsc::Receiver<WatchEvent>,
    mut shutdown: oneshot::Receiver<()>,
    state: watch::Sender<SyncState>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("tenant sync stopping");
                break;
            }
            event = events.recv() => match event {
                Some(WatchEvent::Synced) => {
                    if *state.borrow() != SyncState::Synced {
                        state.send_replace(SyncState::Synced);
                        tracing::info!(
                            tenants = reconciler.tracked(),
                            policies = reconciler.store().len(),
                            "tenant sync reached initial consistency"
                        );
                    }
                }
                Some(event) => {
                    if let Err(err) = reconciler.handle(event) {
                        tracing::warn!(error = %err, "tenant definition skipped");
                    }
                }
                None => {
                    tracing::error!("tenant source closed its event stream");
                    break;
                }
            }
        }
    }
    state.send_replace(SyncState::Stopped);
}

/// Running sync. Dropping the handle stops the loop as well.
#[derive(Debug)]
pub struct SyncHandle {
    state: watch::Receiver<SyncState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Wait until the initial listing has been applied.
    pub async fn wait_synced(&mut self, deadline: Duration) -> Result<(), SyncError> {
        let reached = tokio::time::timeout(
            deadline,
            self.state
                .wait_for(|state| matches!(state, SyncState::Synced | SyncState::Stopped)),
        )
        .await;

        match reached {
            Ok(Ok(state)) if *state == SyncState::Synced => Ok(()),
            Ok(_) => Err(SyncError::Fatal(
                "tenant sync stopped before the initial listing completed".to_string(),
            )),
            Err(_) => Err(SyncError::Fatal(format!(
                "initial tenant listing not completed within {}s",
                deadline.as_secs_f64()
            ))),
        }
    }

    /// Signal the loop and wait for it to exit. Queued events are dropped.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "tenant sync task failed");
        }
    }
}
