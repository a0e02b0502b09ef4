use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::authz::{PolicyStore, PolicyTuple};
use crate::oidc::TokenVerifier;
use crate::sync::{SyncError, SyncHandle, SyncState, TenantSource, TenantSync};

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub bootstrap: Vec<PolicyTuple>,
    pub sync_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

/// The running authorization core: a ready verifier and a store that has
/// reached initial consistency with the tenant source.
#[derive(Debug)]
pub struct Runtime {
    store: Arc<PolicyStore>,
    verifier: Arc<TokenVerifier>,
    sync: SyncHandle,
}

impl Runtime {
    /// Start tenant sync and block until the initial listing is applied. The
    /// verifier is taken already discovered, so it is ready before any
    /// decision can be made.
    pub async fn start(
        verifier: Arc<TokenVerifier>,
        source: Arc<dyn TenantSource>,
        options: RuntimeOptions,
    ) -> Result<Self, SyncError> {
        let store = PolicyStore::new()
            .await
            .map_err(|err| SyncError::Fatal(format!("policy engine: {err}")))?;
        let store = Arc::new(store);
        let mut sync = TenantSync::new(store.clone(), source)
            .with_bootstrap(options.bootstrap)
            .start()
            .await?;

        if let Err(err) = sync.wait_synced(options.sync_timeout).await {
            tracing::error!(error = %err, "tenant sync did not become ready");
            sync.shutdown().await;
            return Err(err);
        }

        tracing::info!(policies = store.len(), "authorization runtime ready");
        Ok(Self {
            store,
            verifier,
            sync,
        })
    }

    pub fn store(&self) -> Arc<PolicyStore> {
        self.store.clone()
    }

    pub fn verifier(&self) -> Arc<TokenVerifier> {
        self.verifier.clone()
    }

    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync.subscribe_state()
    }

    pub async fn shutdown(self) {
        tracing::info!("shutting down authorization runtime");
        self.sync.shutdown().await;
    }
}
