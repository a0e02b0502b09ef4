use std::sync::Arc;

use serde_json::Value;

use super::ledger::PolicyLedger;
use super::source::WatchEvent;
use super::SyncError;
use crate::authz::{PolicyStore, PolicyTuple};
use crate::models::tenant::{ObjectKey, TenantDefinition};

/// Key under which bootstrap tuples are owned. Kubernetes names cannot start
/// with `@`, so no watched object collides with it.
fn bootstrap_key() -> ObjectKey {
    ObjectKey::new("", "@bootstrap")
}

/// Applies tenant-definition events to the policy store.
#[derive(Debug)]
pub struct TenantReconciler {
    store: Arc<PolicyStore>,
    ledger: PolicyLedger,
}

impl TenantReconciler {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self {
            store,
            ledger: PolicyLedger::new(),
        }
    }

    /// Install tuples that belong to no tenant object. They stay for the
    /// lifetime of the reconciler, even if a tenant declares and then drops
    /// the same tuple.
    pub fn pin(&mut self, tuples: impl IntoIterator<Item = PolicyTuple>) {
        let tuples = tuples.into_iter().collect();
        let delta = self.ledger.replace(bootstrap_key(), tuples);
        tracing::info!(tuples = delta.added.len(), "bootstrap policy installed");
        delta.apply(&self.store);
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Number of tenant objects currently applied.
    pub fn tracked(&self) -> usize {
        self.ledger
            .len()
            .saturating_sub(usize::from(self.ledger.applied(&bootstrap_key()).is_some()))
    }

    /// Handle one event. `Synced` is a no-op here; the sync loop owns state.
    pub fn handle(&mut self, event: WatchEvent) -> Result<(), SyncError> {
        match event {
            WatchEvent::Added(object) => self.apply(&object),
            // The ledger holds what was last applied for the key, so `old` is
            // only consulted when the object was renamed.
            WatchEvent::Updated { old, new } => {
                let old_key = ObjectKey::from_object(&old);
                let new_key = ObjectKey::from_object(&new);
                if let (Some(old_key), Some(new_key)) = (old_key, new_key) {
                    if old_key != new_key {
                        self.forget(&old_key);
                    }
                }
                self.apply(&new)
            }
            WatchEvent::Deleted(object) => {
                let key = ObjectKey::from_object(&object).ok_or_else(|| SyncError::Transient {
                    key: "<unknown>".to_string(),
                    reason: "deleted object has no metadata.name".to_string(),
                })?;
                self.forget(&key);
                Ok(())
            }
            WatchEvent::Synced => Ok(()),
        }
    }

    fn apply(&mut self, object: &Value) -> Result<(), SyncError> {
        let definition = TenantDefinition::from_object(object).map_err(|err| {
            SyncError::Transient {
                key: ObjectKey::from_object(object)
                    .map(|key| key.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                reason: err.to_string(),
            }
        })?;

        for tuple in definition.foreign_tuples() {
            tracing::warn!(
                tenant = %definition.tenant,
                tuple = %tuple,
                "tenant definition declares a tuple for another tenant"
            );
        }

        let delta = self.ledger.replace(definition.key.clone(), definition.tuples());
        delta.apply(&self.store);
        tracing::info!(
            key = %definition.key,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "tenant definition applied"
        );
        Ok(())
    }

    fn forget(&mut self, key: &ObjectKey) {
        if self.ledger.applied(key).is_none() {
            tracing::debug!(key = %key, "delete for unknown tenant definition");
            return;
        }
        let delta = self.ledger.forget(key);
        delta.apply(&self.store);
        tracing::info!(key = %key, removed = delta.removed.len(), "tenant definition removed");
    }
}
