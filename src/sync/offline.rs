//! Load tenant definitions from JSON files instead of a live source, for
//! checking policy before it is applied to a cluster.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use super::{SyncError, TenantReconciler, WatchEvent};
use crate::authz::{model, PolicyStore, PolicyTuple};
use crate::models::tenant::TenantDefinition;

/// A store filled from files, plus the objects that were skipped.
pub struct OfflinePolicy {
    pub store: Arc<PolicyStore>,
    pub skipped: Vec<SyncError>,
}

/// Read project objects from `files`. A file holds one object or a list
/// (`{"items": [...]}`) as returned by the API server.
pub fn read_objects(files: &[PathBuf]) -> anyhow::Result<Vec<Value>> {
    let mut objects = Vec::new();
    for path in files {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;

        match value.get("items").and_then(Value::as_array) {
            Some(items) => objects.extend(items.iter().cloned()),
            None => objects.push(value),
        }
    }
    Ok(objects)
}

/// Apply `objects` the way tenant sync would, with `bootstrap` pinned.
pub async fn load(objects: Vec<Value>, bootstrap: Vec<PolicyTuple>) -> anyhow::Result<OfflinePolicy> {
    let store = Arc::new(PolicyStore::new().await?);
    let mut reconciler = TenantReconciler::new(store.clone());
    reconciler.pin(bootstrap);

    let mut skipped = Vec::new();
    for object in objects {
        if let Err(err) = reconciler.handle(WatchEvent::Added(object)) {
            tracing::warn!(error = %err, "skipping definition");
            skipped.push(err);
        }
    }
    Ok(OfflinePolicy { store, skipped })
}

/// Problems a definition would cause once applied, one line each.
pub fn lint(objects: &[Value]) -> Vec<String> {
    let mut problems = Vec::new();
    for object in objects {
        let definition = match TenantDefinition::from_object(object) {
            Ok(definition) => definition,
            Err(err) => {
                problems.push(err.to_string());
                continue;
            }
        };

        for tuple in definition.foreign_tuples() {
            problems.push(format!("{}: tuple for another tenant: {}", definition.key, tuple));
        }
        let anonymous = definition
            .rules
            .iter()
            .filter(|rule| rule.subject.is_empty())
            .map(ToString::to_string)
            .chain(
                definition
                    .groups
                    .iter()
                    .filter(|group| group.subject.is_empty())
                    .map(ToString::to_string),
            );
        for tuple in anonymous {
            problems.push(format!("{}: tuple without a subject: {}", definition.key, tuple));
        }
        for rule in &definition.rules {
            if let Err(err) = model::key_match2("", &rule.resource) {
                problems.push(format!("{}: {}", definition.key, err));
            }
        }
    }
    problems
}
