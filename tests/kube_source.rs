mod common;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tenant_authz::kube::{KubeConfig, KubeTenantSource, ResourceRef};
use tenant_authz::sync::{TenantSource, WatchEvent};

use common::{kube_client, project, spawn_kube, NAMESPACE};

#[derive(Default)]
struct Script {
    lists: AtomicUsize,
    watches: AtomicUsize,
    watch_queries: Mutex<Vec<BTreeMap<String, String>>>,
}

fn versioned(name: &str, admin: &str, rv: &str) -> Value {
    let mut object = project(name, admin);
    object["metadata"]["resourceVersion"] = json!(rv);
    object
}

fn frame(kind: &str, object: Value) -> String {
    format!("{}\n", json!({"type": kind, "object": object}))
}

/// Fake API server: the first watch streams a few changes and ends, the
/// second reports an expired resource version, later watches hang. The
/// listing after expiry differs from the informer's cache.
async fn scripted_api() -> (String, Arc<Script>) {
    async fn collection(
        State(script): State<Arc<Script>>,
        Query(query): Query<BTreeMap<String, String>>,
    ) -> Response {
        if query.get("watch").map(String::as_str) != Some("true") {
            let items = match script.lists.fetch_add(1, Ordering::SeqCst) {
                0 => vec![versioned("p1", "alice@example.com", "1")],
                _ => vec![
                    versioned("p2", "carol@example.com", "9"),
                    versioned("p3", "dave@example.com", "10"),
                ],
            };
            let rv = if items.len() == 1 { "1" } else { "10" };
            return Json(json!({"metadata": {"resourceVersion": rv}, "items": items})).into_response();
        }

        script.watch_queries.lock().unwrap().push(query);
        match script.watches.fetch_add(1, Ordering::SeqCst) {
            0 => {
                let body = [
                    frame("MODIFIED", versioned("p1", "bob@example.com", "4")),
                    frame("ADDED", versioned("p2", "bob@example.com", "5")),
                    frame("DELETED", versioned("p1", "bob@example.com", "6")),
                    frame("BOOKMARK", json!({"kind": "Project", "metadata": {"resourceVersion": "7"}})),
                ]
                .concat();
                ([(header::CONTENT_TYPE, "application/json")], body).into_response()
            }
            1 => frame(
                "ERROR",
                json!({"kind": "Status", "code": 410, "message": "too old resource version: 7 (8)"}),
            )
            .into_response(),
            _ => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                StatusCode::OK.into_response()
            }
        }
    }

    let script = Arc::new(Script::default());
    let app = Router::new()
        .route("/apis/:group/:version/namespaces/:namespace/:plural", get(collection))
        .with_state(script.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    (format!("http://{addr}"), script)
}

async fn next(rx: &mut mpsc::Receiver<WatchEvent>) -> Result<WatchEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("event stream closed"))
}

fn name(object: &Value) -> &str {
    object["metadata"]["name"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn informer_lists_watches_and_relists_after_expiry() -> Result<()> {
    let (base, script) = scripted_api().await;
    // a one-slot buffer: the informer waits on the consumer instead of dropping
    let source = KubeTenantSource::new(kube_client(&base), ResourceRef::projects(NAMESPACE))
        .with_capacity(0);
    let mut rx = source.subscribe().await?;

    assert!(matches!(next(&mut rx).await?, WatchEvent::Added(ref o) if name(o) == "p1"));
    assert_eq!(next(&mut rx).await?, WatchEvent::Synced);

    match next(&mut rx).await? {
        WatchEvent::Updated { old, new } => {
            assert_eq!(old["metadata"]["resourceVersion"], "1");
            assert_eq!(new["metadata"]["resourceVersion"], "4");
            assert_eq!(new["spec"]["rbac"]["groups"][0]["v0"], "bob@example.com");
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert!(matches!(next(&mut rx).await?, WatchEvent::Added(ref o) if name(o) == "p2"));
    assert!(matches!(next(&mut rx).await?, WatchEvent::Deleted(ref o) if name(o) == "p1"));

    // expiry: the relist is diffed against what was already delivered
    match next(&mut rx).await? {
        WatchEvent::Updated { old, new } => {
            assert_eq!(name(&new), "p2");
            assert_eq!(old["metadata"]["resourceVersion"], "5");
            assert_eq!(new["metadata"]["resourceVersion"], "9");
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert!(matches!(next(&mut rx).await?, WatchEvent::Added(ref o) if name(o) == "p3"));

    // the informer resumes from the latest version it saw
    tokio::time::timeout(Duration::from_secs(5), async {
        while script.watches.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    let queries = script.watch_queries.lock().unwrap().clone();
    assert_eq!(queries[0].get("resourceVersion").map(String::as_str), Some("1"));
    assert_eq!(queries[1].get("resourceVersion").map(String::as_str), Some("7"));
    assert_eq!(queries[2].get("resourceVersion").map(String::as_str), Some("10"));
    assert_eq!(queries[0].get("allowWatchBookmarks").map(String::as_str), Some("true"));
    assert_eq!(script.lists.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn unreachable_api_fails_the_subscription() {
    let client = kube_client("http://127.0.0.1:9");
    let source = KubeTenantSource::new(client, ResourceRef::projects(NAMESPACE));
    assert!(source.subscribe().await.is_err());
}

#[tokio::test]
async fn client_maps_missing_and_conflicting_objects() -> Result<()> {
    let (base, _objects, _server) = spawn_kube(vec![project("t1", "alice@example.com")]).await;
    let client = kube_client(&base);
    let projects = ResourceRef::projects(NAMESPACE);

    assert!(client.get(&projects, "missing").await?.is_none());
    let found = client.get(&projects, "t1").await?;
    assert_eq!(found.as_ref().map(name), Some("t1"));

    let err = client
        .create(&projects, &project("t1", "bob@example.com"))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert!(err.to_string().contains("already exists"), "{err}");

    let created = client.create(&projects, &project("t2", "bob@example.com")).await?;
    assert_eq!(created["metadata"]["resourceVersion"], "101");

    let list = client.list(&projects, None).await?;
    assert_eq!(list.items.len(), 2);
    assert_eq!(list.resource_version, "100");
    Ok(())
}

#[test]
fn config_reads_explicit_token_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let token_path = dir.path().join("token");
    let mut file = std::fs::File::create(&token_path)?;
    writeln!(file, "  secret-token  ")?;

    let config = KubeConfig::from_parts(
        Some("https://kube.test:6443/".to_string()),
        Some(token_path),
        None,
    )?;
    assert_eq!(config.api_server, "https://kube.test:6443");
    assert_eq!(config.token.as_deref(), Some("secret-token"));

    let missing = KubeConfig::from_parts(
        Some("https://kube.test".to_string()),
        Some(dir.path().join("absent")),
        None,
    );
    assert!(missing.is_err());
    Ok(())
}
