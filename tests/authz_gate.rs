mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`
use tower_http::cors::CorsLayer;

use tenant_authz::authz::RuleTuple;
use tenant_authz::sync::{SyncState, TenantReconciler, WatchEvent};
use tenant_authz::{create_app, PolicyStore};

use common::{app_state, bearer, mint_token, project, spawn_kube, CLIENT_ID};

/// Router over a store holding `t1` (admin alice) and `t2` (admin bob), with
/// the same two projects in the fake API.
async fn setup() -> Result<(Router, Arc<PolicyStore>, common::Objects)> {
    let projects = vec![
        project("t1", "alice@example.com"),
        project("t2", "bob@example.com"),
    ];
    let (base, objects, _server) = spawn_kube(projects.clone()).await;

    let store = Arc::new(PolicyStore::new().await?);
    let mut reconciler = TenantReconciler::new(store.clone());
    for object in projects {
        reconciler.handle(WatchEvent::Added(object))?;
    }

    let (state, _sync) = app_state(store.clone(), &base, SyncState::Synced);
    let app = create_app(state, CorsLayer::new())?;
    Ok((app, store, objects))
}

async fn send(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

fn get(uri: &str, auth: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    Ok(builder.body(Body::empty())?)
}

fn post(uri: &str, auth: &str, payload: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))?)
}

#[tokio::test]
async fn gate_allows_tenant_admin_and_forbids_others() -> Result<()> {
    let (app, _store, _objects) = setup().await?;

    let (status, body) = send(&app, get("/projects/t1", Some(&bearer("alice@example.com")))?).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["metadata"]["name"], "t1");

    let (status, body) = send(&app, get("/projects/t2", Some(&bearer("alice@example.com")))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = send(&app, get("/projects/t1", Some(&bearer("mallory@example.com")))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn unknown_project_is_forbidden_before_lookup() -> Result<()> {
    let (app, store, _objects) = setup().await?;

    // no rules for the tenant: the gate answers, not the handler
    let (status, _) = send(&app, get("/projects/nope", Some(&bearer("alice@example.com")))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // allowed but absent upstream
    store.add_rule(RuleTuple::new("alice@example.com", "nope", "*", "read"));
    let (status, body) = send(&app, get("/projects/nope", Some(&bearer("alice@example.com")))?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    Ok(())
}

#[tokio::test]
async fn malformed_rule_fails_the_request() -> Result<()> {
    let (app, store, _objects) = setup().await?;
    store.add_rule(RuleTuple::new("carol@example.com", "t2", "proj[", "read"));

    let (status, body) = send(&app, get("/projects/t2", Some(&bearer("carol@example.com")))?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal");
    Ok(())
}

#[tokio::test]
async fn credentials_are_required() -> Result<()> {
    let (app, _store, _objects) = setup().await?;

    let (status, body) = send(&app, get("/projects/t1", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, get("/projects/t1", Some("Basic YWxpY2U6c2VjcmV0"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = format!(
        "Bearer {}",
        mint_token("https://idp.test", CLIENT_ID, Some("alice@example.com"), -3600)
    );
    let (status, _) = send(&app, get("/projects/t1", Some(&expired))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get("/projects", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn listing_returns_only_readable_projects() -> Result<()> {
    let (app, store, _objects) = setup().await?;

    let (status, body) = send(&app, get("/projects", Some(&bearer("alice@example.com")))?).await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .map(|items| items.iter().filter_map(|p| p["metadata"]["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["t1"]);

    // a broken rule hides that project from the listing instead of failing it
    store.add_rule(RuleTuple::new("bob@example.com", "t1", "proj[", "read"));
    let (status, body) = send(&app, get("/projects", Some(&bearer("bob@example.com")))?).await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .map(|items| items.iter().filter_map(|p| p["metadata"]["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["t2"]);
    Ok(())
}

#[tokio::test]
async fn create_project_makes_caller_admin() -> Result<()> {
    let (app, _store, objects) = setup().await?;

    let payload = json!({"name": "Launch Site", "description": "edge config"});
    let (status, body) = send(&app, post("/projects", &bearer("dana@example.com"), payload)?).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["metadata"]["name"], "launch-site");
    assert_eq!(body["metadata"]["labels"]["edgecdnx.com/created-by"], "dana-at-example-com");
    assert_eq!(body["spec"]["rbac"]["groups"][0]["v0"], "dana@example.com");
    assert_eq!(body["spec"]["rbac"]["rules"].as_array().map(Vec::len), Some(4));

    let stored = objects.lock().unwrap().get("launch-site").cloned();
    assert!(stored.is_some(), "project was not written upstream");

    let payload = json!({"name": "launch site"});
    let (status, body) = send(&app, post("/projects", &bearer("erin@example.com"), payload)?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let payload = json!({"name": "Café Site"});
    let (status, body) = send(&app, post("/projects", &bearer("erin@example.com"), payload)?).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["metadata"]["name"], "cafe-site");
    Ok(())
}

#[tokio::test]
async fn token_without_subject_is_never_admin() -> Result<()> {
    let (app, store, objects) = setup().await?;
    let anonymous = format!("Bearer {}", mint_token("https://idp.test", CLIENT_ID, None, 300));

    // a rule with an empty subject must not match an empty caller
    store.add_rule(RuleTuple::new("", "t1", "*", "read"));
    let (status, _) = send(&app, get("/projects/t1", Some(&anonymous))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let payload = json!({"name": "Orphan Site"});
    let (status, body) = send(&app, post("/projects", &anonymous, payload)?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert!(objects.lock().unwrap().get("orphan-site").is_none());
    Ok(())
}

#[tokio::test]
async fn create_project_validates_input() -> Result<()> {
    let (app, _store, _objects) = setup().await?;

    let (status, _) = send(&app, post("/projects", &bearer("dana@example.com"), json!({"name": "ab"}))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = json!({"name": "valid name", "description": "x".repeat(256)});
    let (status, _) = send(&app, post("/projects", &bearer("dana@example.com"), long)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post("/projects", &bearer("dana@example.com"), json!({"name": "!!!!"}))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
