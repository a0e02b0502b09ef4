use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::authz::{actions, resources, AuthzGate, PolicyStore, USER_ID_KEY};
use crate::docs;
use crate::kube::{KubeClient, ResourceRef};
use crate::oidc::{require_auth, TokenVerifier};
use crate::routes::{health, projects};
use crate::sync::SyncState;

/// Route parameter carrying the tenant id on project-scoped routes.
pub const PROJECT_PARAM: &str = "project_id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PolicyStore>,
    pub verifier: Arc<TokenVerifier>,
    pub kube: Arc<KubeClient>,
    pub projects: ResourceRef,
    pub sync_state: watch::Receiver<SyncState>,
}

impl AppState {
    pub fn new(
        store: Arc<PolicyStore>,
        verifier: Arc<TokenVerifier>,
        kube: Arc<KubeClient>,
        namespace: impl Into<String>,
        sync_state: watch::Receiver<SyncState>,
    ) -> Self {
        Self {
            store,
            verifier,
            kube,
            projects: ResourceRef::projects(namespace),
            sync_state,
        }
    }

    /// Gate for `resource`/`action` on routes carrying [`PROJECT_PARAM`].
    pub fn gate(&self, resource: &str, action: &str) -> AuthzGate {
        AuthzGate::new(self.store.clone(), USER_ID_KEY, PROJECT_PARAM, resource, action)
    }
}

pub fn create_app(state: AppState, cors: CorsLayer) -> anyhow::Result<Router> {
    let openapi = docs::build_openapi()?;

    let project_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/:project_id",
            state
                .gate(resources::PROJECT, actions::READ)
                .protect(get(projects::get_project)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_auth,
        ));

    let router = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/projects", project_routes)
        .with_state(state)
        .merge(docs::docs_routes(openapi)?)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
