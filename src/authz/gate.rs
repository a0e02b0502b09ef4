use std::sync::Arc;

use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;

use super::principal::RequestContext;
use super::store::PolicyStore;
use super::PolicyError;
use crate::errors::AppError;

/// Per-route authorization check.
///
/// The subject comes from the request context under `subject_key`, the tenant
/// from the route parameter `tenant_param`; `resource` and `action` are fixed
/// per route. A missing subject or tenant evaluates as an empty string, which
/// matches no rule.
#[derive(Debug, Clone)]
pub struct AuthzGate {
    pub store: Arc<PolicyStore>,
    pub subject_key: String,
    pub tenant_param: String,
    pub resource: String,
    pub action: String,
}

#[derive(Debug)]
pub enum GateOutcome {
    Allow,
    Forbidden,
    Error(PolicyError),
}

impl AuthzGate {
    pub fn new(
        store: Arc<PolicyStore>,
        subject_key: impl Into<String>,
        tenant_param: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            store,
            subject_key: subject_key.into(),
            tenant_param: tenant_param.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn evaluate(&self, subject: &str, tenant: &str) -> GateOutcome {
        match self.store.decide(subject, tenant, &self.resource, &self.action) {
            Ok(true) => GateOutcome::Allow,
            Ok(false) => {
                tracing::debug!(
                    sub = %subject,
                    dom = %tenant,
                    res = %self.resource,
                    act = %self.action,
                    "request denied"
                );
                GateOutcome::Forbidden
            }
            Err(err) => GateOutcome::Error(err),
        }
    }

    /// Put the gate in front of `route`. It runs after routing, so the tenant
    /// path parameter is available.
    pub fn protect<S>(self, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(middleware::from_fn_with_state(self, enforce))
    }
}

pub async fn enforce(State(gate): State<AuthzGate>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let subject = parts
        .extensions
        .get::<RequestContext>()
        .and_then(|ctx| ctx.get(&gate.subject_key))
        .unwrap_or_default()
        .to_string();

    let tenant = match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => params
            .iter()
            .find(|(name, _)| *name == gate.tenant_param)
            .map(|(_, value)| value.to_string())
            .unwrap_or_default(),
        Err(_) => String::new(),
    };

    match gate.evaluate(&subject, &tenant) {
        GateOutcome::Allow => next.run(Request::from_parts(parts, body)).await,
        GateOutcome::Forbidden => AppError::forbidden("forbidden").into_response(),
        GateOutcome::Error(err) => AppError::from(err).into_response(),
    }
}
