//! Authorization module - policy engine, principal and per-route gate.
//!
//! This module implements the domain-scoped RBAC engine with support for:
//! - Rules scoped to one tenant (domain) each
//! - One level of role assignment per tenant
//! - `keyMatch2` resource patterns
//! - A route gate turning decisions into 403/500 responses

mod gate;
pub mod model;
mod principal;
mod store;

pub use gate::{enforce, AuthzGate, GateOutcome};
pub use model::{actions, parse_policy_lines, GroupTuple, PolicyTuple, RuleTuple};
pub use principal::{Principal, RequestContext, USER_ID_KEY};
pub use store::{PolicySnapshot, PolicyStore};

/// Failures while evaluating or loading policy. Denial is not an error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("malformed resource pattern `{pattern}`: {reason}")]
    MalformedPattern { pattern: String, reason: String },
    #[error("invalid policy line `{0}`")]
    InvalidPolicyLine(String),
    #[error("policy engine failure: {0}")]
    Engine(String),
}

impl From<casbin::Error> for PolicyError {
    fn from(err: casbin::Error) -> Self {
        Self::Engine(err.to_string())
    }
}

impl PolicyError {
    pub fn malformed(pattern: &str, err: impl std::fmt::Display) -> Self {
        Self::MalformedPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Well-known role and resource names used by the HTTP surface.
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const PORTAL_ADMIN: &str = "portal-admin";
}

pub mod resources {
    pub const PROJECT: &str = "project";
}
