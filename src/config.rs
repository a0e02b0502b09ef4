use std::path::PathBuf;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};

use crate::authz::{parse_policy_lines, PolicyError, PolicyTuple};
use crate::oidc::OidcSettings;

pub const DEFAULT_BOOTSTRAP_POLICY: &str = "p, portal-admin, *, *, *";

/// Settings that parse but cannot be turned into a working component.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("bootstrap policy: {0}")]
    Bootstrap(#[from] PolicyError),
    #[error("invalid CORS {field} `{value}`")]
    Cors { field: &'static str, value: String },
}

impl ConfigError {
    fn cors(field: &'static str, value: &str) -> Self {
        Self::Cors {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Multi-tenant authorization API", long_about = None)]
pub struct AppConfig {
    /// JSON logs and production defaults
    #[arg(long, env = "PRODUCTION", default_value_t = false)]
    pub production: bool,

    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:5555")]
    pub listen: String,

    /// Namespace watched for Project objects
    #[arg(long, env = "NAMESPACE", default_value = "edgecdnx")]
    pub namespace: String,

    /// Token claim used as the subject
    #[arg(long, env = "AUTH_USER_CLAIM", default_value = "email")]
    pub auth_user_claim: String,

    #[arg(long, env = "OIDC_ISSUER_URL")]
    pub oidc_issuer_url: String,

    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: String,

    /// Clock skew tolerated on `exp` and `nbf`
    #[arg(long, env = "OIDC_LEEWAY_SECS", default_value_t = 60)]
    pub oidc_leeway_secs: u64,

    #[arg(long, env = "CORS_ALLOW_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_allow_origins: Vec<String>,

    #[arg(
        long,
        env = "CORS_ALLOWED_METHODS",
        value_delimiter = ',',
        default_value = "GET,PUT,POST,PATCH,DELETE"
    )]
    pub cors_allowed_methods: Vec<String>,

    #[arg(
        long,
        env = "CORS_ALLOWED_HEADERS",
        value_delimiter = ',',
        default_value = "Authorization,Content-Type"
    )]
    pub cors_allowed_headers: Vec<String>,

    /// Label selector narrowing the tenant watch
    #[arg(long, env = "TENANT_LABEL_SELECTOR")]
    pub tenant_label_selector: Option<String>,

    /// Deadline for the initial tenant listing
    #[arg(long, env = "SYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub sync_timeout_secs: u64,

    /// Watch events buffered between the informer and the sync loop
    #[arg(long, env = "SYNC_EVENT_BUFFER", default_value_t = 256)]
    pub sync_event_buffer: usize,

    /// API server URL; defaults to the in-cluster service
    #[arg(long, env = "KUBE_API_SERVER")]
    pub kube_api_server: Option<String>,

    #[arg(long, env = "KUBE_TOKEN_FILE")]
    pub kube_token_file: Option<PathBuf>,

    #[arg(long, env = "KUBE_CA_FILE")]
    pub kube_ca_file: Option<PathBuf>,

    /// Policy lines installed before sync, `;`-separated
    #[arg(
        long,
        env = "AUTHZ_BOOTSTRAP_POLICY",
        value_delimiter = ';',
        default_value = DEFAULT_BOOTSTRAP_POLICY
    )]
    pub bootstrap_policy: Vec<String>,
}

impl AppConfig {
    pub fn oidc(&self) -> OidcSettings {
        OidcSettings {
            issuer_url: self.oidc_issuer_url.clone(),
            client_id: self.oidc_client_id.clone(),
            subject_claim: self.auth_user_claim.clone(),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn bootstrap(&self) -> Result<Vec<PolicyTuple>, ConfigError> {
        Ok(parse_policy_lines(self.bootstrap_policy.iter().map(String::as_str))?)
    }

    /// Credentials are only allowed with an explicit origin list; a wildcard
    /// origin is served without them.
    pub fn cors_layer(&self) -> Result<CorsLayer, ConfigError> {
        let methods = self
            .cors_allowed_methods
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::cors("method", m))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let headers = self
            .cors_allowed_headers
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(|h| {
                HeaderName::from_bytes(h.as_bytes())
                    .map_err(|_| ConfigError::cors("header", h))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let layer = CorsLayer::new().allow_methods(methods).allow_headers(headers);

        let origins: Vec<&str> = self
            .cors_allow_origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .collect();
        if origins.is_empty() || origins.contains(&"*") {
            return Ok(layer.allow_origin(Any));
        }

        let origins = origins
            .into_iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|_| ConfigError::cors("origin", o))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(layer.allow_origin(origins).allow_credentials(true))
    }
}
