//! OIDC bearer-token verification.
//!
//! Provider metadata and the JWKS are fetched once at startup and cached for
//! the life of the process; rotated keys are picked up on restart.

use std::str::FromStr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::authz::{Principal, RequestContext, USER_ID_KEY};
use crate::errors::AppError;

const DEFAULT_LEEWAY_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub issuer_url: String,
    pub client_id: String,
    pub subject_claim: String,
}

/// Reasons a credential is rejected. All of them are 401s.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingCredential,
    #[error("invalid Authorization header")]
    InvalidScheme,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("issuer mismatch: expected {expected}, provider reports {actual}")]
    IssuerMismatch { expected: String, actual: String },
    #[error("identity provider publishes no signing keys")]
    NoKeys,
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
}

/// Verifies ID tokens issued for `client_id` by one issuer.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    issuer: String,
    client_id: String,
    subject_claim: String,
    keys: JwkSet,
    algorithms: Vec<Algorithm>,
    leeway: u64,
}

impl TokenVerifier {
    /// Run OIDC discovery against the configured issuer and cache its keys.
    pub async fn discover(
        settings: OidcSettings,
        http: &reqwest::Client,
    ) -> Result<Self, DiscoveryError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            settings.issuer_url.trim_end_matches('/')
        );
        let metadata: ProviderMetadata = http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if metadata.issuer != settings.issuer_url {
            return Err(DiscoveryError::IssuerMismatch {
                expected: settings.issuer_url,
                actual: metadata.issuer,
            });
        }

        let keys: JwkSet = http
            .get(&metadata.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if keys.keys.is_empty() {
            return Err(DiscoveryError::NoKeys);
        }

        tracing::info!(
            issuer = %metadata.issuer,
            keys = keys.keys.len(),
            "identity provider discovered"
        );

        let algorithms = supported_algorithms(&metadata.id_token_signing_alg_values_supported);
        Ok(Self::with_keys(settings, keys).with_algorithms(algorithms))
    }

    /// Build a verifier from an already known key set. Accepts RS256 until
    /// told otherwise.
    pub fn with_keys(settings: OidcSettings, keys: JwkSet) -> Self {
        Self {
            issuer: settings.issuer_url,
            client_id: settings.client_id,
            subject_claim: settings.subject_claim,
            keys,
            algorithms: vec![Algorithm::RS256],
            leeway: DEFAULT_LEEWAY_SECONDS,
        }
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify the raw `Authorization` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingCredential)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidScheme)?;
        self.verify(token.trim())
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|err| AuthError::InvalidToken(err.to_string()))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let candidates: Vec<&Jwk> = match header.kid.as_deref() {
            Some(kid) => self
                .keys
                .keys
                .iter()
                .filter(|key| key.common.key_id.as_deref() == Some(kid))
                .collect(),
            None => self.keys.keys.iter().collect(),
        };
        if candidates.is_empty() {
            return Err(AuthError::InvalidToken("no matching signing key".to_string()));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.leeway = self.leeway;

        let mut last_error = None;
        for jwk in candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };
            match jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation) {
                Ok(data) => return Ok(Principal::from_claims(data.claims, &self.subject_claim)),
                // another key may still verify the signature
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm
                    ) =>
                {
                    last_error = Some(err);
                }
                Err(err) => return Err(classify(err)),
            }
        }

        Err(last_error
            .map(classify)
            .unwrap_or_else(|| AuthError::InvalidToken("no usable signing key".to_string())))
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::InvalidToken(err.to_string()),
    }
}

/// Asymmetric algorithms the provider advertises; RS256 when it advertises none.
fn supported_algorithms(advertised: &[String]) -> Vec<Algorithm> {
    let algorithms: Vec<Algorithm> = advertised
        .iter()
        .filter_map(|name| Algorithm::from_str(name).ok())
        .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        .collect();

    if algorithms.is_empty() {
        vec![Algorithm::RS256]
    } else {
        algorithms
    }
}

/// Rejects requests without a valid bearer token; otherwise stores the
/// `Principal` and a `RequestContext` carrying its subject on the request.
pub async fn require_auth(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = match request.headers().get(AUTHORIZATION) {
        Some(value) => match value.to_str() {
            Ok(value) => Some(value),
            Err(_) => return AppError::from(AuthError::InvalidScheme).into_response(),
        },
        None => None,
    };

    let principal = match verifier.verify_header(header) {
        Ok(principal) => principal,
        Err(err) => {
            tracing::debug!(error = %err, "credential rejected");
            return AppError::from(err).into_response();
        }
    };

    let ctx = RequestContext::new().with(USER_ID_KEY, principal.subject.clone());
    request.extensions_mut().insert(ctx);
    request.extensions_mut().insert(principal);

    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AppError::Unauthenticated(AuthError::MissingCredential))
    }
}
