use std::collections::HashMap;

use serde_json::{Map, Value};

/// Context key the auth middleware stores the subject under.
pub const USER_ID_KEY: &str = "user_id";

/// The authenticated caller for one request.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    /// Value of the configured subject claim, empty when the claim is absent
    /// or not a string.
    pub subject: String,
    pub claims: Map<String, Value>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: Map::new(),
        }
    }

    pub fn from_claims(claims: Map<String, Value>, subject_claim: &str) -> Self {
        let subject = claims
            .get(subject_claim)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self { subject, claims }
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// String-keyed values attached to a request by middleware, read back by
/// name (the gate reads its subject from here).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn subject_from_configured_claim() {
        let principal = Principal::from_claims(
            claims(json!({"sub": "123", "email": "alice@example.com"})),
            "email",
        );
        assert_eq!(principal.subject, "alice@example.com");
        assert_eq!(principal.claim("sub"), Some(&json!("123")));
    }

    #[test]
    fn missing_or_non_string_claim_is_empty_subject() {
        let principal = Principal::from_claims(claims(json!({"sub": "123"})), "email");
        assert_eq!(principal.subject, "");

        let principal = Principal::from_claims(claims(json!({"email": 42})), "email");
        assert_eq!(principal.subject, "");
    }

    #[test]
    fn context_round_trips_values() {
        let ctx = RequestContext::new().with(USER_ID_KEY, "alice");
        assert_eq!(ctx.get(USER_ID_KEY), Some("alice"));
        assert_eq!(ctx.get("missing"), None);
    }
}
