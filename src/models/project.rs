use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

pub const API_GROUP: &str = "infrastructure.edgecdnx.com";
pub const API_VERSION: &str = "v1alpha1";
pub const KIND: &str = "Project";
pub const PLURAL: &str = "projects";

pub const PROJECT_NAME_LABEL: &str = "edgecdnx.com/project-name";
pub const CREATED_BY_LABEL: &str = "edgecdnx.com/created-by";

/// `Project` custom resource. Its name is the tenant id and its `spec.rbac`
/// carries the tenant's rules and role assignments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: ProjectSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProjectSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rbac: RbacSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RbacSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub rules: Vec<RuleSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<RuleSpec>,
}

/// One casbin-style policy row: `p` rows use `v0..v3`, `g` rows `v0..v2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RuleSpec {
    #[serde(default)]
    pub ptype: String,
    #[serde(default)]
    pub v0: String,
    #[serde(default)]
    pub v1: String,
    #[serde(default)]
    pub v2: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v3: String,
}

impl RuleSpec {
    pub fn policy(sub: &str, dom: &str, res: &str, act: &str) -> Self {
        Self {
            ptype: "p".to_string(),
            v0: sub.to_string(),
            v1: dom.to_string(),
            v2: res.to_string(),
            v3: act.to_string(),
        }
    }

    pub fn grouping(user: &str, role: &str, dom: &str) -> Self {
        Self {
            ptype: "g".to_string(),
            v0: user.to_string(),
            v1: role.to_string(),
            v2: dom.to_string(),
            v3: String::new(),
        }
    }
}

impl Project {
    pub fn group_version() -> String {
        format!("{API_GROUP}/{API_VERSION}")
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "Launch Planning")]
    pub name: String,
    #[serde(default)]
    #[schema(example = "CDN configuration for the launch site.")]
    pub description: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
