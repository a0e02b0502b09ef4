use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use super::project::Project;
use crate::authz::{GroupTuple, PolicyTuple, RuleTuple};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid tenant definition at `{path}`: {message}")]
    Invalid { path: String, message: String },
    #[error("tenant definition has no metadata.name")]
    MissingName,
}

/// Identity of a watched object, `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Read the key straight from `metadata` without decoding the rest, so
    /// objects with a broken spec can still be identified.
    pub fn from_object(object: &Value) -> Option<Self> {
        let metadata = object.get("metadata")?;
        let name = metadata.get("name")?.as_str().filter(|name| !name.is_empty())?;
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// The authorization content of one tenant: the rules and role assignments
/// its definition declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDefinition {
    pub key: ObjectKey,
    pub tenant: String,
    pub rules: Vec<RuleTuple>,
    pub groups: Vec<GroupTuple>,
}

impl TenantDefinition {
    pub fn from_object(object: &Value) -> Result<Self, DecodeError> {
        let project: Project =
            serde_path_to_error::deserialize(object).map_err(|err| DecodeError::Invalid {
                path: err.path().to_string(),
                message: err.inner().to_string(),
            })?;
        Self::from_project(&project)
    }

    pub fn from_project(project: &Project) -> Result<Self, DecodeError> {
        if project.metadata.name.is_empty() {
            return Err(DecodeError::MissingName);
        }

        let rules = project
            .spec
            .rbac
            .rules
            .iter()
            .map(|r| RuleTuple::new(r.v0.as_str(), r.v1.as_str(), r.v2.as_str(), r.v3.as_str()))
            .collect();
        let groups = project
            .spec
            .rbac
            .groups
            .iter()
            .map(|g| GroupTuple::new(g.v0.as_str(), g.v1.as_str(), g.v2.as_str()))
            .collect();

        Ok(Self {
            key: ObjectKey::new(
                project.metadata.namespace.clone().unwrap_or_default(),
                project.metadata.name.clone(),
            ),
            tenant: project.metadata.name.clone(),
            rules,
            groups,
        })
    }

    pub fn tuples(&self) -> HashSet<PolicyTuple> {
        self.rules
            .iter()
            .cloned()
            .map(PolicyTuple::Rule)
            .chain(self.groups.iter().cloned().map(PolicyTuple::Group))
            .collect()
    }

    /// Tuples scoped to a tenant other than this definition's own.
    pub fn foreign_tuples(&self) -> impl Iterator<Item = String> + '_ {
        let rules = self
            .rules
            .iter()
            .filter(|rule| rule.tenant != self.tenant)
            .map(ToString::to_string);
        let groups = self
            .groups
            .iter()
            .filter(|group| group.tenant != self.tenant)
            .map(ToString::to_string);
        rules.chain(groups)
    }
}
