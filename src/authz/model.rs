//! Policy model - the grammar every decision is evaluated against.
//!
//! Requests are `(sub, dom, res, act)`. Rules are `p = (sub, dom, res, act)`
//! where `sub` is a subject or a role, groups are `g = (user, role, dom)`.
//! A request is allowed when some rule matches the subject, or one of the
//! roles the subject holds in the request's domain:
//!
//! ```text
//! r.sub == p.sub && r.dom == p.dom && keyMatch2(r.res, p.res) && r.act == p.act
//! ```
//!
//! Role assignment is one level deep, so roles are resolved from the `g`
//! section by the store before the matcher runs.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PolicyError;

/// Casbin model every [`PolicyStore`](super::PolicyStore) enforcer is built from.
pub const MODEL: &str = r#"
[request_definition]
r = sub, dom, res, act

[policy_definition]
p = sub, dom, res, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.dom == p.dom && keyMatch2(r.res, p.res) && r.act == p.act
"#;

/// Actions used by the HTTP surface.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";

    pub const ALL: [&str; 4] = [CREATE, READ, UPDATE, DELETE];
}

/// A single permission grant: `subject` (or role) may perform `action` on
/// resources matching `resource` inside `tenant`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleTuple {
    pub subject: String,
    pub tenant: String,
    pub resource: String,
    pub action: String,
}

impl RuleTuple {
    pub fn new(
        subject: impl Into<String>,
        tenant: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            tenant: tenant.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for RuleTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p, {}, {}, {}, {}",
            self.subject, self.tenant, self.resource, self.action
        )
    }
}

/// Role assignment: `subject` holds `role` within `tenant`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupTuple {
    pub subject: String,
    pub role: String,
    pub tenant: String,
}

impl GroupTuple {
    pub fn new(
        subject: impl Into<String>,
        role: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
            tenant: tenant.into(),
        }
    }
}

impl fmt::Display for GroupTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g, {}, {}, {}", self.subject, self.role, self.tenant)
    }
}

/// Either kind of stored tuple. Parses from and prints as a policy line
/// (`p, sub, dom, res, act` or `g, user, role, dom`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyTuple {
    Rule(RuleTuple),
    Group(GroupTuple),
}

impl fmt::Display for PolicyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyTuple::Rule(rule) => rule.fmt(f),
            PolicyTuple::Group(group) => group.fmt(f),
        }
    }
}

impl From<RuleTuple> for PolicyTuple {
    fn from(value: RuleTuple) -> Self {
        PolicyTuple::Rule(value)
    }
}

impl From<GroupTuple> for PolicyTuple {
    fn from(value: GroupTuple) -> Self {
        PolicyTuple::Group(value)
    }
}

impl FromStr for PolicyTuple {
    type Err = PolicyError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        match fields.as_slice() {
            ["p", sub, dom, res, act] => Ok(RuleTuple::new(*sub, *dom, *res, *act).into()),
            ["g", user, role, dom] => Ok(GroupTuple::new(*user, *role, *dom).into()),
            _ => Err(PolicyError::InvalidPolicyLine(line.trim().to_string())),
        }
    }
}

/// Parse newline/semicolon separated policy lines, skipping blanks and `#` comments.
pub fn parse_policy_lines<'a, I>(lines: I) -> Result<Vec<PolicyTuple>, PolicyError>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

/// Compile a resource pattern with `keyMatch2` semantics.
///
/// `*` alone matches everything. Otherwise `/*` matches any suffix after the
/// slash and `:name` matches exactly one path segment. The rest of the pattern
/// is a regular expression anchored at both ends.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    if pattern == "*" {
        return Regex::new("^.*$");
    }

    let expanded = expand_params(&pattern.replace("/*", "/.*"));
    Regex::new(&format!("^{expanded}$"))
}

/// One-off match of `resource` against `pattern`.
pub fn key_match2(resource: &str, pattern: &str) -> Result<bool, PolicyError> {
    compile_pattern(pattern)
        .map(|re| re.is_match(resource))
        .map_err(|err| PolicyError::malformed(pattern, err))
}

// `:name` runs up to the next `/` and become a single-segment wildcard.
fn expand_params(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek().is_some_and(|next| *next != '/') {
            while chars.peek().is_some_and(|next| *next != '/') {
                chars.next();
            }
            out.push_str("[^/]+");
        } else {
            out.push(c);
        }
    }
    out
}
