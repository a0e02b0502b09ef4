use std::collections::{BTreeSet, HashMap};
use std::iter;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, Model};

use super::model::{compile_pattern, GroupTuple, PolicyTuple, RuleTuple, MODEL};
use super::PolicyError;

const RULE: &str = "p";
const GROUP: &str = "g";

/// In-memory rule and group sets answering `(sub, dom, res, act)` queries,
/// evaluated by a casbin enforcer loaded with [`MODEL`]. The enforcer runs
/// once for the subject and once per role it holds in the tenant.
///
/// The store does its own locking: any number of concurrent `decide` calls
/// may overlap with mutations. Each add/remove is atomic on its own; there
/// is no batch atomicity across several tuples.
///
/// Mutations are idempotent. Adding a present tuple or removing an absent one
/// changes nothing and is not an error; the return value reports whether the
/// store changed.
pub struct PolicyStore {
    inner: RwLock<PolicyState>,
}

struct PolicyState {
    enforcer: Enforcer,
    // rules whose resource pattern does not compile never reach the enforcer
    malformed: HashMap<RuleTuple, String>,
}

/// Sorted copy of the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    pub rules: BTreeSet<RuleTuple>,
    pub groups: BTreeSet<GroupTuple>,
}

impl PolicyStore {
    pub async fn new() -> Result<Self, PolicyError> {
        let model = DefaultModel::from_str(MODEL).await?;
        let adapter = MemoryAdapter::default();
        let enforcer = Enforcer::new(model, adapter).await?;

        Ok(Self {
            inner: RwLock::new(PolicyState {
                enforcer,
                malformed: HashMap::new(),
            }),
        })
    }

    pub fn add_rule(&self, rule: RuleTuple) -> bool {
        let mut state = self.write();
        let changed = match compile_pattern(&rule.resource) {
            Ok(_) => state
                .enforcer
                .get_mut_model()
                .add_policy(RULE, RULE, rule_params(&rule)),
            Err(err) => {
                if state.malformed.contains_key(&rule) {
                    return false;
                }
                tracing::warn!(res = %rule.resource, reason = %err, "stored policy has a malformed resource pattern");
                state.malformed.insert(rule.clone(), err.to_string());
                true
            }
        };

        if changed {
            tracing::debug!(
                sub = %rule.subject,
                dom = %rule.tenant,
                res = %rule.resource,
                act = %rule.action,
                "adding policy"
            );
        }
        changed
    }

    pub fn remove_rule(&self, rule: &RuleTuple) -> bool {
        let mut state = self.write();
        let changed = state.malformed.remove(rule).is_some()
            || state
                .enforcer
                .get_mut_model()
                .remove_policy(RULE, RULE, rule_params(rule));

        if changed {
            tracing::debug!(
                sub = %rule.subject,
                dom = %rule.tenant,
                res = %rule.resource,
                act = %rule.action,
                "removing policy"
            );
        }
        changed
    }

    pub fn add_group(&self, group: GroupTuple) -> bool {
        let mut state = self.write();
        if !state
            .enforcer
            .get_mut_model()
            .add_policy(GROUP, GROUP, group_params(&group))
        {
            return false;
        }

        tracing::debug!(
            user = %group.subject,
            role = %group.role,
            domain = %group.tenant,
            "adding grouping policy"
        );
        true
    }

    pub fn remove_group(&self, group: &GroupTuple) -> bool {
        let mut state = self.write();
        if !state
            .enforcer
            .get_mut_model()
            .remove_policy(GROUP, GROUP, group_params(group))
        {
            return false;
        }

        tracing::debug!(
            user = %group.subject,
            role = %group.role,
            domain = %group.tenant,
            "removing grouping policy"
        );
        true
    }

    pub fn add(&self, tuple: PolicyTuple) -> bool {
        match tuple {
            PolicyTuple::Rule(rule) => self.add_rule(rule),
            PolicyTuple::Group(group) => self.add_group(group),
        }
    }

    pub fn remove(&self, tuple: &PolicyTuple) -> bool {
        match tuple {
            PolicyTuple::Rule(rule) => self.remove_rule(rule),
            PolicyTuple::Group(group) => self.remove_group(group),
        }
    }

    /// Decide whether `subject` may perform `action` on `resource` in `tenant`.
    ///
    /// `Ok(false)` is a denial; an empty subject is always denied. `Err` means
    /// a candidate rule (same tenant and action, subject or one of its roles)
    /// carries a pattern that does not compile, or the enforcer itself failed.
    pub fn decide(
        &self,
        subject: &str,
        tenant: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, PolicyError> {
        if subject.is_empty() {
            return Ok(false);
        }

        let state = self.read();
        let roles = state.roles(subject, tenant);
        if let Some((rule, reason)) = state.malformed_candidate(subject, &roles, tenant, action) {
            return Err(PolicyError::MalformedPattern {
                pattern: rule.resource.clone(),
                reason: reason.clone(),
            });
        }

        for holder in iter::once(subject).chain(roles.iter().map(String::as_str)) {
            if state.enforcer.enforce((holder, tenant, resource, action))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        let state = self.read();
        let model = state.enforcer.get_model();

        let mut rules: BTreeSet<RuleTuple> = model
            .get_policy(RULE, RULE)
            .into_iter()
            .filter_map(|params| match params.as_slice() {
                [sub, dom, res, act] => Some(RuleTuple::new(sub, dom, res, act)),
                _ => None,
            })
            .collect();
        rules.extend(state.malformed.keys().cloned());

        let groups = model
            .get_policy(GROUP, GROUP)
            .into_iter()
            .filter_map(|params| match params.as_slice() {
                [user, role, dom] => Some(GroupTuple::new(user, role, dom)),
                _ => None,
            })
            .collect();

        PolicySnapshot { rules, groups }
    }

    pub fn len(&self) -> usize {
        let state = self.read();
        let model = state.enforcer.get_model();
        model.get_policy(RULE, RULE).len() + model.get_policy(GROUP, GROUP).len() + state.malformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every critical section leaves the sets consistent, so a poisoned lock
    // still guards valid data.
    fn read(&self) -> RwLockReadGuard<'_, PolicyState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicyState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("PolicyStore")
            .field("rules", &state.enforcer.get_model().get_policy(RULE, RULE).len())
            .field("groups", &state.enforcer.get_model().get_policy(GROUP, GROUP).len())
            .field("malformed", &state.malformed.len())
            .finish()
    }
}

impl PolicyState {
    /// Roles `subject` holds in `tenant`. Only direct assignments count.
    fn roles(&self, subject: &str, tenant: &str) -> Vec<String> {
        // an empty field matches any role
        let filter = vec![subject.to_string(), String::new(), tenant.to_string()];
        self.enforcer
            .get_model()
            .get_filtered_policy(GROUP, GROUP, 0, filter)
            .into_iter()
            .filter_map(|params| params.get(1).cloned())
            .collect()
    }

    fn malformed_candidate(
        &self,
        subject: &str,
        roles: &[String],
        tenant: &str,
        action: &str,
    ) -> Option<(&RuleTuple, &String)> {
        self.malformed.iter().find(|(rule, _)| {
            rule.tenant == tenant
                && rule.action == action
                && (rule.subject == subject || roles.contains(&rule.subject))
        })
    }
}

fn rule_params(rule: &RuleTuple) -> Vec<String> {
    vec![
        rule.subject.clone(),
        rule.tenant.clone(),
        rule.resource.clone(),
        rule.action.clone(),
    ]
}

fn group_params(group: &GroupTuple) -> Vec<String> {
    vec![group.subject.clone(), group.role.clone(), group.tenant.clone()]
}
