use std::collections::{HashMap, HashSet};

use crate::authz::{PolicyStore, PolicyTuple};
use crate::models::tenant::ObjectKey;

/// Tracks which tuples each known object contributed, and how many objects
/// declare each tuple.
///
/// The store is a plain set, so two definitions declaring the same tuple share
/// one entry. A tuple goes into the store with its first owner and leaves with
/// its last one.
#[derive(Debug, Default)]
pub struct PolicyLedger {
    applied: HashMap<ObjectKey, HashSet<PolicyTuple>>,
    owners: HashMap<PolicyTuple, usize>,
}

/// Store changes needed to move from one ledger state to the next.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub removed: Vec<PolicyTuple>,
    pub added: Vec<PolicyTuple>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// Removals first, then additions. Each tuple lands on its own, so a
    /// concurrent decision can observe the delta half-applied.
    pub fn apply(&self, store: &PolicyStore) {
        for tuple in &self.removed {
            store.remove(tuple);
        }
        for tuple in &self.added {
            store.add(tuple.clone());
        }
    }
}

impl PolicyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `next` as the content of `key`, returning the store delta.
    pub fn replace(&mut self, key: ObjectKey, next: HashSet<PolicyTuple>) -> Delta {
        let previous = self.applied.remove(&key).unwrap_or_default();
        let mut delta = Delta::default();

        for tuple in previous.difference(&next) {
            if self.release(tuple) {
                delta.removed.push(tuple.clone());
            }
        }
        for tuple in next.difference(&previous) {
            if self.claim(tuple) {
                delta.added.push(tuple.clone());
            }
        }

        delta.removed.sort();
        delta.added.sort();
        self.applied.insert(key, next);
        delta
    }

    /// Drop everything `key` contributed.
    pub fn forget(&mut self, key: &ObjectKey) -> Delta {
        let mut delta = self.replace(key.clone(), HashSet::new());
        self.applied.remove(key);
        delta.added.clear();
        delta
    }

    pub fn applied(&self, key: &ObjectKey) -> Option<&HashSet<PolicyTuple>> {
        self.applied.get(key)
    }

    pub fn owners(&self, tuple: &PolicyTuple) -> usize {
        self.owners.get(tuple).copied().unwrap_or(0)
    }

    /// Number of objects currently tracked.
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    fn claim(&mut self, tuple: &PolicyTuple) -> bool {
        let count = self.owners.entry(tuple.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }

    fn release(&mut self, tuple: &PolicyTuple) -> bool {
        match self.owners.get_mut(tuple) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.owners.remove(tuple);
                true
            }
            None => false,
        }
    }
}
