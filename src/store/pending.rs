//! Uncommitted per-context changes.
//!
//! An add and a remove of the same triple cancel each other instead of both
//! being queued.

use std::collections::HashMap;

use crate::term::{ContextKey, Triple, TripleSet};

/// Pending adds and removes for one context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub adds: TripleSet,
    pub removes: TripleSet,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.adds.len() + self.removes.len()
    }

    /// Apply these changes on top of `state`.
    pub fn overlay(&self, state: &mut TripleSet) {
        for triple in &self.removes {
            state.remove(triple);
        }
        state.extend(self.adds.iter().cloned());
    }

    /// Whether `triple` is visible given its durable presence.
    pub fn visible(&self, triple: &Triple, durable: bool) -> bool {
        self.adds.contains(triple) || (durable && !self.removes.contains(triple))
    }

    fn merge(&mut self, other: ChangeSet) {
        self.adds.extend(other.adds);
        self.removes.extend(other.removes);
    }
}

/// In-memory overlay of changes not yet handed to the transaction coordinator.
#[derive(Debug, Default)]
pub struct PendingChangeSet {
    changes: HashMap<ContextKey, ChangeSet>,
}

impl PendingChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an insertion. Cancels a pending removal of the same triple.
    pub fn add(&mut self, context: &ContextKey, triple: Triple) {
        let entry = self.changes.entry(context.clone()).or_default();
        if !entry.removes.remove(&triple) {
            entry.adds.insert(triple);
        }
        self.prune(context);
    }

    /// Record a removal. Cancels a pending insertion of the same triple.
    pub fn remove(&mut self, context: &ContextKey, triple: Triple) {
        let entry = self.changes.entry(context.clone()).or_default();
        if !entry.adds.remove(&triple) {
            entry.removes.insert(triple);
        }
        self.prune(context);
    }

    pub fn get(&self, context: &ContextKey) -> Option<&ChangeSet> {
        self.changes.get(context)
    }

    /// Contexts with at least one pending change.
    pub fn contexts(&self) -> impl Iterator<Item = &ContextKey> {
        self.changes.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Total number of pending changes across all contexts.
    pub fn len(&self) -> usize {
        self.changes.values().map(ChangeSet::len).sum()
    }

    /// Take every pending change, leaving the set empty.
    pub fn drain(&mut self) -> HashMap<ContextKey, ChangeSet> {
        std::mem::take(&mut self.changes)
    }

    /// Put drained changes back, merging with anything recorded since.
    pub fn restore(&mut self, changes: HashMap<ContextKey, ChangeSet>) {
        for (context, set) in changes {
            if !set.is_empty() {
                self.changes.entry(context).or_default().merge(set);
            }
        }
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    fn prune(&mut self, context: &ContextKey) {
        if self.changes.get(context).is_some_and(ChangeSet::is_empty) {
            self.changes.remove(context);
        }
    }
}
