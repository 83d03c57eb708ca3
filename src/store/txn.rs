//! Two-phase commit across the revision log, pending changes, and cache.
//!
//! ```text
//! Idle ──prepare──▶ Preparing ──▶ Prepared ──publish──▶ Committed
//!                       │                       │
//!                       └─ staging error ─▶ Idle └─ publish error / abort ─▶ Aborted
//! ```
//!
//! `prepare` stages one Add and/or one Remove revision per changed context
//! and applies them to the cache so the writer reads its own changes.
//! `commit` publishes the staged files by atomic rename. Publishing is
//! per-file, so a crash between two contexts can leave some committed and
//! others still staged; the next `commit` publishes the leftovers.
//!
//! The coordinator is not reentrant. The engine serializes it behind an
//! exclusive lock.

use std::collections::{BTreeSet, HashMap};

use crate::error::{KbError, KbResult, StoreError, TxnError};
use crate::term::{ContextKey, Triple};

use super::RevisionKind;
use super::cache::ActiveStateCache;
use super::log::{RevisionLog, StagedToken};
use super::pending::{ChangeSet, PendingChangeSet};

/// Lifecycle of the coordinator's current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    Preparing,
    Prepared,
    Committed,
    Aborted,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Revisions published, including recovered leftovers.
    pub revisions: usize,
    /// Distinct contexts that received at least one revision.
    pub contexts: usize,
    /// Staged revisions left by an earlier interrupted commit and published now.
    pub recovered: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.revisions == 0
    }
}

/// A staged revision together with the changes it carries.
#[derive(Debug, Clone)]
struct PreparedRevision {
    token: StagedToken,
    batch: Vec<Triple>,
}

/// Drives stage → publish → apply.
#[derive(Debug)]
pub struct TransactionCoordinator {
    state: TxnState,
    prepared: Vec<PreparedRevision>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self {
            state: TxnState::Idle,
            prepared: Vec::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Tokens staged by this transaction and not yet published.
    pub fn staged(&self) -> Vec<StagedToken> {
        self.prepared.iter().map(|p| p.token.clone()).collect()
    }

    /// Stage every pending change and apply it to the cache.
    ///
    /// On failure all revisions staged by this call are discarded, cache
    /// entries it touched are invalidated, and the pending changes are
    /// restored, so the caller can retry.
    pub fn prepare(
        &mut self,
        log: &RevisionLog,
        pending: &mut PendingChangeSet,
        cache: &mut ActiveStateCache,
    ) -> KbResult<usize> {
        self.state = TxnState::Preparing;
        let drained = pending.drain();
        let mut contexts: Vec<&ContextKey> = drained
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(ctx, _)| ctx)
            .collect();
        contexts.sort();

        let mut staged: Vec<PreparedRevision> = Vec::new();
        let mut touched: Vec<ContextKey> = Vec::new();
        let result = (|| -> KbResult<()> {
            for context in contexts {
                let changes = &drained[context];
                let mut index = log
                    .next_index(context)
                    .map_err(|e| staging_failure(context, 0, e))?;

                let mut revisions = Vec::with_capacity(2);
                for (kind, set) in [
                    (RevisionKind::Add, &changes.adds),
                    (RevisionKind::Remove, &changes.removes),
                ] {
                    if set.is_empty() {
                        continue;
                    }
                    let mut batch: Vec<Triple> = set.iter().cloned().collect();
                    batch.sort();
                    let token = log
                        .write_staged(context, index, kind, &batch)
                        .map_err(|e| staging_failure(context, index, e))?;
                    staged.push(PreparedRevision {
                        token,
                        batch: batch.clone(),
                    });
                    revisions.push((kind, batch));
                    index += 1;
                }

                touched.push(context.clone());
                cache.get_or_load(log, context)?;
                for (kind, batch) in &revisions {
                    cache.apply(context, *kind, batch);
                }
            }
            Ok(())
        })();

        if let Err(err) = result {
            for revision in &staged {
                if let Err(e) = log.discard_staged(&revision.token) {
                    tracing::warn!(
                        context = %revision.token.context,
                        index = revision.token.index,
                        error = %e,
                        "failed to discard staged revision during rollback"
                    );
                }
            }
            for context in &touched {
                cache.invalidate(context);
            }
            pending.restore(drained);
            self.state = if self.prepared.is_empty() {
                TxnState::Idle
            } else {
                TxnState::Prepared
            };
            tracing::warn!(error = %err, "prepare rolled back");
            return Err(err);
        }

        let count = staged.len();
        self.prepared.extend(staged);
        self.state = TxnState::Prepared;
        tracing::debug!(revisions = count, "prepared transaction");
        Ok(count)
    }

    /// Prepare pending changes, then publish them together with any staged
    /// revisions left by an interrupted commit.
    pub fn commit(
        &mut self,
        log: &RevisionLog,
        pending: &mut PendingChangeSet,
        cache: &mut ActiveStateCache,
    ) -> KbResult<CommitSummary> {
        let ours: BTreeSet<StagedToken> = self.prepared.iter().map(|p| p.token.clone()).collect();
        let leftovers: Vec<StagedToken> = log
            .staged_tokens()?
            .into_iter()
            .filter(|t| !ours.contains(t))
            .collect();

        if leftovers.is_empty() && self.prepared.is_empty() && pending.is_empty() {
            return Ok(CommitSummary::default());
        }

        self.prepare(log, pending, cache)?;

        let mut published = 0usize;
        let mut contexts: BTreeSet<ContextKey> = BTreeSet::new();

        for token in &leftovers {
            if let Err(e) = log.publish(token) {
                // Leftovers stay staged; a later commit retries them.
                return Err(self.fail_publish(log, pending, cache, published, e));
            }
            // The cache never saw these revisions.
            cache.invalidate(&token.context);
            contexts.insert(token.context.clone());
            published += 1;
        }
        if !leftovers.is_empty() {
            tracing::info!(recovered = leftovers.len(), "published staged revisions from an interrupted commit");
        }

        self.prepared.sort_by(|a, b| a.token.cmp(&b.token));
        let mut done = 0usize;
        let mut failure = None;
        for revision in &self.prepared {
            match log.publish(&revision.token) {
                Ok(()) => {
                    contexts.insert(revision.token.context.clone());
                    done += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.prepared.drain(..done);
        published += done;
        if let Some(e) = failure {
            return Err(self.fail_publish(log, pending, cache, published, e));
        }

        self.state = TxnState::Committed;
        let summary = CommitSummary {
            revisions: published,
            contexts: contexts.len(),
            recovered: leftovers.len(),
        };
        tracing::info!(
            revisions = summary.revisions,
            contexts = summary.contexts,
            "committed transaction"
        );
        Ok(summary)
    }

    /// Drop staged revisions and pending changes; force the cache to
    /// re-derive from durable history.
    pub fn abort(
        &mut self,
        log: &RevisionLog,
        pending: &mut PendingChangeSet,
        cache: &mut ActiveStateCache,
    ) -> KbResult<()> {
        let mut first_error = None;
        for revision in self.prepared.drain(..) {
            if let Err(e) = log.discard_staged(&revision.token) {
                first_error.get_or_insert(e);
            }
        }
        let dropped = pending.len();
        pending.clear();
        cache.invalidate_all();
        self.state = TxnState::Aborted;
        tracing::info!(dropped, "aborted transaction");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Undo the unpublished part of a commit after a publish error.
    fn fail_publish(
        &mut self,
        log: &RevisionLog,
        pending: &mut PendingChangeSet,
        cache: &mut ActiveStateCache,
        published: usize,
        source: StoreError,
    ) -> KbError {
        let remaining = self.prepared.len();
        let mut restored: HashMap<ContextKey, ChangeSet> = HashMap::new();
        for revision in self.prepared.drain(..) {
            if let Err(e) = log.discard_staged(&revision.token) {
                tracing::warn!(
                    context = %revision.token.context,
                    index = revision.token.index,
                    error = %e,
                    "failed to discard staged revision after publish error"
                );
            }
            let set = restored.entry(revision.token.context).or_default();
            match revision.token.kind {
                RevisionKind::Add => set.adds.extend(revision.batch),
                RevisionKind::Remove => set.removes.extend(revision.batch),
            }
        }
        pending.restore(restored);
        cache.invalidate_all();
        self.state = TxnState::Aborted;
        tracing::warn!(published, remaining, error = %source, "commit failed while publishing");

        if published == 0 {
            source.into()
        } else {
            TxnError::PartialCommit {
                published,
                remaining,
                source: Box::new(source),
            }
            .into()
        }
    }
}

fn staging_failure(context: &ContextKey, index: u64, source: StoreError) -> KbError {
    TxnError::StagingFailure {
        context: context.to_string(),
        index,
        source: Box::new(source),
    }
    .into()
}
