//! Engine facade: top-level API for the revkb store.
//!
//! The `Engine` owns the revision log, the pending change set, the active
//! state cache, and the transaction coordinator, and exposes the triple-level
//! contract used by graph and query layers above it.
//!
//! Locking: the coordinator sits behind an `RwLock` that doubles as the
//! transaction gate. Reads, `add` and `remove` hold it shared; `commit`,
//! `abort` and `collapse` hold it exclusively, so no reader observes a
//! half-applied prepare. Pending changes and the cache each have their own
//! mutex, always taken in the order gate → pending → cache.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::StoreConfig;
use crate::error::{EngineError, KbResult, StoreError};
use crate::store::cache::ActiveStateCache;
use crate::store::log::{RevisionInfo, RevisionLog};
use crate::store::pending::PendingChangeSet;
use crate::store::txn::{CommitSummary, TransactionCoordinator, TxnState};
use crate::term::{ContextKey, Triple, TriplePattern, TripleSet};

/// A lazy, revisioned, transactional triple store.
pub struct Engine {
    config: StoreConfig,
    log: RevisionLog,
    txn: RwLock<TransactionCoordinator>,
    pending: Mutex<PendingChangeSet>,
    cache: Mutex<ActiveStateCache>,
}

impl Engine {
    /// Open the store described by `config`.
    ///
    /// Fails with `StoreNotFound` when the data directory is missing and
    /// `config.create` is false. The cache starts empty; contexts are
    /// replayed lazily on first access.
    pub fn open(config: StoreConfig) -> KbResult<Self> {
        let dir = &config.data_dir;
        if !dir.is_dir() {
            if !config.create {
                return Err(EngineError::StoreNotFound {
                    path: dir.display().to_string(),
                }
                .into());
            }
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
            tracing::info!(data_dir = %dir.display(), "created store directory");
        }

        tracing::info!(
            data_dir = %dir.display(),
            max_active_contexts = config.max_active_contexts,
            sync_writes = config.sync_writes,
            "opening revkb store"
        );

        Ok(Self {
            log: RevisionLog::new(dir.clone(), config.sync_writes),
            txn: RwLock::new(TransactionCoordinator::new()),
            pending: Mutex::new(PendingChangeSet::new()),
            cache: Mutex::new(ActiveStateCache::new(config.max_active_contexts)),
            config,
        })
    }

    /// Open `base_directory` with default settings.
    pub fn open_dir(base_directory: impl AsRef<Path>, create: bool) -> KbResult<Self> {
        Self::open(StoreConfig::new(base_directory.as_ref()).with_create(create))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record `triple` in `context`. Visible to reads immediately, durable
    /// after [`commit`](Self::commit).
    pub fn add(&self, triple: Triple, context: &ContextKey) -> KbResult<()> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        let durable = self
            .cache
            .lock()
            .expect("cache lock poisoned")
            .get_or_load(&self.log, context)?
            .contains(&triple);
        let visible = pending
            .get(context)
            .map_or(durable, |set| set.visible(&triple, durable));
        if !visible {
            pending.add(context, triple);
        }
        Ok(())
    }

    /// Record the removal of every triple in `context` matching `pattern`.
    ///
    /// The pattern is expanded against durable and pending state now; each
    /// match is recorded as an individual removal. Returns the match count.
    pub fn remove(&self, pattern: &TriplePattern, context: &ContextKey) -> KbResult<usize> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        let durable = self
            .cache
            .lock()
            .expect("cache lock poisoned")
            .get_or_load(&self.log, context)?;

        let mut matches: Vec<Triple> = match pending.get(context) {
            Some(set) => durable
                .iter()
                .chain(set.adds.iter())
                .filter(|t| pattern.matches(t) && set.visible(t, durable.contains(*t)))
                .cloned()
                .collect(),
            None => durable.iter().filter(|t| pattern.matches(t)).cloned().collect(),
        };
        matches.sort();
        matches.dedup();

        let count = matches.len();
        for triple in matches {
            pending.remove(context, triple);
        }
        tracing::debug!(context = %context, removed = count, "recorded removals");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Lazily yield `(triple, owning context)` for every match of `pattern`.
    ///
    /// With a context, only that context is read. Without one, every context
    /// with durable or pending state is visited in key order, one at a time;
    /// a triple held by several contexts is yielded once per context, tagged
    /// with that context. Uncached contexts are replayed into a throwaway set
    /// so a full scan does not churn the bounded cache.
    pub fn triples(&self, pattern: &TriplePattern, context: Option<&ContextKey>) -> TripleIter<'_> {
        TripleIter {
            engine: self,
            pattern: pattern.clone(),
            queue: context.map(|c| VecDeque::from([c.clone()])),
            streaming: context.is_none(),
            current: None,
            done: false,
        }
    }

    /// Contexts holding at least one committed-or-pending triple, optionally
    /// only those containing `triple`.
    pub fn contexts(&self, triple: Option<&Triple>) -> KbResult<BTreeSet<ContextKey>> {
        let mut out = BTreeSet::new();
        for context in self.candidate_contexts()? {
            let state = self.visible_state(&context, true)?;
            let hit = match triple {
                Some(t) => state.contains(t),
                None => !state.is_empty(),
            };
            if hit {
                out.insert(context);
            }
        }
        Ok(out)
    }

    /// Number of visible triples in `context`.
    pub fn len(&self, context: &ContextKey) -> KbResult<usize> {
        Ok(self.visible_state(context, false)?.len())
    }

    /// Whether `context` has no visible triples.
    pub fn is_empty(&self, context: &ContextKey) -> KbResult<bool> {
        Ok(self.len(context)? == 0)
    }

    /// Smallest durable revision index of `context`.
    pub fn earliest_revision(&self, context: &ContextKey) -> KbResult<Option<u64>> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        Ok(self.log.earliest(context)?)
    }

    /// Largest durable revision index of `context`.
    pub fn latest_revision(&self, context: &ContextKey) -> KbResult<Option<u64>> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        Ok(self.log.latest(context)?)
    }

    /// Durable revisions of `context` with their payload sizes.
    pub fn history(&self, context: &ContextKey) -> KbResult<Vec<RevisionInfo>> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        Ok(self.log.history(context)?)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Make every pending change durable.
    ///
    /// Calling it with nothing pending is a no-op. After a failure the
    /// unpublished changes are pending again and `commit` may be retried.
    pub fn commit(&self) -> KbResult<CommitSummary> {
        let mut txn = self.txn.write().expect("transaction lock poisoned");
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        txn.commit(&self.log, &mut pending, &mut cache)
    }

    /// Drop every pending change and re-derive cached state from the log.
    pub fn abort(&self) -> KbResult<()> {
        let mut txn = self.txn.write().expect("transaction lock poisoned");
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        txn.abort(&self.log, &mut pending, &mut cache)
    }

    /// Compact the history of `context` into at most one revision.
    ///
    /// Only durable history is compacted; pending changes stay pending.
    /// Returns the index of the consolidated revision, `None` if the context
    /// ended up with no revisions.
    pub fn collapse(&self, context: &ContextKey) -> KbResult<Option<u64>> {
        let _txn = self.txn.write().expect("transaction lock poisoned");
        let mut merged: Vec<Triple> = self.log.replay(context)?.into_iter().collect();
        merged.sort();
        let index = self.log.collapse(context, &merged)?;
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .invalidate(context);
        Ok(index)
    }

    /// Close the store. Uncommitted changes are discarded with a warning.
    pub fn close(self) -> KbResult<()> {
        let dropped = self.pending.lock().expect("pending lock poisoned").len();
        if dropped > 0 {
            tracing::warn!(dropped, "closing store with uncommitted changes");
            self.abort()?;
        }
        tracing::info!(data_dir = %self.config.data_dir.display(), "closed revkb store");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Contexts currently materialized in the cache, most recent first.
    pub fn cached_contexts(&self) -> Vec<ContextKey> {
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .cached_contexts()
    }

    pub fn txn_state(&self) -> TxnState {
        self.txn.read().expect("transaction lock poisoned").state()
    }

    /// Summary of the store state.
    pub fn info(&self) -> KbResult<EngineInfo> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        let durable_contexts = self.log.contexts()?.len();
        let staged_revisions = self.log.staged_tokens()?.len();
        let pending_changes = self.pending.lock().expect("pending lock poisoned").len();
        let cache = self.cache.lock().expect("cache lock poisoned");
        Ok(EngineInfo {
            data_dir: self.config.data_dir.display().to_string(),
            durable_contexts,
            cached_contexts: cache.len(),
            max_active_contexts: cache.capacity(),
            evictions: cache.evictions(),
            pending_changes,
            staged_revisions,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Contexts that may hold triples: durable, pending, or cached.
    fn candidate_contexts(&self) -> KbResult<Vec<ContextKey>> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        let mut all: BTreeSet<ContextKey> = self.log.contexts()?.into_iter().collect();
        all.extend(
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .contexts()
                .cloned(),
        );
        all.extend(
            self.cache
                .lock()
                .expect("cache lock poisoned")
                .cached_contexts(),
        );
        Ok(all.into_iter().collect())
    }

    /// Durable state of `context` with pending changes overlaid.
    ///
    /// With `streaming`, an uncached context is replayed into a set that is
    /// dropped after the read instead of being inserted into the cache.
    fn visible_state(&self, context: &ContextKey, streaming: bool) -> KbResult<Arc<TripleSet>> {
        let _gate = self.txn.read().expect("transaction lock poisoned");
        let pending = self.pending.lock().expect("pending lock poisoned");
        let durable = {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            match cache.peek(context) {
                Some(state) => {
                    cache.touch(context);
                    state
                }
                None if streaming => Arc::new(self.log.replay(context)?),
                None => cache.get_or_load(&self.log, context)?,
            }
        };
        Ok(match pending.get(context) {
            Some(set) => {
                let mut state = TripleSet::clone(&durable);
                set.overlay(&mut state);
                Arc::new(state)
            }
            None => durable,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Lazy iterator returned by [`Engine::triples`].
///
/// No lock is held between calls to `next`; each context is read under the
/// shared transaction gate when the iterator reaches it.
pub struct TripleIter<'a> {
    engine: &'a Engine,
    pattern: TriplePattern,
    queue: Option<VecDeque<ContextKey>>,
    streaming: bool,
    current: Option<(ContextKey, std::vec::IntoIter<Triple>)>,
    done: bool,
}

impl Iterator for TripleIter<'_> {
    type Item = KbResult<(Triple, ContextKey)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((context, matches)) = &mut self.current {
                if let Some(triple) = matches.next() {
                    return Some(Ok((triple, context.clone())));
                }
                self.current = None;
            }
            if self.queue.is_none() {
                match self.engine.candidate_contexts() {
                    Ok(all) => self.queue = Some(all.into()),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
            let Some(context) = self.queue.as_mut().and_then(VecDeque::pop_front) else {
                self.done = true;
                return None;
            };
            match self.engine.visible_state(&context, self.streaming) {
                Ok(state) => {
                    let mut matches: Vec<Triple> = state
                        .iter()
                        .filter(|t| self.pattern.matches(t))
                        .cloned()
                        .collect();
                    matches.sort();
                    self.current = Some((context, matches.into_iter()));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Summary information about the store state.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub data_dir: String,
    pub durable_contexts: usize,
    pub cached_contexts: usize,
    pub max_active_contexts: usize,
    pub evictions: u64,
    pub pending_changes: usize,
    pub staged_revisions: usize,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let capacity = if self.max_active_contexts == 0 {
            "unbounded".to_string()
        } else {
            self.max_active_contexts.to_string()
        };
        writeln!(f, "revkb store info")?;
        writeln!(f, "  data dir:         {}", self.data_dir)?;
        writeln!(f, "  contexts:         {}", self.durable_contexts)?;
        writeln!(f, "  cached:           {} / {capacity}", self.cached_contexts)?;
        writeln!(f, "  evictions:        {}", self.evictions)?;
        writeln!(f, "  pending changes:  {}", self.pending_changes)?;
        writeln!(f, "  staged revisions: {}", self.staged_revisions)?;
        Ok(())
    }
}
