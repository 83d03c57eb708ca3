//! Bounded LRU cache of materialized context state.
//!
//! Entries are pure caches: each one can be rebuilt at any time by replaying
//! the context's revision log, so eviction and invalidation never lose data.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::term::{ContextKey, Triple, TripleSet};

use super::log::{self, RevisionLog};
use super::{RevisionKind, StoreResult};

/// One cached context.
#[derive(Debug, Clone)]
pub struct ActiveEntry {
    triples: Arc<TripleSet>,
    hits: u64,
}

impl ActiveEntry {
    pub fn triples(&self) -> &Arc<TripleSet> {
        &self.triples
    }

    /// Cache hits served by this entry since it was loaded.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

/// In-memory materialization of recently used contexts.
///
/// Capacity counts cached contexts only, independent of how many exist on
/// disk. A capacity of zero means unbounded.
pub struct ActiveStateCache {
    entries: LruCache<ContextKey, ActiveEntry>,
    capacity: usize,
    evictions: u64,
}

impl ActiveStateCache {
    pub fn new(max_active_contexts: usize) -> Self {
        let entries = match NonZeroUsize::new(max_active_contexts) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            entries,
            capacity: max_active_contexts,
            evictions: 0,
        }
    }

    /// Current state of `context`, replaying its log on a miss.
    pub fn get_or_load(
        &mut self,
        log: &RevisionLog,
        context: &ContextKey,
    ) -> StoreResult<Arc<TripleSet>> {
        if let Some(entry) = self.entries.get_mut(context) {
            entry.hits += 1;
            return Ok(Arc::clone(&entry.triples));
        }
        let triples = Arc::new(log.replay(context)?);
        let entry = ActiveEntry {
            triples: Arc::clone(&triples),
            hits: 0,
        };
        if let Some((evicted, _)) = self.entries.push(context.clone(), entry) {
            if &evicted != context {
                self.evictions += 1;
                tracing::debug!(context = %evicted, capacity = self.capacity, "evicted context");
            }
        }
        Ok(triples)
    }

    /// Cached state without loading or changing recency.
    pub fn peek(&self, context: &ContextKey) -> Option<Arc<TripleSet>> {
        self.entries.peek(context).map(|e| Arc::clone(&e.triples))
    }

    /// Apply a revision batch to a cached entry in place.
    ///
    /// Does nothing when `context` is not cached; readers still holding the
    /// previous `Arc` keep their snapshot.
    pub fn apply(&mut self, context: &ContextKey, kind: RevisionKind, batch: &[Triple]) {
        if let Some(entry) = self.entries.get_mut(context) {
            let state = Arc::make_mut(&mut entry.triples);
            log::apply_batch(state, kind, batch.iter().cloned());
        }
    }

    /// Mark `context` as most recently used.
    pub fn touch(&mut self, context: &ContextKey) {
        self.entries.promote(context);
    }

    pub fn invalidate(&mut self, context: &ContextKey) {
        self.entries.pop(context);
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_cached(&self, context: &ContextKey) -> bool {
        self.entries.contains(context)
    }

    /// Number of cached contexts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached contexts, most recently used first.
    pub fn cached_contexts(&self) -> Vec<ContextKey> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Configured capacity; zero means unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total evictions since the cache was created.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

impl std::fmt::Debug for ActiveStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStateCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("evictions", &self.evictions)
            .finish()
    }
}
