//! Revisioned storage for revkb.
//!
//! Four cooperating parts make a context's triples durable:
//!
//! - [`log::RevisionLog`]: append-only, per-context history on disk
//! - [`pending::PendingChangeSet`]: uncommitted adds/removes in memory
//! - [`cache::ActiveStateCache`]: bounded LRU of replayed context state
//! - [`txn::TransactionCoordinator`]: stage → publish → apply across the three
//!
//! [`codec`] and [`naming`] define the on-disk payload and directory formats.

pub mod cache;
pub mod codec;
pub mod log;
pub mod naming;
pub mod pending;
pub mod txn;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Whether a revision inserts or deletes its batch.
///
/// `Add` orders before `Remove`, which is also the replay order when both
/// kinds share an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RevisionKind {
    Add,
    Remove,
}

impl RevisionKind {
    /// File extension used in revision filenames.
    pub fn as_str(self) -> &'static str {
        match self {
            RevisionKind::Add => "add",
            RevisionKind::Remove => "remove",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(RevisionKind::Add),
            "remove" => Some(RevisionKind::Remove),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            RevisionKind::Add => 0,
            RevisionKind::Remove => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RevisionKind::Add),
            1 => Some(RevisionKind::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
