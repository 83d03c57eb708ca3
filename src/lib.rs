// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # revkb
//!
//! A lazy, revisioned, transactional storage backend for RDF triples
//! partitioned into named contexts.
//!
//! ## Architecture
//!
//! - **Terms** (`term`): RDF terms, triples, patterns and context keys
//! - **Revision log** (`store::log`): append-only per-context add/remove
//!   revisions on disk, staged and published by atomic rename
//! - **Pending changes** (`store::pending`): uncommitted adds and removals
//!   that cancel each other
//! - **Active state cache** (`store::cache`): bounded LRU of materialized
//!   contexts, rebuilt lazily by replay
//! - **Transactions** (`store::txn`): two-phase prepare/publish commit
//! - **Engine** (`engine`): the public facade tying it together
//!
//! ## Library usage
//!
//! ```no_run
//! use revkb::engine::Engine;
//! use revkb::term::{ContextKey, Term, Triple, TriplePattern};
//!
//! let engine = Engine::open_dir("/tmp/kb", true).unwrap();
//! let people = ContextKey::named("people");
//! engine
//!     .add(
//!         Triple::new(Term::iri("ex:alice"), Term::iri("ex:knows"), Term::iri("ex:bob")),
//!         &people,
//!     )
//!     .unwrap();
//! engine.commit().unwrap();
//!
//! for row in engine.triples(&TriplePattern::any(), None) {
//!     let (triple, context) = row.unwrap();
//!     println!("{triple} in {context}");
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod term;
