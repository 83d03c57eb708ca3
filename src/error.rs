//! Rich diagnostic error types for the revkb store.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! what went wrong and whether retrying is safe.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the revkb store.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Term(#[from] TermError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

impl KbError {
    /// Whether this error reports a corrupt revision payload, at any depth.
    pub fn is_corrupt_revision(&self) -> bool {
        match self {
            KbError::Store(e) => e.is_corrupt_revision(),
            KbError::Txn(TxnError::StagingFailure { source, .. })
            | KbError::Txn(TxnError::PartialCommit { source, .. }) => source.is_corrupt_revision(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    #[diagnostic(
        code(revkb::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt revision {index} in context {context}: {message}")]
    #[diagnostic(
        code(revkb::store::corrupt_revision),
        help(
            "The revision payload could not be decoded. Revisions are never skipped, \
             because doing so would silently change the replayed state. Restore the \
             file from a backup or remove the context directory if its history is expendable."
        )
    )]
    CorruptRevision {
        context: String,
        index: u64,
        message: String,
    },

    #[error("revision {index} in context {context} uses schema version {version}, newer than supported")]
    #[diagnostic(
        code(revkb::store::unsupported_version),
        help("The store was written by a newer revkb release. Upgrade revkb to read it.")
    )]
    UnsupportedVersion {
        context: String,
        index: u64,
        version: u16,
    },

    #[error("invalid context directory name: {name}")]
    #[diagnostic(
        code(revkb::store::invalid_context_name),
        help("Directory names under the store must be percent-encoded UTF-8 context keys.")
    )]
    InvalidContextName { name: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(revkb::store::serde),
        help("Failed to encode a revision payload. This indicates a bug; please file a report.")
    )]
    Serialization { message: String },
}

impl StoreError {
    /// Wrap an I/O error together with the path that produced it.
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether this is a [`StoreError::CorruptRevision`].
    pub fn is_corrupt_revision(&self) -> bool {
        matches!(self, StoreError::CorruptRevision { .. })
    }
}

// ---------------------------------------------------------------------------
// Transaction errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TxnError {
    #[error("failed to stage revision {index} for context {context}")]
    #[diagnostic(
        code(revkb::txn::staging_failure),
        help(
            "Every revision staged by this commit was discarded and the pending changes \
             were restored. Durable state is unchanged; fix the underlying I/O problem \
             and call commit() again."
        )
    )]
    StagingFailure {
        context: String,
        index: u64,
        #[source]
        source: Box<StoreError>,
    },

    #[error("commit published {published} revision(s) but {remaining} could not be published")]
    #[diagnostic(
        code(revkb::txn::partial_commit),
        help(
            "Some contexts were committed while others are still pending. Pending changes \
             of the unpublished contexts were preserved; calling commit() again is safe."
        )
    )]
    PartialCommit {
        published: usize,
        remaining: usize,
        #[source]
        source: Box<StoreError>,
    },
}

// ---------------------------------------------------------------------------
// Term errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TermError {
    #[error("cannot parse term {input:?}: {message}")]
    #[diagnostic(
        code(revkb::term::invalid),
        help(
            "Terms use N-Triples syntax: <http://example.org/iri>, \"literal\", \
             \"literal\"@en, \"literal\"^^<datatype-iri>, or _:blank."
        )
    )]
    Invalid { input: String, message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("store not found: {path}")]
    #[diagnostic(
        code(revkb::engine::store_not_found),
        help("Open with `create = true` (or run `revkb init`) to create a new store here.")
    )]
    StoreNotFound { path: String },

    #[error("invalid configuration at {path}: {message}")]
    #[diagnostic(
        code(revkb::engine::config),
        help("Check the TOML syntax and field names of the store configuration file.")
    )]
    Config { path: String, message: String },
}

/// Convenience alias for functions returning revkb results.
pub type KbResult<T> = std::result::Result<T, KbError>;
