//! Error taxonomy for the staging layer.
//!
//! The staging layer does not attempt recovery: every variant except a plain
//! cache miss (which is an `Option`/count, not an error) is fatal to the
//! import, and partial progress left in the store is acceptable because
//! imports are restarted from scratch or resumed from a fresh diff.

use thiserror::Error;

/// Errors raised by the staging middle layer and its store adapters.
#[derive(Debug, Error)]
pub enum MiddleError {
    /// The staging store could not be reached at startup.
    #[error("connection to the staging store failed: {message}")]
    Connect { message: String },

    /// In append mode the existing id column width disagrees with this
    /// build's id width.
    #[error(
        "the staging tables were created with {found}-bit ids but this build \
         uses {expected}-bit ids; re-create the database or use a matching build"
    )]
    SchemaMismatch { found: u32, expected: u32 },

    /// A conflicting array extension is loaded in the target database.
    #[error(
        "the target database has the {opclass} operator class loaded; it \
         interferes with array index handling, use a database without it"
    )]
    ExtensionIncompatible { opclass: String },

    /// An internal sequencing bug, e.g. a copy row sent to a table that is
    /// not in streaming mode.
    #[error("store protocol violation: {0}")]
    Protocol(String),

    /// A store operation returned a non-OK result.
    #[error("staging store operation `{op}` failed: {message}")]
    Store { op: String, message: String },

    /// An array literal or member list read back from the store failed to
    /// parse; this indicates a corrupt store.
    #[error("malformed staging data in {context}: {text:?}")]
    MalformedData {
        context: &'static str,
        text: String,
    },

    /// The RAM cache is over budget and the allocation strategy forbids
    /// eviction.
    #[error(
        "node cache exhausted at {capacity_mb} MiB; raise the cache size or \
         allow lossy allocation"
    )]
    CacheFull { capacity_mb: usize },

    /// Persistent node cache I/O failure.
    #[error("persistent node cache I/O failed while {context}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}
