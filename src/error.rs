//! Crate-wide error taxonomy.
//!
//! Fatal, init-time conditions (configuration/data errors) are returned as
//! `Error`. Recoverable per-packet or per-zone conditions (numerical
//! non-convergence, capacity limits, unphysical-state clamps) are *not*
//! represented here — they are reported through the typed counters in
//! [`crate::diagnostics::Diagnostics`] returned alongside a successful
//! result.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration key was missing or held a value that could
    /// not be interpreted for its purpose (e.g. a malformed `nu_grid`).
    #[error("configuration error: {0}")]
    Config(String),

    /// Atomic data needed for a requested `(Z, A)` pair was not available.
    #[error("missing atomic data for Z={z}, A={a}")]
    MissingAtomicData {
        /// Atomic number.
        z: i32,
        /// Atomic mass number.
        a: i32,
    },

    /// An unknown grid or hydro module was requested.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
