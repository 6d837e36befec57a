//! Error types for bilby

use thiserror::Error;

/// Result type alias using bilby's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bilby operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A tape or graph recorder is already active on this thread
    #[error("an engine is already active on the current thread")]
    EngineAlreadyActive,

    /// A derivative was requested while no engine is active on this thread
    #[error("no tape or graph recorder is active on the current thread")]
    NoActiveEngine,

    /// An index, slot or tape position is outside the valid range
    #[error("{what} {index} out of range (limit {limit})")]
    OutOfRange {
        /// What kind of index was out of range
        what: &'static str,
        /// The offending value
        index: usize,
        /// The exclusive upper bound
        limit: usize,
    },

    /// Adjoints were requested before any output derivative was seeded
    #[error("at least one derivative must be set before computing adjoints")]
    DerivativesNotInitialized,

    /// A buffer length does not match what the graph or backend expects
    #[error("{what} count mismatch: expected {expected}, got {got}")]
    CountMismatch {
        /// What was being counted
        what: &'static str,
        /// Expected count
        expected: usize,
        /// Actual count
        got: usize,
    },
}

impl Error {
    /// Create an out-of-range error
    pub fn out_of_range(what: &'static str, index: usize, limit: usize) -> Self {
        Self::OutOfRange { what, index, limit }
    }

    /// Create a count mismatch error
    pub fn count_mismatch(what: &'static str, expected: usize, got: usize) -> Self {
        Self::CountMismatch {
            what,
            expected,
            got,
        }
    }
}
