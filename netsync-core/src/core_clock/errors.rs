//! Error types for logical clocks

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// No mastership term is known for the scope, so this node may not stamp writes for it
    #[error("No term available for scope {0}")]
    TermUnavailable(String),

    /// Term moved backwards
    #[error("Stale term for scope {scope}: current {current}, got {requested}")]
    StaleTerm {
        scope: String,
        current: u64,
        requested: u64,
    },

    #[error("Internal clock error: {0}")]
    Internal(String),
}

pub type ClockResult<T> = Result<T, ClockError>;
