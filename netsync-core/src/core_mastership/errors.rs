/*
    errors.rs - Error types for the mastership subsystem
*/

use std::sync::PoisonError;
use thiserror::Error;

/// Errors that can occur in the mastership subsystem
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MastershipError {
    /// Missing or malformed node/device identifier
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The authoritative store could not record the change
    #[error("Mastership store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Result type for mastership operations
pub type MastershipResult<T> = Result<T, MastershipError>;

pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> MastershipError {
    MastershipError::StoreUnavailable(
        "Lock poisoned: a thread panicked while holding the role map".to_string(),
    )
}
