/*
    errors.rs - Error types for the store subsystem

    Stale writes are not errors: the store reports them through
    `Applied::Stale` so replaying anti-entropy suggestions stays idempotent.
*/

use crate::core_clock::ClockError;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Error)]
pub enum StoreError {
    /// No timestamp could be issued for the key
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    /// Lock poisoned by a panicking writer
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Internal("lock poisoned".to_string());
        assert_eq!(err.to_string(), "Internal error: lock poisoned");
    }

    #[test]
    fn test_clock_error_conversion() {
        let err: StoreError = ClockError::TermUnavailable("of:1".to_string()).into();
        assert!(matches!(err, StoreError::Clock(_)));
        assert!(err.to_string().contains("of:1"));
    }
}
