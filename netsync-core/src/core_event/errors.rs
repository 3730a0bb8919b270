//! Error types for the event subsystem

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Malformed constructor or call input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Removing a listener that was never added
    #[error("Listener not registered")]
    NotRegistered,

    /// The registry or accumulator is shutting down
    #[error("Deactivated: {0}")]
    Deactivated(String),

    /// Dispatch queue is full; the event was dropped
    #[error("Event queue full")]
    QueueFull,

    /// Dispatch queue is closed
    #[error("Event queue closed")]
    Closed,

    /// Timers need a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EventResult<T> = Result<T, EventError>;
