/*
    errors.rs - Error types for anti-entropy and gossip
*/

use crate::core_event::EventError;
use crate::core_store::StoreError;
use crate::ids::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Bad frame magic: {0:#018x}")]
    BadMagic(u64),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("Truncated frame: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Payload encoding error: {0}")]
    Payload(#[from] bincode::Error),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(NodeId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

pub type SyncResult<T> = Result<T, SyncError>;
