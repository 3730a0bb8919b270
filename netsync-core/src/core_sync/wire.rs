/*
    wire.rs - Sync message framing

    Frame layout, all integers big-endian:

        0        8            12           16
        +--------+------------+------------+-----------------+
        | magic  | msg type   | length     | bincode payload |
        | u64    | u32        | u32        | `length` bytes  |
        +--------+------------+------------+-----------------+
*/

use super::errors::{SyncError, SyncResult};
use super::messages::{Advertisement, Reply, SyncMessage};
use super::{SyncKey, SyncValue};

pub const MAGIC: u64 = 0xFEED_CAFE_CAFE_FEED;
pub const HEADER_LEN: usize = 16;
/// Largest payload accepted from a peer
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

pub const MSG_ADVERTISEMENT: u32 = 1;
pub const MSG_REPLY: u32 = 2;

pub fn encode<K: SyncKey, V: SyncValue>(message: &SyncMessage<K, V>) -> SyncResult<Vec<u8>> {
    let (msg_type, payload) = match message {
        SyncMessage::Advertisement(ad) => (MSG_ADVERTISEMENT, bincode::serialize(ad)?),
        SyncMessage::Reply(reply) => (MSG_REPLY, bincode::serialize(reply)?),
    };
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(SyncError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&msg_type.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode<K: SyncKey, V: SyncValue>(frame: &[u8]) -> SyncResult<SyncMessage<K, V>> {
    if frame.len() < HEADER_LEN {
        return Err(SyncError::Truncated {
            expected: HEADER_LEN,
            actual: frame.len(),
        });
    }

    let magic = read_u64(&frame[0..8]);
    if magic != MAGIC {
        return Err(SyncError::BadMagic(magic));
    }
    let msg_type = read_u32(&frame[8..12]);
    let len = read_u32(&frame[12..16]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(SyncError::FrameTooLarge(len));
    }
    if frame.len() < HEADER_LEN + len {
        return Err(SyncError::Truncated {
            expected: HEADER_LEN + len,
            actual: frame.len(),
        });
    }

    let payload = &frame[HEADER_LEN..HEADER_LEN + len];
    match msg_type {
        MSG_ADVERTISEMENT => Ok(SyncMessage::Advertisement(bincode::deserialize::<
            Advertisement<K>,
        >(payload)?)),
        MSG_REPLY => Ok(SyncMessage::Reply(bincode::deserialize::<Reply<K, V>>(payload)?)),
        other => Err(SyncError::UnknownMessageType(other)),
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}
