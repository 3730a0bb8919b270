//! Anti-entropy messages

use crate::core_store::{EntryDigest, Versioned};
use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// The sender's per-key timestamps, without values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: Deserialize<'de> + Eq + Hash"))]
pub struct Advertisement<K> {
    pub sender: NodeId,
    pub digest: HashMap<K, EntryDigest>,
}

/// Versions the receiver should take, and keys the sender wants back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"))]
pub struct Reply<K, V> {
    pub sender: NodeId,
    pub suggestion: HashMap<K, Versioned<V>>,
    pub request: HashSet<K>,
}

impl<K: Eq + Hash> PartialEq for Advertisement<K> {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender && self.digest == other.digest
    }
}

impl<K, V> Reply<K, V> {
    pub fn new(sender: NodeId) -> Self {
        Reply {
            sender,
            suggestion: HashMap::new(),
            request: HashSet::new(),
        }
    }

    /// An empty reply carries nothing and is never sent
    pub fn is_empty(&self) -> bool {
        self.suggestion.is_empty() && self.request.is_empty()
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for Reply<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender
            && self.suggestion == other.suggestion
            && self.request == other.request
    }
}

#[derive(Debug, Clone)]
pub enum SyncMessage<K, V> {
    Advertisement(Advertisement<K>),
    Reply(Reply<K, V>),
}

impl<K, V> SyncMessage<K, V> {
    pub fn sender(&self) -> &NodeId {
        match self {
            SyncMessage::Advertisement(ad) => &ad.sender,
            SyncMessage::Reply(reply) => &reply.sender,
        }
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for SyncMessage<K, V> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SyncMessage::Advertisement(a), SyncMessage::Advertisement(b)) => a == b,
            (SyncMessage::Reply(a), SyncMessage::Reply(b)) => a == b,
            _ => false,
        }
    }
}
