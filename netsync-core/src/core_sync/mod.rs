/*
    core_sync - Anti-entropy replication between cluster nodes

    Handles:
    - Digest advertisements and suggestion/request replies
    - Binary framing of sync messages
    - Periodic gossip with a random peer
    - Immediate, batched push of local writes to every peer
*/

pub mod anti_entropy;
pub mod errors;
pub mod gossip;
pub mod messages;
pub mod replica;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub mod tests;

pub use anti_entropy::{AntiEntropyEngine, AntiEntropyStats, ApplyOutcome, PeerSyncState};
pub use errors::{SyncError, SyncResult};
pub use gossip::{GossipService, GossipSettings};
pub use messages::{Advertisement, Reply, SyncMessage};
pub use replica::SyncReplica;
pub use transport::{ClusterTransport, MemoryNetwork, MemoryTransport};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// Key types that can be replicated
pub trait SyncKey:
    Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> SyncKey for T where
    T: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Value types that can be replicated
pub trait SyncValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> SyncValue for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}
