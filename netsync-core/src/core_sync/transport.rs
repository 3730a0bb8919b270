/*
    transport.rs - Cluster messaging seam

    The sync core only needs to push framed bytes at a peer and know which
    peers are currently reachable. Tombstone purging also needs the full
    membership, reachable or not: a partitioned member may still hold the
    value a tombstone deleted. Delivery is best-effort: a lost frame
    delays convergence until the next gossip round but never corrupts it.

    MemoryNetwork wires several nodes together inside one process, with
    per-node reachability switches for partition tests.
*/

use super::errors::{SyncError, SyncResult};
use crate::ids::NodeId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Deliver one frame to `peer`
    async fn send(&self, peer: &NodeId, frame: Vec<u8>) -> SyncResult<()>;

    /// Peers currently reachable, excluding the local node
    fn active_peers(&self) -> Vec<NodeId>;

    /// Every cluster member except the local node, reachable or not
    fn members(&self) -> Vec<NodeId>;
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<NodeId, mpsc::UnboundedSender<Vec<u8>>>,
    isolated: HashSet<NodeId>,
}

/// In-process network connecting any number of nodes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node, returning its transport and inbound frame queue
    pub fn join(&self, node: NodeId) -> (MemoryTransport, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .inboxes
            .insert(node.clone(), tx);
        (
            MemoryTransport {
                local: node,
                network: self.clone(),
            },
            rx,
        )
    }

    pub fn leave(&self, node: &NodeId) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .inboxes
            .remove(node);
    }

    /// Cut a node off from everyone (or reconnect it)
    pub fn set_isolated(&self, node: &NodeId, isolated: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if isolated {
            state.isolated.insert(node.clone());
        } else {
            state.isolated.remove(node);
        }
    }
}

pub struct MemoryTransport {
    local: NodeId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn local_node(&self) -> &NodeId {
        &self.local
    }
}

#[async_trait]
impl ClusterTransport for MemoryTransport {
    async fn send(&self, peer: &NodeId, frame: Vec<u8>) -> SyncResult<()> {
        let state = self
            .network
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if state.isolated.contains(&self.local) || state.isolated.contains(peer) {
            return Err(SyncError::PeerUnreachable(peer.clone()));
        }
        let inbox = state
            .inboxes
            .get(peer)
            .ok_or_else(|| SyncError::PeerUnreachable(peer.clone()))?;
        inbox
            .send(frame)
            .map_err(|_| SyncError::PeerUnreachable(peer.clone()))
    }

    fn active_peers(&self) -> Vec<NodeId> {
        let state = self
            .network
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if state.isolated.contains(&self.local) {
            return Vec::new();
        }
        let mut peers: Vec<NodeId> = state
            .inboxes
            .keys()
            .filter(|n| **n != self.local && !state.isolated.contains(*n))
            .cloned()
            .collect();
        peers.sort();
        peers
    }

    fn members(&self) -> Vec<NodeId> {
        let state = self
            .network
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut members: Vec<NodeId> = state
            .inboxes
            .keys()
            .filter(|n| **n != self.local)
            .cloned()
            .collect();
        members.sort();
        members
    }
}
