/*
    anti_entropy.rs - Digest exchange and reconciliation

    Exchange between an initiator A and a responder B:

    1. A sends an Advertisement with its per-key timestamps.
    2. B replies with a suggestion (every version B holds that is newer
       than A's, or that A lacks) and a request (every key A holds newer
       than B, or that B lacks).
    3. A applies the suggestion and answers the request with a follow-up
       reply that carries only suggestions.

    Applying goes through the store's compare-and-replace, so replaying any
    reply is harmless. With no new writes, one exchange leaves both
    replicas holding identical versions for every key either one knows.

    Peer bookkeeping records when each peer last completed an exchange.
    A tombstone recorded before every peer's last exchange has reached
    every peer and can be purged.
*/

use super::errors::SyncResult;
use super::messages::{Advertisement, Reply};
use super::replica::SyncReplica;
use super::{SyncKey, SyncValue};
use crate::ids::NodeId;
use crate::metrics::{self, names};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Sync state for one peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerSyncState {
    /// Wall-clock millis at the start of the last successful exchange
    pub last_sync: u64,
    /// Consecutive failed sends since then
    pub failure_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntiEntropyStats {
    pub peer_count: usize,
    pub failing_peers: usize,
}

/// Result of applying a reply
#[derive(Debug, Clone)]
pub struct ApplyOutcome<K, V> {
    /// Suggestions that replaced a held version
    pub applied: usize,
    /// Versions the sender asked for, to be sent back
    pub follow_up: Option<Reply<K, V>>,
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for ApplyOutcome<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.applied == other.applied && self.follow_up == other.follow_up
    }
}

pub struct AntiEntropyEngine<K, V> {
    local: NodeId,
    replica: Arc<dyn SyncReplica<K, V>>,
    peers: Mutex<HashMap<NodeId, PeerSyncState>>,
}

impl<K: SyncKey, V: SyncValue> AntiEntropyEngine<K, V> {
    pub fn new(local: NodeId, replica: Arc<dyn SyncReplica<K, V>>) -> Self {
        AntiEntropyEngine {
            local,
            replica,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn create_advertisement(&self) -> Advertisement<K> {
        Advertisement {
            sender: self.local.clone(),
            digest: self.replica.digest(),
        }
    }

    /// Build the responder's reply to an advertisement
    pub fn handle_advertisement(&self, ad: &Advertisement<K>) -> Reply<K, V> {
        metrics::record_counter(names::AE_ADVERTISEMENTS_RECEIVED, 1);
        let local = self.replica.digest();
        let mut reply = Reply::new(self.local.clone());

        for (key, mine) in &local {
            let behind = match ad.digest.get(key) {
                Some(theirs) => mine.timestamp.is_newer_than(&theirs.timestamp),
                None => true,
            };
            if behind {
                // The held version may have moved on since the digest; newer is fine.
                if let Some(value) = self.replica.versioned(key) {
                    reply.suggestion.insert(key.clone(), value);
                }
            }
        }

        for (key, theirs) in &ad.digest {
            let ahead = match local.get(key) {
                Some(mine) => theirs.timestamp.is_newer_than(&mine.timestamp),
                None => true,
            };
            if ahead {
                reply.request.insert(key.clone());
            }
        }

        trace!(
            peer = %ad.sender,
            advertised = ad.digest.len(),
            suggested = reply.suggestion.len(),
            requested = reply.request.len(),
            "Handled advertisement"
        );
        reply
    }

    /// Apply a reply's suggestions and collect what it requested
    pub fn apply_reply(&self, reply: Reply<K, V>) -> SyncResult<ApplyOutcome<K, V>> {
        if reply.is_empty() {
            return Ok(ApplyOutcome {
                applied: 0,
                follow_up: None,
            });
        }
        metrics::record_counter(names::AE_REPLIES_RECEIVED, 1);

        let mut applied = 0;
        for (key, value) in reply.suggestion {
            if self.replica.apply_remote(key, value)? {
                applied += 1;
            }
        }

        let mut follow_up = Reply::new(self.local.clone());
        for key in reply.request {
            // Keys purged since the peer's digest are simply left out.
            if let Some(value) = self.replica.versioned(&key) {
                follow_up.suggestion.insert(key, value);
            }
        }

        debug!(
            peer = %reply.sender,
            applied,
            returned = follow_up.suggestion.len(),
            "Applied anti-entropy reply"
        );
        Ok(ApplyOutcome {
            applied,
            follow_up: (!follow_up.is_empty()).then_some(follow_up),
        })
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<NodeId, PeerSyncState>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an exchange with `peer` that started at `started_at` millis
    pub fn record_sync(&self, peer: &NodeId, started_at: u64) {
        let mut peers = self.peers();
        let state = peers.entry(peer.clone()).or_default();
        state.last_sync = state.last_sync.max(started_at);
        state.failure_count = 0;
    }

    pub fn record_failure(&self, peer: &NodeId) {
        self.peers().entry(peer.clone()).or_default().failure_count += 1;
    }

    pub fn peer_state(&self, peer: &NodeId) -> Option<PeerSyncState> {
        self.peers().get(peer).copied()
    }

    /// Latest time before which every listed peer has synced
    ///
    /// Zero if any peer never completed an exchange, or if there are no peers.
    pub fn safe_purge_time(&self, peers: &[NodeId]) -> u64 {
        let known = self.peers();
        peers
            .iter()
            .map(|p| known.get(p).map(|s| s.last_sync).unwrap_or(0))
            .min()
            .unwrap_or(0)
    }

    pub fn purge_tombstones(&self, peers: &[NodeId]) -> SyncResult<usize> {
        let safe = self.safe_purge_time(peers);
        if safe == 0 {
            return Ok(0);
        }
        Ok(self.replica.purge_tombstones(safe)?)
    }

    pub fn stats(&self) -> AntiEntropyStats {
        let peers = self.peers();
        AntiEntropyStats {
            peer_count: peers.len(),
            failing_peers: peers.values().filter(|s| s.failure_count > 0).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_clock::{LogicalTimestamp, VersionedValue};
    use crate::core_store::{ReplicatedStore, StoreResult, TimestampProvider};

    fn replica() -> Arc<ReplicatedStore<String, u32>> {
        let provider: Arc<dyn TimestampProvider<String>> =
            Arc::new(|_: &String| -> StoreResult<LogicalTimestamp> { Ok(LogicalTimestamp::new(0, 0)) });
        Arc::new(ReplicatedStore::new("test", provider))
    }

    fn engine(name: &str, store: &Arc<ReplicatedStore<String, u32>>) -> AntiEntropyEngine<String, u32> {
        AntiEntropyEngine::new(NodeId::new(name), store.clone())
    }

    fn put(store: &ReplicatedStore<String, u32>, key: &str, value: Option<u32>, seq: u64) {
        store
            .apply(key.to_string(), VersionedValue::new(value, LogicalTimestamp::new(1, seq)))
            .unwrap();
    }

    #[test]
    fn test_reply_construction() {
        let (a, b) = (replica(), replica());
        put(&a, "only-a", Some(1), 1);
        put(&a, "a-newer", Some(2), 5);
        put(&b, "a-newer", Some(0), 4);
        put(&b, "b-newer", Some(3), 9);
        put(&a, "b-newer", Some(0), 8);
        put(&b, "only-b", Some(4), 1);
        put(&a, "same", Some(5), 1);
        put(&b, "same", Some(5), 1);

        let ad = engine("a", &a).create_advertisement();
        let reply = engine("b", &b).handle_advertisement(&ad);

        let mut suggested: Vec<_> = reply.suggestion.keys().cloned().collect();
        suggested.sort();
        assert_eq!(suggested, vec!["b-newer", "only-b"]);

        let mut requested: Vec<_> = reply.request.iter().cloned().collect();
        requested.sort();
        assert_eq!(requested, vec!["a-newer", "only-a"]);
    }

    #[test]
    fn test_one_exchange_converges() {
        let (a, b) = (replica(), replica());
        put(&a, "x", Some(1), 1);
        put(&a, "gone", None, 7);
        put(&b, "gone", Some(9), 6);
        put(&b, "y", Some(2), 2);

        let (ea, eb) = (engine("a", &a), engine("b", &b));
        let reply = eb.handle_advertisement(&ea.create_advertisement());
        let outcome = ea.apply_reply(reply).unwrap();
        assert_eq!(outcome.applied, 1);

        let follow_up = outcome.follow_up.unwrap();
        assert!(follow_up.request.is_empty());
        let back = eb.apply_reply(follow_up).unwrap();
        assert_eq!(back.applied, 2);
        assert!(back.follow_up.is_none());

        assert_eq!(a.entries(), b.entries());
        assert!(b.get(&"gone".to_string()).is_none());
    }

    #[test]
    fn test_replayed_reply_is_noop() {
        let (a, b) = (replica(), replica());
        put(&b, "k", Some(1), 3);

        let (ea, eb) = (engine("a", &a), engine("b", &b));
        let reply = eb.handle_advertisement(&ea.create_advertisement());
        assert_eq!(ea.apply_reply(reply.clone()).unwrap().applied, 1);
        assert_eq!(ea.apply_reply(reply).unwrap().applied, 0);
    }

    #[test]
    fn test_in_sync_replicas_produce_empty_reply() {
        let (a, b) = (replica(), replica());
        put(&a, "k", Some(1), 3);
        put(&b, "k", Some(1), 3);

        let reply = engine("b", &b).handle_advertisement(&engine("a", &a).create_advertisement());
        assert!(reply.is_empty());

        let outcome = engine("a", &a).apply_reply(reply).unwrap();
        assert_eq!(outcome, ApplyOutcome { applied: 0, follow_up: None });
    }

    #[test]
    fn test_follow_up_carries_requested_versions() {
        let (a, b) = (replica(), replica());
        put(&a, "k", Some(7), 4);

        let (ea, eb) = (engine("a", &a), engine("b", &b));
        let outcome = ea.apply_reply(eb.handle_advertisement(&ea.create_advertisement())).unwrap();

        let mut expected = Reply::new(NodeId::new("a"));
        expected
            .suggestion
            .insert("k".to_string(), VersionedValue::new(Some(7), LogicalTimestamp::new(1, 4)));
        assert_eq!(outcome, ApplyOutcome { applied: 0, follow_up: Some(expected) });
    }

    #[test]
    fn test_safe_purge_time_is_minimum() {
        let store = replica();
        let engine = engine("a", &store);
        let (b, c) = (NodeId::new("b"), NodeId::new("c"));

        assert_eq!(engine.safe_purge_time(&[]), 0);
        engine.record_sync(&b, 500);
        assert_eq!(engine.safe_purge_time(&[b.clone(), c.clone()]), 0);

        engine.record_sync(&c, 300);
        assert_eq!(engine.safe_purge_time(&[b.clone(), c.clone()]), 300);

        // Older completions never move the mark backwards
        engine.record_sync(&c, 100);
        assert_eq!(engine.peer_state(&c).unwrap().last_sync, 300);
    }

    #[test]
    fn test_failures_reset_on_sync() {
        let store = replica();
        let engine = engine("a", &store);
        let peer = NodeId::new("b");

        engine.record_failure(&peer);
        engine.record_failure(&peer);
        assert_eq!(engine.peer_state(&peer).unwrap().failure_count, 2);
        assert_eq!(engine.stats().failing_peers, 1);

        engine.record_sync(&peer, 10);
        assert_eq!(engine.peer_state(&peer).unwrap().failure_count, 0);
        assert_eq!(engine.stats(), AntiEntropyStats { peer_count: 1, failing_peers: 0 });
    }

    #[test]
    fn test_purge_waits_for_every_peer() {
        let store = replica();
        put(&store, "dead", None, 1);
        let engine = engine("a", &store);
        let (b, c) = (NodeId::new("b"), NodeId::new("c"));

        engine.record_sync(&b, u64::MAX);
        assert_eq!(engine.purge_tombstones(&[b.clone(), c.clone()]).unwrap(), 0);
        assert_eq!(store.tombstone_count(), 1);

        engine.record_sync(&c, u64::MAX);
        assert_eq!(engine.purge_tombstones(&[b, c]).unwrap(), 1);
        assert_eq!(store.tombstone_count(), 0);
    }
}
