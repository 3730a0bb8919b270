//! What the anti-entropy engine needs from a store

use crate::core_store::{EntryDigest, ReplicatedStore, StoreResult, Versioned};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

pub trait SyncReplica<K, V>: Send + Sync {
    /// Per-key timestamps, tombstones included
    fn digest(&self) -> HashMap<K, EntryDigest>;

    fn versioned(&self, key: &K) -> Option<Versioned<V>>;

    /// Offer a remote version; true if it replaced the held one
    fn apply_remote(&self, key: K, value: Versioned<V>) -> StoreResult<bool>;

    /// Drop tombstones recorded before the given wall-clock time
    fn purge_tombstones(&self, safe_before_millis: u64) -> StoreResult<usize>;
}

impl<K, V> SyncReplica<K, V> for ReplicatedStore<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Clone + Debug + Send + Sync,
{
    fn digest(&self) -> HashMap<K, EntryDigest> {
        ReplicatedStore::digest(self)
    }

    fn versioned(&self, key: &K) -> Option<Versioned<V>> {
        ReplicatedStore::versioned(self, key)
    }

    fn apply_remote(&self, key: K, value: Versioned<V>) -> StoreResult<bool> {
        Ok(self.apply(key, value)?.is_applied())
    }

    fn purge_tombstones(&self, safe_before_millis: u64) -> StoreResult<usize> {
        ReplicatedStore::purge_tombstones(self, safe_before_millis)
    }
}
