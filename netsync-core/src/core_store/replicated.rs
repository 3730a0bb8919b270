/*
    replicated.rs - Eventually consistent keyed store

    Every entry is a VersionedValue<Option<V>>: Some is a live value, None
    is a tombstone. Local writes and remote updates go through the same
    compare-and-replace under the store's write lock, so an incoming
    version replaces the held one only when its timestamp is strictly
    newer. That single rule makes replay idempotent and lets replicas
    converge regardless of delivery order.

    update_with runs a read-modify-write of one key entirely under that
    lock, timestamp included, for callers that merge into the held value.

    Tombstones are kept until every peer has completed an anti-entropy
    exchange after the tombstone was recorded locally; the caller supplies
    that bound to purge_tombstones.
*/

use super::errors::{StoreError, StoreResult};
use crate::core_clock::{LogicalTimestamp, VersionedValue};
use crate::core_event::event::now_millis;
use crate::core_event::{Event, EventPoster};
use crate::metrics::{self, names};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Internal("Lock poisoned: a thread panicked while holding the store".to_string())
}

/// A live value or a tombstone, stamped with the time it was written
pub type Versioned<V> = VersionedValue<Option<V>>;

/// Issues the timestamp for a local write to `key`
pub trait TimestampProvider<K>: Send + Sync {
    fn timestamp(&self, key: &K) -> StoreResult<LogicalTimestamp>;
}

impl<K, F> TimestampProvider<K> for F
where
    F: Fn(&K) -> StoreResult<LogicalTimestamp> + Send + Sync,
{
    fn timestamp(&self, key: &K) -> StoreResult<LogicalTimestamp> {
        self(key)
    }
}

/// Change observed by store listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreEventType {
    Added,
    Updated,
    Removed,
}

pub type StoreEvent<V> = Event<StoreEventType, V>;

/// What an anti-entropy advertisement carries per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDigest {
    pub timestamp: LogicalTimestamp,
    pub tombstone: bool,
}

/// A locally originated version that peers should receive
#[derive(Debug, Clone, PartialEq)]
pub struct LocalUpdate<K, V> {
    pub key: K,
    pub value: Versioned<V>,
}

/// Outcome of offering a version to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<V> {
    /// The held version is the same or newer; nothing changed
    Stale,
    /// Stored a tombstone where no live value was held
    Silent,
    /// Stored, with the listener-visible change
    Changed(StoreEvent<V>),
}

impl<V> Applied<V> {
    pub fn is_applied(&self) -> bool {
        !matches!(self, Applied::Stale)
    }

    pub fn event(&self) -> Option<&StoreEvent<V>> {
        match self {
            Applied::Changed(event) => Some(event),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<StoreEvent<V>> {
        match self {
            Applied::Changed(event) => Some(event),
            _ => None,
        }
    }
}

/// What an `update_with` closure decided for the held value
#[derive(Debug, Clone, PartialEq)]
pub enum Update<V> {
    /// Leave the key as it is
    Keep,
    Put(V),
    Remove,
}

#[derive(Debug, Clone)]
struct StoredEntry<V> {
    value: Versioned<V>,
    // Local wall-clock time the version was stored; drives tombstone purge
    recorded_at: u64,
}

/// Replicated map from `K` to `V`
pub struct ReplicatedStore<K, V> {
    name: String,
    entries: RwLock<HashMap<K, StoredEntry<V>>>,
    timestamps: Arc<dyn TimestampProvider<K>>,
    events: Option<EventPoster<StoreEvent<V>>>,
    local_updates: Option<mpsc::Sender<LocalUpdate<K, V>>>,
}

impl<K, V> fmt::Debug for ReplicatedStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedStore")
            .field("name", &self.name)
            .finish()
    }
}

impl<K, V> ReplicatedStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone + fmt::Debug,
{
    pub fn new(name: impl Into<String>, timestamps: Arc<dyn TimestampProvider<K>>) -> Self {
        ReplicatedStore {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            timestamps,
            events: None,
            local_updates: None,
        }
    }

    /// Post change events to a dispatcher
    pub fn with_event_poster(mut self, poster: EventPoster<StoreEvent<V>>) -> Self {
        self.events = Some(poster);
        self
    }

    /// Forward accepted local writes so they can be pushed to peers
    pub fn with_update_channel(mut self, tx: mpsc::Sender<LocalUpdate<K, V>>) -> Self {
        self.local_updates = Some(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write a live value with a freshly issued timestamp
    pub fn upsert(&self, key: K, value: V) -> StoreResult<Applied<V>> {
        let timestamp = self.timestamps.timestamp(&key)?;
        self.apply_local(key, VersionedValue::new(Some(value), timestamp))
    }

    /// Replace the live value with a tombstone
    ///
    /// A tombstone is written even if no live value is held, so peers that
    /// still hold the key learn about the delete.
    pub fn remove(&self, key: &K) -> StoreResult<Applied<V>> {
        let timestamp = self.timestamps.timestamp(key)?;
        self.apply_local(key.clone(), VersionedValue::new(None, timestamp))
    }

    /// Offer a version received from a peer
    pub fn apply(&self, key: K, incoming: Versioned<V>) -> StoreResult<Applied<V>> {
        let applied = self.compare_and_replace(key, incoming)?;
        self.publish(&applied);
        Ok(applied)
    }

    /// Read, modify and write `key` under the store's write lock
    ///
    /// `f` sees the live value (or `None`) and decides what to store. The
    /// timestamp is issued under the same lock, so concurrent callers
    /// always merge into each other's results. Returns `None` for `Keep`.
    pub fn update_with(
        &self,
        key: K,
        f: impl FnOnce(Option<&V>) -> Update<V>,
    ) -> StoreResult<Option<Applied<V>>> {
        let (versioned, applied) = {
            let mut entries = self.entries.write().map_err(handle_poison)?;
            let current = entries.get(&key).and_then(|e| e.value.value().as_ref());
            let next = match f(current) {
                Update::Keep => return Ok(None),
                Update::Put(value) => Some(value),
                Update::Remove => None,
            };
            let versioned = VersionedValue::new(next, self.timestamps.timestamp(&key)?);
            let applied = self.replace_locked(&mut entries, key.clone(), versioned.clone());
            (versioned, applied)
        };
        self.announce(key, versioned, &applied);
        Ok(Some(applied))
    }

    fn apply_local(&self, key: K, versioned: Versioned<V>) -> StoreResult<Applied<V>> {
        let applied = self.compare_and_replace(key.clone(), versioned.clone())?;
        self.announce(key, versioned, &applied);
        Ok(applied)
    }

    /// Forward an accepted local write to peers and listeners
    fn announce(&self, key: K, versioned: Versioned<V>, applied: &Applied<V>) {
        if applied.is_applied() {
            if let Some(tx) = &self.local_updates {
                if tx.try_send(LocalUpdate { key, value: versioned }).is_err() {
                    // Anti-entropy delivers whatever the push path misses.
                    debug!(store = %self.name, "Local update channel unavailable, skipping push");
                }
            }
        }
        self.publish(applied);
    }

    fn compare_and_replace(&self, key: K, incoming: Versioned<V>) -> StoreResult<Applied<V>> {
        let mut entries = self.entries.write().map_err(handle_poison)?;
        Ok(self.replace_locked(&mut entries, key, incoming))
    }

    fn replace_locked(
        &self,
        entries: &mut HashMap<K, StoredEntry<V>>,
        key: K,
        incoming: Versioned<V>,
    ) -> Applied<V> {
        let previous = match entries.get(&key) {
            Some(held) if !incoming.is_newer(&held.value) => {
                trace!(
                    store = %self.name,
                    ?key,
                    held = %held.value.timestamp(),
                    offered = %incoming.timestamp(),
                    "Ignoring stale version"
                );
                metrics::record_counter(names::STORE_UPDATES_STALE, 1);
                return Applied::Stale;
            }
            Some(held) => held.value.value().clone(),
            None => None,
        };

        let applied = match (previous, incoming.value()) {
            (None, Some(value)) => Applied::Changed(Event::new(StoreEventType::Added, value.clone())),
            (Some(_), Some(value)) => {
                Applied::Changed(Event::new(StoreEventType::Updated, value.clone()))
            }
            (Some(old), None) => Applied::Changed(Event::new(StoreEventType::Removed, old)),
            (None, None) => Applied::Silent,
        };

        entries.insert(
            key,
            StoredEntry {
                value: incoming,
                recorded_at: now_millis(),
            },
        );
        metrics::record_counter(names::STORE_UPDATES_APPLIED, 1);
        applied
    }

    fn publish(&self, applied: &Applied<V>) {
        if let (Some(poster), Some(event)) = (&self.events, applied.event()) {
            // A full queue is already logged and counted by the poster.
            let _ = poster.post(event.clone());
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, StoredEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value for `key`
    pub fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).and_then(|e| e.value.value().clone())
    }

    /// Held version for `key`, tombstones included
    pub fn versioned(&self, key: &K) -> Option<Versioned<V>> {
        self.read().get(key).map(|e| e.value.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Snapshot of all live values
    pub fn all(&self) -> Vec<V> {
        self.read()
            .values()
            .filter_map(|e| e.value.value().clone())
            .collect()
    }

    /// Snapshot of live values matching `filter`
    pub fn values_where(&self, mut filter: impl FnMut(&K, &V) -> bool) -> Vec<V> {
        self.read()
            .iter()
            .filter_map(|(k, e)| e.value.value().as_ref().filter(|v| filter(k, *v)).cloned())
            .collect()
    }

    /// Snapshot of every held version, tombstones included
    pub fn entries(&self) -> HashMap<K, Versioned<V>> {
        self.read()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Per-key timestamps for an anti-entropy advertisement
    pub fn digest(&self) -> HashMap<K, EntryDigest> {
        self.read()
            .iter()
            .map(|(k, e)| {
                (
                    k.clone(),
                    EntryDigest {
                        timestamp: e.value.timestamp(),
                        tombstone: e.value.value().is_none(),
                    },
                )
            })
            .collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.read().values().filter(|e| e.value.value().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_count(&self) -> usize {
        self.read().values().filter(|e| e.value.value().is_none()).count()
    }

    /// Drop tombstones recorded before `safe_before_millis`
    ///
    /// The bound must not exceed the oldest last-successful exchange with
    /// any peer, otherwise a peer that missed the delete could re-add it.
    pub fn purge_tombstones(&self, safe_before_millis: u64) -> StoreResult<usize> {
        let mut entries = self.entries.write().map_err(handle_poison)?;
        let before = entries.len();
        entries.retain(|_, e| e.value.value().is_some() || e.recorded_at >= safe_before_millis);
        let purged = before - entries.len();
        let remaining = entries.values().filter(|e| e.value.value().is_none()).count();
        drop(entries);

        metrics::record_gauge(names::STORE_TOMBSTONES, remaining as f64);
        if purged > 0 {
            metrics::record_counter(names::STORE_TOMBSTONES_PURGED, purged as u64);
            debug!(store = %self.name, purged, remaining, "Purged tombstones");
        }
        Ok(purged)
    }
}
