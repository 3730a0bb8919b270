/*
    link_store.rs - Replicated link inventory

    Links are keyed by (src, dst) and stamped by the logical clock of the
    destination device, so only the master of that device issues new
    versions. Everything else (tombstones, anti-entropy, events) comes from
    the generic replicated store underneath.
*/

use super::errors::{StoreError, StoreResult};
use super::link::{ConnectPoint, Link, LinkDescription, LinkKey, LinkState};
use super::replicated::{
    Applied, ReplicatedStore, StoreEvent, StoreEventType, TimestampProvider, Update,
};
use crate::core_clock::{ClockError, LogicalClock, LogicalTimestamp};
use crate::ids::DeviceId;
use std::sync::Arc;
use tracing::{debug, trace};

pub type LinkEventType = StoreEventType;
pub type LinkEvent = StoreEvent<Link>;

/// Timestamps for link writes, scoped by the destination device
pub fn link_timestamps(clock: Arc<LogicalClock<DeviceId>>) -> Arc<dyn TimestampProvider<LinkKey>> {
    Arc::new(move |key: &LinkKey| -> StoreResult<LogicalTimestamp> {
        Ok(clock.timestamp(&key.dst.device)?)
    })
}

#[derive(Debug, Clone)]
pub struct LinkStore {
    store: Arc<ReplicatedStore<LinkKey, Link>>,
}

impl LinkStore {
    pub fn new(clock: Arc<LogicalClock<DeviceId>>) -> Self {
        Self::with_store(ReplicatedStore::new("links", link_timestamps(clock)))
    }

    /// Wrap a store that already has its event poster or update channel attached
    pub fn with_store(store: ReplicatedStore<LinkKey, Link>) -> Self {
        LinkStore {
            store: Arc::new(store),
        }
    }

    /// The underlying replica, for anti-entropy
    pub fn replica(&self) -> Arc<ReplicatedStore<LinkKey, Link>> {
        Arc::clone(&self.store)
    }

    /// Record a link reported by a provider
    ///
    /// Returns `None` when the report changes nothing listeners care about;
    /// in that case no new version is issued.
    pub fn create_or_update_link(
        &self,
        provider_id: &str,
        desc: LinkDescription,
    ) -> StoreResult<Option<LinkEvent>> {
        let key = desc.key();
        let applied = self.store.update_with(key.clone(), |held| match held {
            Some(existing) => {
                let merged = existing.merged_with(provider_id, desc);
                if existing.differs_from(&merged) {
                    Update::Put(merged)
                } else {
                    Update::Keep
                }
            }
            None => Update::Put(Link::from_description(provider_id, desc)),
        })?;
        if applied.is_none() {
            trace!(link = %key, "Link report carries no change");
        }
        Ok(applied.and_then(Applied::into_event))
    }

    /// Remove a link, leaving a tombstone for peers
    ///
    /// A node that is not master of the destination device cannot stamp the
    /// removal; the call is a no-op there and the master's removal wins.
    pub fn remove_link(&self, src: &ConnectPoint, dst: &ConnectPoint) -> StoreResult<Option<LinkEvent>> {
        let key = LinkKey::new(src.clone(), dst.clone());
        match self.store.remove(&key) {
            Ok(applied) => Ok(applied.into_event()),
            Err(StoreError::Clock(ClockError::TermUnavailable(device))) => {
                debug!(link = %key, %device, "Not master of destination, ignoring link removal");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a link, or mark it inactive if it is durable
    ///
    /// Like `remove_link`, a no-op on nodes that do not master the
    /// destination device.
    pub fn remove_or_down_link(
        &self,
        src: &ConnectPoint,
        dst: &ConnectPoint,
    ) -> StoreResult<Option<LinkEvent>> {
        let key = LinkKey::new(src.clone(), dst.clone());
        let result = self.store.update_with(key.clone(), |held| match held {
            None => Update::Keep,
            Some(link) if !link.durable => Update::Remove,
            Some(link) if link.state == LinkState::Inactive => Update::Keep,
            Some(link) => Update::Put(link.deactivated()),
        });
        match result {
            Ok(applied) => Ok(applied.and_then(Applied::into_event)),
            Err(StoreError::Clock(ClockError::TermUnavailable(device))) => {
                debug!(link = %key, %device, "Not master of destination, ignoring link removal");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_link(&self, src: &ConnectPoint, dst: &ConnectPoint) -> Option<Link> {
        self.store.get(&LinkKey::new(src.clone(), dst.clone()))
    }

    pub fn links(&self) -> Vec<Link> {
        self.store.all()
    }

    pub fn link_count(&self) -> usize {
        self.store.len()
    }

    /// Links leaving any port of `device`
    pub fn egress_links(&self, device: &DeviceId) -> Vec<Link> {
        self.store.values_where(|key, _| key.src.device == *device)
    }

    /// Links arriving at any port of `device`
    pub fn ingress_links(&self, device: &DeviceId) -> Vec<Link> {
        self.store.values_where(|key, _| key.dst.device == *device)
    }

    pub fn egress_links_of(&self, src: &ConnectPoint) -> Vec<Link> {
        self.store.values_where(|key, _| key.src == *src)
    }

    pub fn ingress_links_of(&self, dst: &ConnectPoint) -> Vec<Link> {
        self.store.values_where(|key, _| key.dst == *dst)
    }
}
