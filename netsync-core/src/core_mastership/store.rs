/*
    store.rs - Authoritative role store

    Every device maps to one versioned RoleRecord. A record is only ever
    replaced by a newer one: local changes stamp the new record with
    (term, previous sequence + 1) and remote records go through the same
    timestamp comparison, so a stale role change can never overwrite a
    newer assignment.

    All mutations of one device happen under the map's write lock, which
    is what keeps at most one master per device.
*/

use super::errors::{handle_poison, MastershipResult};
use super::role::{
    MastershipEvent, MastershipRole, MastershipSubject, MastershipTerm, RoleInfo, RoleRecord,
};
use crate::core_clock::{LogicalTimestamp, VersionedValue};
use crate::core_event::Event;
use crate::ids::{DeviceId, NodeId};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Authoritative record of who masters which device
///
/// Mutations return the event describing the change, or `None` when the
/// request left the assignment as it was.
pub trait MastershipStore: Send + Sync {
    fn role_for(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<MastershipRole>;

    fn master(&self, device: &DeviceId) -> MastershipResult<Option<NodeId>>;

    fn nodes(&self, device: &DeviceId) -> MastershipResult<RoleInfo>;

    fn term(&self, device: &DeviceId) -> MastershipResult<Option<MastershipTerm>>;

    /// Devices mastered by `node`
    fn resources_of(&self, node: &NodeId) -> MastershipResult<Vec<DeviceId>>;

    fn set_master(&self, node: &NodeId, device: &DeviceId)
        -> MastershipResult<Option<MastershipEvent>>;

    fn set_standby(&self, node: &NodeId, device: &DeviceId)
        -> MastershipResult<Option<MastershipEvent>>;

    fn relinquish_role(
        &self,
        node: &NodeId,
        device: &DeviceId,
    ) -> MastershipResult<Option<MastershipEvent>>;

    /// Claim a masterless device, otherwise join its backups
    fn request_role(
        &self,
        node: &NodeId,
        device: &DeviceId,
    ) -> MastershipResult<(MastershipRole, Option<MastershipEvent>)>;

    /// Versioned record for replication to other instances
    fn record(&self, device: &DeviceId) -> MastershipResult<Option<VersionedValue<RoleRecord>>>;

    /// Install a record received from another instance if it is newer
    fn apply_record(
        &self,
        device: &DeviceId,
        record: VersionedValue<RoleRecord>,
    ) -> MastershipResult<Option<MastershipEvent>>;
}

/// Role store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryMastershipStore {
    records: RwLock<HashMap<DeviceId, VersionedValue<RoleRecord>>>,
}

fn event_for(
    device: &DeviceId,
    before: &RoleRecord,
    after: &RoleRecord,
) -> Option<MastershipEvent> {
    before.change_to(after).map(|kind| {
        Event::new(
            kind,
            MastershipSubject {
                device: device.clone(),
                roles: after.info(),
                term: after.term,
            },
        )
    })
}

impl InMemoryMastershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_record<R>(&self, device: &DeviceId, f: impl FnOnce(&RoleRecord) -> R) -> MastershipResult<R> {
        let records = self.records.read().map_err(handle_poison)?;
        let empty = RoleRecord::default();
        Ok(f(records.get(device).map(|v| v.value()).unwrap_or(&empty)))
    }

    /// Apply `f` to the device's record and store the result if it changed
    fn mutate<R>(
        &self,
        device: &DeviceId,
        f: impl FnOnce(&mut RoleRecord) -> R,
    ) -> MastershipResult<(R, Option<MastershipEvent>)> {
        let mut records = self.records.write().map_err(handle_poison)?;
        let (before, sequence) = match records.get(device) {
            Some(current) => (current.value().clone(), current.timestamp().sequence() + 1),
            None => (RoleRecord::default(), 0),
        };

        let mut after = before.clone();
        let result = f(&mut after);
        let event = event_for(device, &before, &after);
        if event.is_some() {
            let timestamp = LogicalTimestamp::new(after.term, sequence);
            records.insert(device.clone(), VersionedValue::new(after, timestamp));
        }
        Ok((result, event))
    }
}

impl MastershipStore for InMemoryMastershipStore {
    fn role_for(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<MastershipRole> {
        self.read_record(device, |r| r.role_of(node))
    }

    fn master(&self, device: &DeviceId) -> MastershipResult<Option<NodeId>> {
        self.read_record(device, |r| r.master.clone())
    }

    fn nodes(&self, device: &DeviceId) -> MastershipResult<RoleInfo> {
        self.read_record(device, RoleRecord::info)
    }

    fn term(&self, device: &DeviceId) -> MastershipResult<Option<MastershipTerm>> {
        let records = self.records.read().map_err(handle_poison)?;
        Ok(records.get(device).map(|v| v.value().mastership_term()))
    }

    fn resources_of(&self, node: &NodeId) -> MastershipResult<Vec<DeviceId>> {
        let records = self.records.read().map_err(handle_poison)?;
        let mut devices: Vec<DeviceId> = records
            .iter()
            .filter(|(_, v)| v.value().master.as_ref() == Some(node))
            .map(|(d, _)| d.clone())
            .collect();
        devices.sort();
        Ok(devices)
    }

    fn set_master(
        &self,
        node: &NodeId,
        device: &DeviceId,
    ) -> MastershipResult<Option<MastershipEvent>> {
        let (_, event) = self.mutate(device, |record| {
            if record.master.as_ref() != Some(node) {
                record.elect(node);
            }
        })?;
        Ok(event)
    }

    fn set_standby(
        &self,
        node: &NodeId,
        device: &DeviceId,
    ) -> MastershipResult<Option<MastershipEvent>> {
        let (_, event) = self.mutate(device, |record| match record.role_of(node) {
            MastershipRole::Master => {
                record.reelect();
                record.backups.push(node.clone());
            }
            MastershipRole::Standby => {}
            MastershipRole::None => record.backups.push(node.clone()),
        })?;
        Ok(event)
    }

    fn relinquish_role(
        &self,
        node: &NodeId,
        device: &DeviceId,
    ) -> MastershipResult<Option<MastershipEvent>> {
        let (_, event) = self.mutate(device, |record| match record.role_of(node) {
            MastershipRole::Master => record.reelect(),
            MastershipRole::Standby => record.backups.retain(|n| n != node),
            MastershipRole::None => {}
        })?;
        Ok(event)
    }

    fn request_role(
        &self,
        node: &NodeId,
        device: &DeviceId,
    ) -> MastershipResult<(MastershipRole, Option<MastershipEvent>)> {
        self.mutate(device, |record| match record.role_of(node) {
            MastershipRole::None if record.master.is_none() => {
                record.elect(node);
                MastershipRole::Master
            }
            MastershipRole::None => {
                record.backups.push(node.clone());
                MastershipRole::Standby
            }
            held => held,
        })
    }

    fn record(&self, device: &DeviceId) -> MastershipResult<Option<VersionedValue<RoleRecord>>> {
        let records = self.records.read().map_err(handle_poison)?;
        Ok(records.get(device).cloned())
    }

    fn apply_record(
        &self,
        device: &DeviceId,
        record: VersionedValue<RoleRecord>,
    ) -> MastershipResult<Option<MastershipEvent>> {
        let mut records = self.records.write().map_err(handle_poison)?;
        let before = match records.get(device) {
            Some(current) if !record.is_newer(current) => {
                debug!(
                    device = %device,
                    incoming = %record.timestamp(),
                    held = %current.timestamp(),
                    "Ignoring stale role record"
                );
                return Ok(None);
            }
            Some(current) => current.value().clone(),
            None => RoleRecord::default(),
        };
        let event = event_for(device, &before, record.value());
        records.insert(device.clone(), record);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_mastership::role::MastershipEventType;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    fn dev() -> DeviceId {
        DeviceId::new("of:1")
    }

    #[test]
    fn test_unknown_device_has_no_master() {
        let store = InMemoryMastershipStore::new();
        assert_eq!(store.master(&dev()).unwrap(), None);
        assert_eq!(store.term(&dev()).unwrap(), None);
        assert_eq!(store.role_for(&node("a"), &dev()).unwrap(), MastershipRole::None);
        assert!(store.nodes(&dev()).unwrap().nodes().is_empty());
    }

    #[test]
    fn test_set_master_emits_once() {
        let store = InMemoryMastershipStore::new();
        let event = store.set_master(&node("a"), &dev()).unwrap().unwrap();
        assert_eq!(*event.kind(), MastershipEventType::MasterChanged);
        assert_eq!(event.subject().term, 1);

        assert!(store.set_master(&node("a"), &dev()).unwrap().is_none());
        assert_eq!(store.term(&dev()).unwrap().unwrap().term, 1);
    }

    #[test]
    fn test_request_role_claims_then_queues() {
        let store = InMemoryMastershipStore::new();
        let (role, event) = store.request_role(&node("a"), &dev()).unwrap();
        assert_eq!(role, MastershipRole::Master);
        assert!(event.is_some());

        let (role, event) = store.request_role(&node("b"), &dev()).unwrap();
        assert_eq!(role, MastershipRole::Standby);
        assert_eq!(*event.unwrap().kind(), MastershipEventType::BackupsChanged);

        let (role, event) = store.request_role(&node("b"), &dev()).unwrap();
        assert_eq!(role, MastershipRole::Standby);
        assert!(event.is_none());
    }

    #[test]
    fn test_standby_of_master_promotes_backup() {
        let store = InMemoryMastershipStore::new();
        store.set_master(&node("a"), &dev()).unwrap();
        store.set_standby(&node("b"), &dev()).unwrap();

        let event = store.set_standby(&node("a"), &dev()).unwrap().unwrap();
        assert_eq!(*event.kind(), MastershipEventType::MasterChanged);

        let info = store.nodes(&dev()).unwrap();
        assert_eq!(info.master, Some(node("b")));
        assert_eq!(info.backups, vec![node("a")]);
        assert_eq!(store.term(&dev()).unwrap().unwrap().term, 2);
    }

    #[test]
    fn test_relinquish_last_master_leaves_device_masterless() {
        let store = InMemoryMastershipStore::new();
        store.set_master(&node("a"), &dev()).unwrap();

        let event = store.relinquish_role(&node("a"), &dev()).unwrap().unwrap();
        assert_eq!(event.subject().roles.master, None);
        assert_eq!(store.master(&dev()).unwrap(), None);
        assert!(store.relinquish_role(&node("a"), &dev()).unwrap().is_none());
    }

    #[test]
    fn test_resources_of_lists_mastered_devices() {
        let store = InMemoryMastershipStore::new();
        store.set_master(&node("a"), &DeviceId::new("of:2")).unwrap();
        store.set_master(&node("a"), &DeviceId::new("of:1")).unwrap();
        store.set_standby(&node("a"), &DeviceId::new("of:3")).unwrap();

        assert_eq!(
            store.resources_of(&node("a")).unwrap(),
            vec![DeviceId::new("of:1"), DeviceId::new("of:2")]
        );
    }

    #[test]
    fn test_stale_record_rejected() {
        let leader = InMemoryMastershipStore::new();
        leader.set_master(&node("a"), &dev()).unwrap();
        let old = leader.record(&dev()).unwrap().unwrap();
        leader.set_master(&node("b"), &dev()).unwrap();
        let new = leader.record(&dev()).unwrap().unwrap();

        let follower = InMemoryMastershipStore::new();
        assert!(follower.apply_record(&dev(), new.clone()).unwrap().is_some());
        assert!(follower.apply_record(&dev(), old).unwrap().is_none());
        assert!(follower.apply_record(&dev(), new).unwrap().is_none());
        assert_eq!(follower.master(&dev()).unwrap(), Some(node("b")));
    }
}
