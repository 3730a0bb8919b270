/*
    coordinator.rs - Mastership coordinator

    Front door for role changes. Requests are validated here and decided
    by the MastershipStore; the coordinator never edits roles itself.
    Every accepted change is posted as exactly one MastershipEvent, and the
    logical clock follows the local node's mastership: a device the local
    node masters gets the new term, any other device loses its term so no
    fresh timestamps are issued for it.

    Changes made through one coordinator are decided and published under
    its own lock, so the clock and the event queue see them in the order
    the store applied them.

    Provider reports (role_changed) that fail to persist are dropped with
    a warning. The provider re-asserts roles periodically, which heals the
    gap without retries here.
*/

use super::errors::{MastershipError, MastershipResult};
use super::role::{MastershipEvent, MastershipRole, MastershipTerm, RoleInfo, RoleRecord};
use super::store::MastershipStore;
use crate::core_clock::{LogicalClock, VersionedValue};
use crate::core_event::EventPoster;
use crate::ids::{DeviceId, NodeId};
use crate::metrics::{self, names};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub struct MastershipCoordinator {
    local: NodeId,
    store: Arc<dyn MastershipStore>,
    clock: Option<Arc<LogicalClock<DeviceId>>>,
    poster: Option<EventPoster<MastershipEvent>>,
    ordering: Mutex<()>,
}

impl fmt::Debug for MastershipCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MastershipCoordinator")
            .field("local", &self.local)
            .field("clock", &self.clock.is_some())
            .field("poster", &self.poster)
            .finish()
    }
}

fn validate(node: &NodeId, device: &DeviceId) -> MastershipResult<()> {
    if node.as_str().is_empty() {
        return Err(MastershipError::InvalidArgument(
            "node id must not be empty".to_string(),
        ));
    }
    if device.as_str().is_empty() {
        return Err(MastershipError::InvalidArgument(
            "device id must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl MastershipCoordinator {
    pub fn new(local: NodeId, store: Arc<dyn MastershipStore>) -> Self {
        MastershipCoordinator {
            local,
            store,
            clock: None,
            poster: None,
            ordering: Mutex::new(()),
        }
    }

    /// Keep `clock` terms in step with the local node's mastership
    pub fn with_clock(mut self, clock: Arc<LogicalClock<DeviceId>>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_event_poster(mut self, poster: EventPoster<MastershipEvent>) -> Self {
        self.poster = Some(poster);
        self
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    /// Assign `role` to `node` for `device`
    pub fn set_role(
        &self,
        node: &NodeId,
        device: &DeviceId,
        role: MastershipRole,
    ) -> MastershipResult<Option<MastershipEvent>> {
        validate(node, device)?;
        let _ordered = self.ordered();
        let event = match role {
            MastershipRole::Master => self.store.set_master(node, device)?,
            MastershipRole::Standby => self.store.set_standby(node, device)?,
            MastershipRole::None => self.store.relinquish_role(node, device)?,
        };
        if event.is_none() {
            debug!(node = %node, device = %device, %role, "Role unchanged");
        }
        Ok(self.publish(event))
    }

    /// Role reported by a provider; failures are logged and dropped
    pub fn role_changed(&self, node: &NodeId, device: &DeviceId, role: MastershipRole) {
        if let Err(e) = self.set_role(node, device, role) {
            metrics::record_counter(names::MASTERSHIP_REJECTED, 1);
            warn!(
                node = %node,
                device = %device,
                %role,
                error = %e,
                "Failed to record reported role change"
            );
        }
    }

    /// Current master, `None` when the device has none or is unknown
    pub fn get_master_for(&self, device: &DeviceId) -> MastershipResult<Option<NodeId>> {
        self.store.master(device)
    }

    /// Ask for a role for the local node and return the role it now holds
    pub fn request_role_for(&self, device: &DeviceId) -> MastershipResult<MastershipRole> {
        validate(&self.local, device)?;
        let _ordered = self.ordered();
        let (role, event) = self.store.request_role(&self.local, device)?;
        self.publish(event);
        Ok(role)
    }

    pub fn local_role(&self, device: &DeviceId) -> MastershipResult<MastershipRole> {
        self.store.role_for(&self.local, device)
    }

    pub fn get_nodes_for(&self, device: &DeviceId) -> MastershipResult<RoleInfo> {
        self.store.nodes(device)
    }

    pub fn get_term_for(&self, device: &DeviceId) -> MastershipResult<Option<MastershipTerm>> {
        self.store.term(device)
    }

    pub fn resources_of(&self, node: &NodeId) -> MastershipResult<Vec<DeviceId>> {
        self.store.resources_of(node)
    }

    /// Give up whatever role the local node holds for `device`
    pub fn relinquish_mastership(
        &self,
        device: &DeviceId,
    ) -> MastershipResult<Option<MastershipEvent>> {
        self.set_role(&self.local, device, MastershipRole::None)
    }

    /// Install a role record replicated from another instance
    pub fn apply_record(
        &self,
        device: &DeviceId,
        record: VersionedValue<RoleRecord>,
    ) -> MastershipResult<Option<MastershipEvent>> {
        let _ordered = self.ordered();
        let event = self.store.apply_record(device, record)?;
        Ok(self.publish(event))
    }

    fn ordered(&self) -> MutexGuard<'_, ()> {
        self.ordering.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the ordering lock
    fn publish(&self, event: Option<MastershipEvent>) -> Option<MastershipEvent> {
        let event = event?;
        let subject = event.subject();
        metrics::record_counter(names::MASTERSHIP_CHANGES, 1);
        info!(
            device = %subject.device,
            kind = ?event.kind(),
            master = ?subject.roles.master,
            term = subject.term,
            "Mastership changed"
        );

        self.follow_term(&subject.device, subject.roles.master.as_ref(), subject.term);
        if let Some(poster) = &self.poster {
            if let Err(e) = poster.post(event.clone()) {
                debug!(device = %subject.device, error = %e, "Mastership event not posted");
            }
        }
        Some(event)
    }

    fn follow_term(&self, device: &DeviceId, master: Option<&NodeId>, term: u64) {
        let Some(clock) = &self.clock else {
            return;
        };
        if master == Some(&self.local) {
            if let Err(e) = clock.set_term(device, term) {
                warn!(device = %device, term, error = %e, "Clock rejected mastership term");
            }
        } else {
            clock.clear(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_clock::LogicalTimestamp;
    use crate::core_mastership::store::InMemoryMastershipStore;
    use crate::core_mastership::MastershipEventType;

    fn coordinator(local: &str) -> (MastershipCoordinator, Arc<LogicalClock<DeviceId>>) {
        let clock = Arc::new(LogicalClock::new());
        let coordinator = MastershipCoordinator::new(
            NodeId::new(local),
            Arc::new(InMemoryMastershipStore::new()),
        )
        .with_clock(clock.clone());
        (coordinator, clock)
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let (c, _) = coordinator("a");
        let result = c.set_role(&NodeId::new(""), &DeviceId::new("of:1"), MastershipRole::Master);
        assert!(matches!(result, Err(MastershipError::InvalidArgument(_))));

        let result = c.set_role(&NodeId::new("a"), &DeviceId::new(""), MastershipRole::Master);
        assert!(matches!(result, Err(MastershipError::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_device_has_no_master() {
        let (c, _) = coordinator("a");
        assert_eq!(c.get_master_for(&DeviceId::new("nowhere")).unwrap(), None);
        assert_eq!(c.local_role(&DeviceId::new("nowhere")).unwrap(), MastershipRole::None);
    }

    #[test]
    fn test_becoming_master_sets_clock_term() {
        let (c, clock) = coordinator("a");
        let dev = DeviceId::new("of:1");

        assert_eq!(c.request_role_for(&dev).unwrap(), MastershipRole::Master);
        assert_eq!(clock.timestamp(&dev).unwrap(), LogicalTimestamp::new(1, 0));

        let event = c
            .set_role(&NodeId::new("b"), &dev, MastershipRole::Master)
            .unwrap()
            .unwrap();
        assert_eq!(*event.kind(), MastershipEventType::MasterChanged);
        assert!(!clock.is_timestamp_available(&dev));
        assert_eq!(c.local_role(&dev).unwrap(), MastershipRole::Standby);

        c.set_role(&NodeId::new("a"), &dev, MastershipRole::Master).unwrap();
        assert_eq!(clock.timestamp(&dev).unwrap(), LogicalTimestamp::new(3, 0));
    }

    #[test]
    fn test_noop_role_change_returns_none() {
        let (c, _) = coordinator("a");
        let dev = DeviceId::new("of:1");
        assert!(c.set_role(&NodeId::new("a"), &dev, MastershipRole::Master).unwrap().is_some());
        assert!(c.set_role(&NodeId::new("a"), &dev, MastershipRole::Master).unwrap().is_none());
        assert!(c.set_role(&NodeId::new("z"), &dev, MastershipRole::None).unwrap().is_none());
    }

    #[test]
    fn test_relinquish_mastership() {
        let (c, clock) = coordinator("a");
        let dev = DeviceId::new("of:1");
        c.request_role_for(&dev).unwrap();
        c.set_role(&NodeId::new("b"), &dev, MastershipRole::Standby).unwrap();

        c.relinquish_mastership(&dev).unwrap();

        assert_eq!(c.get_master_for(&dev).unwrap(), Some(NodeId::new("b")));
        assert_eq!(c.get_term_for(&dev).unwrap().unwrap().term, 2);
        assert!(c.get_nodes_for(&dev).unwrap().backups.is_empty());
        assert!(!clock.is_timestamp_available(&dev));
        assert!(c.resources_of(&NodeId::new("a")).unwrap().is_empty());
    }
}
