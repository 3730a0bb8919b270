//! Roles, role records and mastership events

use crate::core_event::Event;
use crate::ids::{DeviceId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a node with respect to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MastershipRole {
    Master,
    Standby,
    None,
}

impl fmt::Display for MastershipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MastershipRole::Master => "MASTER",
            MastershipRole::Standby => "STANDBY",
            MastershipRole::None => "NONE",
        };
        write!(f, "{}", s)
    }
}

/// Current master and backups of a device, backups in preference order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub master: Option<NodeId>,
    pub backups: Vec<NodeId>,
}

impl RoleInfo {
    /// Master first, then backups
    pub fn nodes(&self) -> Vec<NodeId> {
        self.master
            .iter()
            .chain(self.backups.iter())
            .cloned()
            .collect()
    }
}

/// Master of a device together with the term it was elected in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastershipTerm {
    pub master: Option<NodeId>,
    pub term: u64,
}

/// Authoritative role assignment for one device
///
/// The term counts how many times a master has been elected for the
/// device. A node never appears both as master and as a backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub master: Option<NodeId>,
    pub backups: Vec<NodeId>,
    pub term: u64,
}

impl RoleRecord {
    pub fn role_of(&self, node: &NodeId) -> MastershipRole {
        if self.master.as_ref() == Some(node) {
            MastershipRole::Master
        } else if self.backups.contains(node) {
            MastershipRole::Standby
        } else {
            MastershipRole::None
        }
    }

    pub fn info(&self) -> RoleInfo {
        RoleInfo {
            master: self.master.clone(),
            backups: self.backups.clone(),
        }
    }

    pub fn mastership_term(&self) -> MastershipTerm {
        MastershipTerm {
            master: self.master.clone(),
            term: self.term,
        }
    }

    /// Make `node` master under a new term, demoting the old master to first backup
    pub(crate) fn elect(&mut self, node: &NodeId) {
        self.backups.retain(|n| n != node);
        if let Some(previous) = self.master.take() {
            self.backups.insert(0, previous);
        }
        self.master = Some(node.clone());
        self.term += 1;
    }

    /// Drop the current master and promote the first backup, if any
    pub(crate) fn reelect(&mut self) {
        self.master = None;
        if !self.backups.is_empty() {
            let next = self.backups.remove(0);
            self.master = Some(next);
            self.term += 1;
        }
    }

    /// Kind of event that turns `self` into `next`, if anything visible changed
    pub(crate) fn change_to(&self, next: &RoleRecord) -> Option<MastershipEventType> {
        if self.master != next.master || self.term != next.term {
            Some(MastershipEventType::MasterChanged)
        } else if self.backups != next.backups {
            Some(MastershipEventType::BackupsChanged)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MastershipEventType {
    MasterChanged,
    BackupsChanged,
}

/// Device whose roles changed and the roles it ended up with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastershipSubject {
    pub device: DeviceId,
    pub roles: RoleInfo,
    pub term: u64,
}

pub type MastershipEvent = Event<MastershipEventType, MastershipSubject>;
