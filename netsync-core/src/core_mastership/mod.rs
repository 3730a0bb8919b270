/*
    core_mastership - Single-writer role assignment per device

    Handles:
    - Role records (master, ordered backups, term) per device
    - The authoritative store deciding which role changes are accepted
    - The coordinator that validates requests, posts role events and
      feeds new terms into the logical clock
*/

pub mod coordinator;
pub mod errors;
pub mod role;
pub mod store;

#[cfg(test)]
pub mod tests;

pub use coordinator::MastershipCoordinator;
pub use errors::{MastershipError, MastershipResult};
pub use role::{
    MastershipEvent, MastershipEventType, MastershipRole, MastershipSubject, MastershipTerm,
    RoleInfo, RoleRecord,
};
pub use store::{InMemoryMastershipStore, MastershipStore};
