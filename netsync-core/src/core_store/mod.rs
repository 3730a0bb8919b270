/*
    core_store - Replicated, versioned state

    Handles:
    - Keyed entries wrapped in logical timestamps
    - Tombstones so a stale add can never resurrect a delete
    - Change events for local and remote mutations
    - The link inventory built on top of the generic store
*/

pub mod errors;
pub mod link;
pub mod link_store;
pub mod replicated;

#[cfg(test)]
pub mod tests;

pub use errors::{StoreError, StoreResult};
pub use link::{ConnectPoint, Link, LinkDescription, LinkKey, LinkState, LinkType};
pub use link_store::{LinkEvent, LinkEventType, LinkStore};
pub use replicated::{
    Applied, EntryDigest, LocalUpdate, ReplicatedStore, StoreEvent, StoreEventType,
    TimestampProvider, Update, Versioned,
};
