//! Cluster-wide network-state synchronization core.
//!
//! Keeps a replicated view of infrastructure state consistent across
//! controller instances:
//! - [`core_clock`] orders concurrent updates with term + sequence timestamps
//! - [`core_store`] holds versioned, tombstone-aware replicated entries
//! - [`core_sync`] reconciles replicas through anti-entropy gossip
//! - [`core_mastership`] assigns one master node per managed device
//! - [`core_event`] batches and fans out change notifications

pub mod config;
pub mod core_clock;
pub mod core_event;
pub mod core_mastership;
pub mod core_store;
pub mod core_sync;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use ids::{DeviceId, NodeId};
pub use logging::{init_logging, LogLevel};
