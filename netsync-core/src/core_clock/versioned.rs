/*
    versioned.rs - Value paired with a logical timestamp

    Conflicts are resolved by taking the value with the newer timestamp.
    Unlike a last-write-wins register there is no secondary tiebreaker:
    equal timestamps mean the same write, and the incoming copy is ignored.
*/

use super::timestamp::LogicalTimestamp;
use serde::{Deserialize, Serialize};

/// A value stamped with the logical time it was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue<T> {
    value: T,
    timestamp: LogicalTimestamp,
}

impl<T> VersionedValue<T> {
    pub fn new(value: T, timestamp: LogicalTimestamp) -> Self {
        VersionedValue { value, timestamp }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> LogicalTimestamp {
        self.timestamp
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Whether this version should replace `other`
    pub fn is_newer(&self, other: &VersionedValue<T>) -> bool {
        self.timestamp.is_newer_than(&other.timestamp)
    }

    /// Whether this version is newer than a bare timestamp (e.g. from a digest)
    pub fn is_newer_than(&self, timestamp: &LogicalTimestamp) -> bool {
        self.timestamp.is_newer_than(timestamp)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VersionedValue<U> {
        VersionedValue {
            value: f(self.value),
            timestamp: self.timestamp,
        }
    }
}
