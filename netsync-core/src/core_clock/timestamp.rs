/*
    timestamp.rs - Term + sequence logical timestamp

    Total order: compare term first, then sequence. Two timestamps issued
    under different terms are ordered by term number alone, which is the
    tie-break between concurrently elected masters.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical timestamp used to order versions of the same value
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogicalTimestamp {
    // Field order matters: the derived Ord is lexicographic.
    term: u64,
    sequence: u64,
}

impl LogicalTimestamp {
    pub fn new(term: u64, sequence: u64) -> Self {
        LogicalTimestamp { term, sequence }
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Strictly newer; equal timestamps are not newer so re-applying is a no-op
    pub fn is_newer_than(&self, other: &LogicalTimestamp) -> bool {
        self > other
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term, self.sequence)
    }
}
