/*
    core_clock - Logical time for conflict resolution

    Every replicated value carries a (term, sequence) timestamp. The term is
    the mastership term of the scope that issued it, the sequence is a
    per-scope counter within that term. Comparing two timestamps is the
    only conflict-resolution rule in the system.
*/

pub mod clock;
pub mod errors;
pub mod timestamp;
pub mod versioned;

pub use clock::LogicalClock;
pub use errors::{ClockError, ClockResult};
pub use timestamp::LogicalTimestamp;
pub use versioned::VersionedValue;
