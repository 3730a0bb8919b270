//! Immutable change event

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A change notification: when it happened, what kind of change, and to what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<T, S> {
    time: u64,
    kind: T,
    subject: S,
}

impl<T, S> Event<T, S> {
    /// Create an event stamped with the current wall-clock time
    pub fn new(kind: T, subject: S) -> Self {
        Self::with_time(kind, subject, now_millis())
    }

    /// Create an event with an explicit time (replayed or remote events)
    pub fn with_time(kind: T, subject: S, time: u64) -> Self {
        Event {
            time,
            kind,
            subject,
        }
    }

    /// Wall-clock milliseconds since the Unix epoch
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn kind(&self) -> &T {
        &self.kind
    }

    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn into_subject(self) -> S {
        self.subject
    }
}

impl<T: fmt::Debug, S: fmt::Debug> fmt::Display for Event<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{} {:?}", self.kind, self.time, self.subject)
    }
}
