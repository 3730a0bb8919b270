/*
    clock.rs - Per-scope logical clock

    Issues (term, sequence) timestamps for a scope such as a device.
    The term is fed from the mastership subsystem whenever this node
    becomes master of the scope; a scope without a term cannot be stamped,
    so only the authoritative writer produces fresh versions.
*/

use super::errors::{ClockError, ClockResult};
use super::timestamp::LogicalTimestamp;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

fn handle_poison<T>(_err: PoisonError<T>) -> ClockError {
    ClockError::Internal("Lock poisoned: a thread panicked while holding the clock".to_string())
}

#[derive(Debug, Clone, Copy)]
struct ScopeState {
    term: u64,
    next_sequence: u64,
}

/// Logical clock issuing monotonic timestamps per scope
#[derive(Debug)]
pub struct LogicalClock<S> {
    scopes: Mutex<HashMap<S, ScopeState>>,
}

impl<S> LogicalClock<S>
where
    S: Eq + Hash + Clone + Display,
{
    pub fn new() -> Self {
        LogicalClock {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Record the mastership term for a scope
    ///
    /// A newer term restarts the sequence; the same term is a no-op and an
    /// older term is rejected so timestamps never go backwards.
    pub fn set_term(&self, scope: &S, term: u64) -> ClockResult<()> {
        let mut scopes = self.scopes.lock().map_err(handle_poison)?;
        match scopes.get_mut(scope) {
            Some(state) if term < state.term => Err(ClockError::StaleTerm {
                scope: scope.to_string(),
                current: state.term,
                requested: term,
            }),
            Some(state) if term == state.term => Ok(()),
            Some(state) => {
                *state = ScopeState {
                    term,
                    next_sequence: 0,
                };
                Ok(())
            }
            None => {
                scopes.insert(
                    scope.clone(),
                    ScopeState {
                        term,
                        next_sequence: 0,
                    },
                );
                Ok(())
            }
        }
    }

    /// Issue the next timestamp for a scope
    pub fn timestamp(&self, scope: &S) -> ClockResult<LogicalTimestamp> {
        let mut scopes = self.scopes.lock().map_err(handle_poison)?;
        let state = scopes
            .get_mut(scope)
            .ok_or_else(|| ClockError::TermUnavailable(scope.to_string()))?;
        let timestamp = LogicalTimestamp::new(state.term, state.next_sequence);
        state.next_sequence += 1;
        Ok(timestamp)
    }

    pub fn is_timestamp_available(&self, scope: &S) -> bool {
        self.term(scope).is_some()
    }

    pub fn term(&self, scope: &S) -> Option<u64> {
        self.scopes
            .lock()
            .ok()
            .and_then(|scopes| scopes.get(scope).map(|s| s.term))
    }

    /// Forget a scope, e.g. after losing mastership
    pub fn clear(&self, scope: &S) {
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.remove(scope);
        }
    }
}

impl<S> Default for LogicalClock<S>
where
    S: Eq + Hash + Clone + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
