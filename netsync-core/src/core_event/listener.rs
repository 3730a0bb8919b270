/*
    listener.rs - Listener registry with failure isolation

    The listener set is copy-on-write: dispatch clones an Arc of the
    current list and iterates it without holding the lock, so adds and
    removes never wait on a slow listener and never invalidate an
    in-progress iteration.

    A listener that panics is logged and skipped; the remaining listeners
    still receive the event and the caller of dispatch never sees the
    failure. Once deactivated the registry stops reporting failures.
*/

use super::errors::{EventError, EventResult};
use crate::metrics::{self, names};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Subscriber to events of type `E`
pub trait EventListener<E>: Send + Sync {
    fn event(&self, event: &E);

    /// Filter applied before delivery
    fn is_relevant(&self, _event: &E) -> bool {
        true
    }
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn event(&self, event: &E) {
        self(event)
    }
}

type ListenerList<E> = Arc<Vec<Arc<dyn EventListener<E>>>>;

fn same_listener<E>(a: &Arc<dyn EventListener<E>>, b: &Arc<dyn EventListener<E>>) -> bool {
    // Compare data pointers only; vtable pointers are not guaranteed unique.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Set of listeners for one event category
pub struct ListenerRegistry<E> {
    name: String,
    listeners: RwLock<ListenerList<E>>,
    deactivated: AtomicBool,
    slow_listener_threshold: Duration,
}

impl<E: fmt::Debug> ListenerRegistry<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_threshold(name, Duration::from_secs(1))
    }

    /// Registry that warns about listeners slower than `slow_listener_threshold`
    pub fn with_threshold(name: impl Into<String>, slow_listener_threshold: Duration) -> Self {
        ListenerRegistry {
            name: name.into(),
            listeners: RwLock::new(Arc::new(Vec::new())),
            deactivated: AtomicBool::new(false),
            slow_listener_threshold,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener; adding the same listener twice is a no-op
    pub fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> EventResult<()> {
        if self.is_deactivated() {
            return Err(EventError::Deactivated(format!(
                "registry {} is shutting down",
                self.name
            )));
        }
        let mut guard = self
            .listeners
            .write()
            .map_err(|_| EventError::Internal("Listener lock poisoned".to_string()))?;
        if guard.iter().any(|l| same_listener(l, &listener)) {
            return Ok(());
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn remove_listener(&self, listener: &Arc<dyn EventListener<E>>) -> EventResult<()> {
        let mut guard = self
            .listeners
            .write()
            .map_err(|_| EventError::Internal("Listener lock poisoned".to_string()))?;
        if !guard.iter().any(|l| same_listener(l, listener)) {
            return Err(EventError::NotRegistered);
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Deliver an event to every relevant listener, returning how many handled it
    pub fn dispatch(&self, event: &E) -> usize {
        let mut delivered = 0;
        for listener in self.snapshot().iter() {
            if !listener.is_relevant(event) {
                continue;
            }
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.event(event)));
            let elapsed = started.elapsed();
            metrics::record_histogram(names::LISTENER_DURATION, elapsed.as_secs_f64() * 1000.0);

            match outcome {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    if self.is_deactivated() {
                        continue;
                    }
                    metrics::record_counter(names::LISTENER_FAILURES, 1);
                    error!(
                        registry = %self.name,
                        ?event,
                        "Listener failed: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }

            if elapsed > self.slow_listener_threshold && !self.is_deactivated() {
                warn!(
                    registry = %self.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Listener exceeded dispatch time threshold"
                );
            }
        }
        metrics::record_counter(names::EVENTS_DISPATCHED, 1);
        delivered
    }

    /// Mark the registry as shutting down; failures are no longer reported
    pub fn deactivate(&self) {
        self.deactivated.store(true, Ordering::SeqCst);
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> ListenerList<E> {
        match self.listeners.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}
