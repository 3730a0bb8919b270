/*
    accumulator.rs - Size/time dual-threshold batching

    Collects items and releases them as one batch when the first of three
    thresholds is hit:
    - the batch reaches `max_events`
    - `max_idle` passes without a new item
    - `max_batch` passes since the first item of the batch

    Firing swaps the batch out under the state lock and resets all timers.
    Timers are Tokio tasks; a timer that wakes up after its batch was already
    released sees a stale generation and does nothing, so aborting a timer
    never has to win a race against it firing.
*/

use super::errors::{EventError, EventResult};
use crate::metrics::{self, names};
use std::mem;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Receives released batches
pub trait BatchProcessor<T>: Send + Sync {
    fn process_events(&self, batch: Vec<T>);
}

impl<T, F> BatchProcessor<T> for F
where
    F: Fn(Vec<T>) + Send + Sync,
{
    fn process_events(&self, batch: Vec<T>) {
        self(batch)
    }
}

/// Batching thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorLimits {
    pub max_events: usize,
    pub max_batch: Duration,
    pub max_idle: Duration,
}

impl AccumulatorLimits {
    pub fn new(max_events: usize, max_batch: Duration, max_idle: Duration) -> Self {
        AccumulatorLimits {
            max_events,
            max_batch,
            max_idle,
        }
    }

    pub fn validate(&self) -> EventResult<()> {
        if self.max_events <= 1 {
            return Err(EventError::InvalidArgument(format!(
                "max_events must be greater than 1, got {}",
                self.max_events
            )));
        }
        if self.max_batch.is_zero() {
            return Err(EventError::InvalidArgument(
                "max_batch must be positive".to_string(),
            ));
        }
        if self.max_idle.is_zero() {
            return Err(EventError::InvalidArgument(
                "max_idle must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Idle,
    MaxBatch,
}

struct BatchState<T> {
    items: Vec<T>,
    /// Bumped every time a batch is released
    batch_generation: u64,
    /// Bumped on every add; only the latest idle timer may fire
    idle_generation: u64,
    idle_timer: Option<JoinHandle<()>>,
    max_timer: Option<JoinHandle<()>>,
    shut_down: bool,
}

impl<T> BatchState<T> {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.max_timer.take() {
            timer.abort();
        }
    }

    fn take_batch(&mut self) -> Vec<T> {
        self.batch_generation += 1;
        self.cancel_timers();
        mem::take(&mut self.items)
    }
}

struct Inner<T> {
    limits: AccumulatorLimits,
    state: Mutex<BatchState<T>>,
    processor: Box<dyn BatchProcessor<T>>,
    runtime: Handle,
}

impl<T: Send + 'static> Inner<T> {
    fn process(&self, batch: Vec<T>) {
        trace!(size = batch.len(), "Releasing accumulated batch");
        metrics::record_counter(names::ACCUMULATOR_BATCHES, 1);
        metrics::record_histogram(names::ACCUMULATOR_BATCH_SIZE, batch.len() as f64);
        self.processor.process_events(batch);
    }

    fn fire(&self, kind: TimerKind, batch_generation: u64, idle_generation: u64) {
        let batch = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.batch_generation != batch_generation
                || (kind == TimerKind::Idle && state.idle_generation != idle_generation)
                || state.items.is_empty()
            {
                return;
            }
            state.take_batch()
        };
        trace!(?kind, "Accumulator timer fired");
        self.process(batch);
    }
}

/// Batches items and hands them to a [`BatchProcessor`]
pub struct EventAccumulator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventAccumulator<T> {
    fn clone(&self) -> Self {
        EventAccumulator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> EventAccumulator<T> {
    /// Create an accumulator whose timers run on the current Tokio runtime
    pub fn new(limits: AccumulatorLimits, processor: impl BatchProcessor<T> + 'static) -> EventResult<Self> {
        let runtime = Handle::try_current().map_err(|_| EventError::NoRuntime)?;
        Self::with_handle(limits, processor, runtime)
    }

    /// Create an accumulator whose timers run on the given runtime
    pub fn with_handle(
        limits: AccumulatorLimits,
        processor: impl BatchProcessor<T> + 'static,
        runtime: Handle,
    ) -> EventResult<Self> {
        limits.validate()?;
        Ok(EventAccumulator {
            inner: Arc::new(Inner {
                limits,
                state: Mutex::new(BatchState {
                    items: Vec::new(),
                    batch_generation: 0,
                    idle_generation: 0,
                    idle_timer: None,
                    max_timer: None,
                    shut_down: false,
                }),
                processor: Box::new(processor),
                runtime,
            }),
        })
    }

    pub fn limits(&self) -> AccumulatorLimits {
        self.inner.limits
    }

    /// Add an item, releasing the batch inline if it is now full
    pub fn add(&self, item: T) -> EventResult<()> {
        let ready = {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| EventError::Internal("Accumulator lock poisoned".to_string()))?;
            if state.shut_down {
                return Err(EventError::Deactivated("accumulator is shut down".to_string()));
            }
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            state.items.push(item);

            if state.items.len() >= self.inner.limits.max_events {
                Some(state.take_batch())
            } else {
                state.idle_generation += 1;
                let batch_generation = state.batch_generation;
                let idle_generation = state.idle_generation;
                state.idle_timer = Some(self.spawn_timer(
                    TimerKind::Idle,
                    batch_generation,
                    idle_generation,
                    self.inner.limits.max_idle,
                ));
                if state.items.len() == 1 {
                    state.max_timer = Some(self.spawn_timer(
                        TimerKind::MaxBatch,
                        batch_generation,
                        idle_generation,
                        self.inner.limits.max_batch,
                    ));
                }
                None
            }
        };

        if let Some(batch) = ready {
            self.inner.process(batch);
        }
        Ok(())
    }

    /// Release the pending batch now, if there is one
    pub fn flush(&self) {
        let batch = match self.inner.state.lock() {
            Ok(mut state) if !state.items.is_empty() => state.take_batch(),
            _ => return,
        };
        self.inner.process(batch);
    }

    /// Number of items waiting in the current batch
    pub fn pending(&self) -> usize {
        self.inner.state.lock().map(|s| s.items.len()).unwrap_or(0)
    }

    /// Cancel timers and discard the pending batch; further adds are rejected
    pub fn shutdown(&self) -> usize {
        let Ok(mut state) = self.inner.state.lock() else {
            return 0;
        };
        state.shut_down = true;
        let discarded = state.take_batch().len();
        if discarded > 0 {
            debug!(discarded, "Accumulator shut down with pending items");
        }
        discarded
    }

    fn spawn_timer(
        &self,
        kind: TimerKind,
        batch_generation: u64,
        idle_generation: u64,
        delay: Duration,
    ) -> JoinHandle<()> {
        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire(kind, batch_generation, idle_generation);
            }
        })
    }
}
