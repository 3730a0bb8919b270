/*
    dispatcher.rs - Queue-backed event delivery

    Producers (stores, the mastership coordinator) hold an EventPoster and
    enqueue events with try_send, so a slow subscriber can never stall a
    write path. A background task drains the queue into the listener
    registry. Shutdown deactivates the registry, stops the queue and
    delivers whatever was already queued before the task exits.
*/

use super::errors::{EventError, EventResult};
use super::listener::{EventListener, ListenerRegistry};
use crate::config::EventsConfig;
use crate::metrics::{self, names};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cloneable handle used by producers to submit events
pub struct EventPoster<E> {
    category: Arc<str>,
    tx: mpsc::Sender<E>,
}

impl<E> Clone for EventPoster<E> {
    fn clone(&self) -> Self {
        EventPoster {
            category: Arc::clone(&self.category),
            tx: self.tx.clone(),
        }
    }
}

impl<E> EventPoster<E> {
    /// Enqueue an event without waiting for delivery
    pub fn post(&self, event: E) -> EventResult<()> {
        self.tx.try_send(event).map_err(|err| {
            metrics::record_counter(names::EVENTS_DROPPED, 1);
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(category = %self.category, "Event queue full, dropping event");
                    EventError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => EventError::Closed,
            }
        })
    }
}

impl<E> fmt::Debug for EventPoster<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPoster")
            .field("category", &self.category)
            .finish()
    }
}

/// Owns the queue, the listener registry and the delivery task for one event category
pub struct EventDispatcher<E> {
    registry: Arc<ListenerRegistry<E>>,
    poster: EventPoster<E>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E> EventDispatcher<E>
where
    E: fmt::Debug + Send + Sync + 'static,
{
    /// Start a dispatcher on the current Tokio runtime
    pub fn start(
        category: impl Into<String>,
        queue_capacity: usize,
        slow_listener_threshold: Duration,
    ) -> EventResult<Self> {
        if queue_capacity == 0 {
            return Err(EventError::InvalidArgument(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| EventError::NoRuntime)?;
        let category = category.into();
        let registry = Arc::new(ListenerRegistry::with_threshold(
            category.clone(),
            slow_listener_threshold,
        ));
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = runtime.spawn(Self::run(Arc::clone(&registry), rx, stop_rx));
        info!(category = %category, queue_capacity, "Event dispatcher started");

        Ok(EventDispatcher {
            registry,
            poster: EventPoster {
                category: Arc::from(category.as_str()),
                tx,
            },
            stop_tx: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Start a dispatcher sized by the `[events]` config section
    pub fn from_config(category: impl Into<String>, config: &EventsConfig) -> EventResult<Self> {
        Self::start(category, config.queue_capacity, config.slow_listener_threshold)
    }

    async fn run(
        registry: Arc<ListenerRegistry<E>>,
        mut rx: mpsc::Receiver<E>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                next = rx.recv() => match next {
                    Some(event) => {
                        registry.dispatch(&event);
                    }
                    None => return,
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(event) = rx.recv().await {
            registry.dispatch(&event);
            drained += 1;
        }
        debug!(category = %registry.name(), drained, "Event dispatcher drained");
    }

    pub fn poster(&self) -> EventPoster<E> {
        self.poster.clone()
    }

    pub fn registry(&self) -> Arc<ListenerRegistry<E>> {
        Arc::clone(&self.registry)
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> EventResult<()> {
        self.registry.add_listener(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn EventListener<E>>) -> EventResult<()> {
        self.registry.remove_listener(listener)
    }

    /// Stop accepting events and deliver the ones already queued
    pub async fn shutdown(&self) {
        self.registry.deactivate();
        let stop = self.stop_tx.lock().ok().and_then(|mut s| s.take());
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(category = %self.registry.name(), "Event dispatcher task failed: {}", e);
            }
        }
        info!(category = %self.registry.name(), "Event dispatcher stopped");
    }
}
