/*
    core_event - Change notifications

    Handles:
    - Immutable (time, kind, subject) events
    - Size/time batching of event streams
    - Listener registration with per-listener failure isolation
    - Queue-backed dispatch so producers never wait on subscribers
*/

pub mod accumulator;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod listener;

pub use accumulator::{AccumulatorLimits, BatchProcessor, EventAccumulator};
pub use dispatcher::{EventDispatcher, EventPoster};
pub use errors::{EventError, EventResult};
pub use event::Event;
pub use listener::{EventListener, ListenerRegistry};
