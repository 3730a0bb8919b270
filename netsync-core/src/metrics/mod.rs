//! Metrics for replication, anti-entropy, mastership and event delivery
//!
//! Recording goes through the `metrics` facade; with no recorder installed
//! every call is a no-op, so the core never depends on an exporter.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use crate::config::MetricsConfig;
use std::time::Instant;

/// Metric names
pub mod names {
    pub const STORE_UPDATES_APPLIED: &str = "store.updates.applied";
    pub const STORE_UPDATES_STALE: &str = "store.updates.stale";
    pub const STORE_TOMBSTONES_PURGED: &str = "store.tombstones.purged";
    pub const STORE_TOMBSTONES: &str = "store.tombstones.count";

    pub const AE_ADVERTISEMENTS_SENT: &str = "anti_entropy.advertisements.sent";
    pub const AE_ADVERTISEMENTS_RECEIVED: &str = "anti_entropy.advertisements.received";
    pub const AE_REPLIES_SENT: &str = "anti_entropy.replies.sent";
    pub const AE_REPLIES_RECEIVED: &str = "anti_entropy.replies.received";
    pub const AE_SEND_FAILURES: &str = "anti_entropy.send.failures";
    pub const AE_ROUND_DURATION: &str = "anti_entropy.round.duration_ms";

    pub const MASTERSHIP_CHANGES: &str = "mastership.role_changes";
    pub const MASTERSHIP_REJECTED: &str = "mastership.requests.rejected";

    pub const EVENTS_DISPATCHED: &str = "events.dispatched";
    pub const EVENTS_DROPPED: &str = "events.dropped";
    pub const LISTENER_FAILURES: &str = "events.listener.failures";
    pub const LISTENER_DURATION: &str = "events.listener.duration_ms";

    pub const ACCUMULATOR_BATCHES: &str = "accumulator.batches";
    pub const ACCUMULATOR_BATCH_SIZE: &str = "accumulator.batch.size";
}

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Store metrics
    describe_counter!(names::STORE_UPDATES_APPLIED, "Versioned updates accepted by replicated stores");
    describe_counter!(names::STORE_UPDATES_STALE, "Versioned updates ignored because they were not newer");
    describe_counter!(names::STORE_TOMBSTONES_PURGED, "Tombstones garbage-collected after a safe interval");
    describe_gauge!(names::STORE_TOMBSTONES, "Tombstones currently retained");

    // Anti-entropy metrics
    describe_counter!(names::AE_ADVERTISEMENTS_SENT, "Anti-entropy advertisements sent to peers");
    describe_counter!(names::AE_ADVERTISEMENTS_RECEIVED, "Anti-entropy advertisements received from peers");
    describe_counter!(names::AE_REPLIES_SENT, "Anti-entropy replies and pushed updates sent");
    describe_counter!(names::AE_REPLIES_RECEIVED, "Anti-entropy replies and pushed updates received");
    describe_counter!(names::AE_SEND_FAILURES, "Anti-entropy messages that could not be sent");
    describe_histogram!(names::AE_ROUND_DURATION, "Time to build and send one advertisement in milliseconds");

    // Mastership metrics
    describe_counter!(names::MASTERSHIP_CHANGES, "Accepted mastership role changes");
    describe_counter!(names::MASTERSHIP_REJECTED, "Role changes that failed to persist");

    // Event metrics
    describe_counter!(names::EVENTS_DISPATCHED, "Events dispatched to listener registries");
    describe_counter!(names::EVENTS_DROPPED, "Events dropped because the dispatch queue was full or closed");
    describe_counter!(names::LISTENER_FAILURES, "Listener invocations that panicked");
    describe_histogram!(names::LISTENER_DURATION, "Listener invocation time in milliseconds");
    describe_counter!(names::ACCUMULATOR_BATCHES, "Batches released by event accumulators");
    describe_histogram!(names::ACCUMULATOR_BATCH_SIZE, "Items per released batch");
}

/// Describe metrics if the `[metrics]` section enables them
///
/// Returns whether descriptions were installed. Recording stays a no-op
/// until the embedding process installs a recorder either way.
pub fn init_from_config(config: &MetricsConfig) -> bool {
    if config.enabled {
        init_metrics();
    }
    config.enabled
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
