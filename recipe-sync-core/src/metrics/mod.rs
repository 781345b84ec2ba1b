//! Sync metrics
//!
//! Recorded through the `metrics` facade; with no recorder installed every
//! call is a no-op, so the engine records unconditionally.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const UPSERTS_ISSUED: &str = "sync.upserts.issued";
pub const UPSERTS_FAILED: &str = "sync.upserts.failed";
pub const EVENTS_APPLIED: &str = "sync.events.applied";
pub const EVENTS_DISCARDED: &str = "sync.events.discarded";
pub const EVENTS_BUFFERED: &str = "sync.events.buffered";
pub const EVENTS_SUPERSEDED: &str = "sync.events.superseded";
pub const PASS_SIZE: &str = "sync.pass.size";
pub const SEED_DURATION: &str = "sync.seed.duration_ms";

/// Register descriptions for every sync metric
pub fn init_metrics() {
    describe_counter!(UPSERTS_ISSUED, "Upserts handed to the selection store");
    describe_counter!(UPSERTS_FAILED, "Upserts the selection store did not acknowledge");
    describe_counter!(EVENTS_APPLIED, "Push events applied to the selection state");
    describe_counter!(EVENTS_DISCARDED, "Malformed push events dropped");
    describe_counter!(EVENTS_BUFFERED, "Push events held back while the seed read was pending");
    describe_counter!(EVENTS_SUPERSEDED, "Push events dropped in favour of a local intent");
    describe_histogram!(PASS_SIZE, "Inputs folded into one reconciliation pass");
    describe_histogram!(SEED_DURATION, "Startup seed read duration in milliseconds");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Records elapsed milliseconds into a histogram when stopped
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

    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        init_metrics();
        record_counter(UPSERTS_ISSUED, 1);
        record_histogram(PASS_SIZE, 3.0);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new(SEED_DURATION);
        std::thread::sleep(std::time::Duration::from_millis(2));
        timer.stop();
    }
}
