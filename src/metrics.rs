//! Atomic counters owned by the worker pool and read by the monitor
//! (spec 9 REDESIGN FLAGS: "Global mutable counters... re-architect as
//! atomic counters"). Mirrors the shape of `siem_consumer`'s
//! `QUEUED`/`PROCESSED`/`ERRORS` statics, but instance-owned rather
//! than global so each subcommand invocation gets its own set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Exact values are not required (spec 5 "Shared resources"): only
/// monotone increments for rate estimation. Relaxed ordering is
/// sufficient everywhere here.
#[derive(Debug, Default)]
pub struct Counters {
    queued: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    pub fn record_queued(&self, n: u64) {
        self.queued.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// A point-in-time read of the counters, used by the monitor to
/// compute interval rates between ticks (spec 4.6b).
#[derive(Debug, Clone, Copy)]
pub struct CountersSnapshot {
    pub at: Instant,
    pub queued: u64,
    pub processed: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            at: Instant::now(),
            queued: self.queued(),
            processed: self.processed(),
        }
    }
}

impl CountersSnapshot {
    /// Total and interval rates (records/second) against a later
    /// snapshot, per spec 4.6b.
    pub fn rates_since(&self, earlier: &CountersSnapshot) -> (f64, f64) {
        let elapsed = self.at.saturating_duration_since(earlier.at).as_secs_f64();
        if elapsed <= 0.0 {
            return (0.0, 0.0);
        }
        let queued_rate = (self.queued.saturating_sub(earlier.queued)) as f64 / elapsed;
        let processed_rate = (self.processed.saturating_sub(earlier.processed)) as f64 / elapsed;
        (queued_rate, processed_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn increments_are_monotone() {
        let counters = Counters::new();
        counters.record_queued(2);
        counters.record_processed(1);
        assert_eq!(counters.queued(), 2);
        assert_eq!(counters.processed(), 1);
    }

    #[test]
    fn interval_rate_uses_the_delta() {
        let counters = Counters::new();
        let first = counters.snapshot();
        sleep(Duration::from_millis(10));
        counters.record_processed(10);
        let second = counters.snapshot();
        let (_, processed_rate) = second.rates_since(&first);
        assert!(processed_rate > 0.0);
    }
}
