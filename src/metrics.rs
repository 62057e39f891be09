//! Process-wide delivery counters and gauges, all atomic.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters and gauges owned by one logger instance.
///
/// Counters are monotonic. `queued` counts every submission presented to the
/// facade; each submission terminates in exactly one of `sent`, `failed`, or
/// `spilled`. `replayed` additionally counts spilled events later delivered.
#[derive(Debug, Default)]
pub struct Metrics {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    spilled: AtomicU64,
    replayed: AtomicU64,
    queue_depth: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_queued(&self, n: u64) {
        self.queued.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_spilled(&self, n: u64) {
        self.spilled.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self, n: u64) {
        self.replayed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn depth_add(&self, n: usize) {
        self.queue_depth.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn depth_sub(&self, n: usize) {
        // Saturating: the depth gauge must never read negative.
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
    }

    pub(crate) fn in_flight_add(&self, n: usize) {
        self.in_flight.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn in_flight_sub(&self, n: usize) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot; each field is read individually.
    pub fn snapshot(&self, circuit_open: bool) -> MetricsSnapshot {
        MetricsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            spilled: self.spilled.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            circuit_open,
        }
    }
}

/// Snapshot of the delivery metrics at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub spilled: u64,
    pub replayed: u64,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub circuit_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.record_queued(3);
        metrics.record_sent(2);
        metrics.record_failed(1);
        metrics.record_spilled(4);
        metrics.record_replayed(2);

        let snapshot = metrics.snapshot(true);
        assert_eq!(snapshot.queued, 3);
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.spilled, 4);
        assert_eq!(snapshot.replayed, 2);
        assert!(snapshot.circuit_open);
    }

    #[test]
    fn depth_gauge_never_goes_negative() {
        let metrics = Metrics::new();
        metrics.depth_add(1);
        metrics.depth_sub(5);
        assert_eq!(metrics.queue_depth(), 0);

        metrics.in_flight_add(2);
        metrics.in_flight_sub(10);
        assert_eq!(metrics.in_flight(), 0);
    }
}
