//! Two-state circuit breaker guarding outbound delivery, lock-free atomics.
//!
//! Senders record batch outcomes; once `threshold` consecutive failures
//! accumulate the circuit opens and senders stop calling the transport. The
//! replay loop is the sole authority that closes the circuit again, after
//! `reset_after` has elapsed since it opened.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;

#[derive(Debug)]
struct BreakerState {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    opened_at_millis: AtomicU64,
}

#[derive(Debug, Clone)]
pub(crate) struct CircuitBreaker {
    state: Arc<BreakerState>,
    threshold: usize,
    reset_after: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(threshold: usize, reset_after: Duration) -> Self {
        Self::with_clock(threshold, reset_after, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(threshold: usize, reset_after: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(BreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                consecutive_failures: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
            }),
            threshold,
            reset_after,
            clock,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.state.load(Ordering::Acquire) == STATE_OPEN
    }

    pub fn consecutive_failures(&self) -> usize {
        self.state.consecutive_failures.load(Ordering::Acquire)
    }

    /// Record a successful batch: failures reset; an open circuit closes.
    pub fn record_success(&self) {
        self.state.consecutive_failures.store(0, Ordering::Release);
        if self
            .state
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("circuit breaker closed after successful send");
        }
    }

    /// Record a failed batch; opens the circuit at the threshold.
    pub fn record_failure(&self) {
        let failures = self.state.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold
            && self
                .state
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
            tracing::warn!(failures, threshold = self.threshold, "circuit breaker opened");
        }
    }

    /// Replay-loop authority: close the circuit if the reset window has
    /// elapsed. Returns `true` when the circuit is (now) closed.
    pub fn try_reset(&self) -> bool {
        if !self.is_open() {
            return true;
        }
        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
        let elapsed = self.clock.now_millis().saturating_sub(opened_at);
        if elapsed < self.reset_after.as_millis() as u64 {
            return false;
        }
        if self
            .state
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.state.consecutive_failures.store(0, Ordering::Release);
            tracing::info!(elapsed_ms = elapsed, "circuit breaker reset by replay loop");
        }
        true
    }

    /// Hermetic test hook: pin the breaker into a given state.
    pub fn force_state(&self, open: bool, opened_at_millis: u64) {
        if open {
            self.state.opened_at_millis.store(opened_at_millis, Ordering::Release);
            self.state.state.store(STATE_OPEN, Ordering::Release);
        } else {
            self.state.consecutive_failures.store(0, Ordering::Release);
            self.state.state.store(STATE_CLOSED, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open(), "count restarted after success");
    }

    #[test]
    fn try_reset_honors_the_window() {
        let clock = ManualClock::new();
        let breaker =
            CircuitBreaker::with_clock(1, Duration::from_millis(100), Arc::new(clock.clone()));

        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.try_reset(), "window has not elapsed");

        clock.advance(150);
        assert!(breaker.try_reset());
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn try_reset_on_closed_circuit_is_true() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        assert!(breaker.try_reset());
    }

    #[test]
    fn force_state_pins_the_breaker() {
        let clock = ManualClock::new();
        let breaker =
            CircuitBreaker::with_clock(5, Duration::from_millis(50), Arc::new(clock.clone()));

        breaker.force_state(true, 0);
        assert!(breaker.is_open());

        clock.advance(60);
        assert!(breaker.try_reset());
        assert!(!breaker.is_open());

        breaker.force_state(true, 60);
        assert!(!breaker.try_reset(), "freshly reopened, window restarts");
    }
}
