//! Loss notification: the user-supplied sink invoked when an event cannot be
//! delivered or durably buffered.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::event::Event;

/// Why an event left the delivery pipeline without being sent.
///
/// This set is closed; matching on it is exhaustive by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossReason {
    QueueFull,
    ShutdownInProgress,
    SpilloverMaxSize,
    SpilloverMaxEvents,
    SpilloverIoError,
    RetriesExhausted,
    RetryRejected,
}

impl LossReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossReason::QueueFull => "queue_full",
            LossReason::ShutdownInProgress => "shutdown_in_progress",
            LossReason::SpilloverMaxSize => "spillover_max_size",
            LossReason::SpilloverMaxEvents => "spillover_max_events",
            LossReason::SpilloverIoError => "spillover_io_error",
            LossReason::RetriesExhausted => "retries_exhausted",
            LossReason::RetryRejected => "retry_rejected",
        }
    }
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied sink invoked once per lost event, on the task that first
/// determines the loss.
pub type LossCallback = Arc<dyn Fn(&Event, LossReason) + Send + Sync>;

/// Default callback: warn via `tracing` and move on.
pub(crate) fn default_callback() -> LossCallback {
    Arc::new(|event, reason| {
        tracing::warn!(
            reason = %reason,
            correlation_id = event.correlation_id.as_deref().unwrap_or(""),
            "event lost"
        );
    })
}

/// Invoke the callback, containing any panic so it cannot disturb the pipeline.
pub(crate) fn notify(callback: &LossCallback, event: &Event, reason: LossReason) {
    if catch_unwind(AssertUnwindSafe(|| callback.as_ref()(event, reason))).is_err() {
        tracing::error!(reason = %reason, "loss callback panicked; ignoring");
    }
}
