//! Retry scheduling with exponential backoff and per-event attempt tracking.
//!
//! Each failed entry gets a timer task that re-inserts it at the tail of the
//! main queue after `base * 2^(attempt-1)`. Entries waiting on a timer live
//! in a pending registry so shutdown can cancel the timers and reclaim every
//! event for spilling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;

use crate::backoff::RetryBackoff;
use crate::callback::{LossCallback, LossReason};
use crate::clock::Sleeper;
use crate::event::Event;
use crate::metrics::Metrics;
use crate::queue::{EventQueue, QueueEntry};
use crate::spillover::{spill_or_fail, SpilloverStore};

struct PendingRetry {
    attempt: u32,
    event: Event,
    abort: Option<AbortHandle>,
}

struct RetryInner {
    // `None` once the scheduler has shut down; schedule() then rejects.
    pending: Mutex<Option<HashMap<u64, PendingRetry>>>,
    backoff: RetryBackoff,
    queue: EventQueue,
    spill: Option<SpilloverStore>,
    metrics: Arc<Metrics>,
    callback: LossCallback,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Clone)]
pub(crate) struct RetryScheduler {
    inner: Arc<RetryInner>,
}

impl RetryScheduler {
    pub fn new(
        queue: EventQueue,
        spill: Option<SpilloverStore>,
        metrics: Arc<Metrics>,
        callback: LossCallback,
        backoff: RetryBackoff,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            inner: Arc::new(RetryInner {
                pending: Mutex::new(Some(HashMap::new())),
                backoff,
                queue,
                spill,
                metrics,
                callback,
                sleeper,
            }),
        }
    }

    /// Register the entry as pending and start its backoff timer. Returns the
    /// entry unchanged when the scheduler has already shut down.
    pub fn schedule(&self, entry: QueueEntry) -> Result<(), QueueEntry> {
        let QueueEntry { id, attempt, event } = entry;
        {
            let mut guard = self.inner.lock_pending();
            let Some(map) = guard.as_mut() else {
                return Err(QueueEntry { id, attempt, event });
            };
            map.insert(id, PendingRetry { attempt, event, abort: None });
        }

        let delay = self.inner.backoff.jittered(self.inner.backoff.delay(attempt));
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            inner.sleeper.sleep(delay).await;
            inner.fire(id);
        });

        // The timer may already have fired; setting the abort handle on a
        // consumed registration is a no-op.
        if let Some(map) = self.inner.lock_pending().as_mut() {
            if let Some(pending) = map.get_mut(&id) {
                pending.abort = Some(handle.abort_handle());
            }
        }

        tracing::debug!(id, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().as_ref().map_or(0, HashMap::len)
    }

    /// Cancel every scheduled timer and reclaim the waiting entries. The
    /// scheduler rejects all further work afterwards.
    pub fn shutdown(&self) -> Vec<QueueEntry> {
        let taken = self.inner.lock_pending().take();
        let Some(map) = taken else { return Vec::new() };
        map.into_iter()
            .map(|(id, pending)| {
                if let Some(abort) = pending.abort {
                    abort.abort();
                }
                QueueEntry { id, attempt: pending.attempt, event: pending.event }
            })
            .collect()
    }
}

impl RetryInner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<HashMap<u64, PendingRetry>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Timer completion: move the entry back to the queue tail, unless the
    /// registration was reclaimed by shutdown in the meantime.
    fn fire(&self, id: u64) {
        let pending = self.lock_pending().as_mut().and_then(|map| map.remove(&id));
        let Some(PendingRetry { attempt, event, .. }) = pending else { return };

        match self.queue.try_push(QueueEntry { id, attempt, event }) {
            Ok(()) => tracing::debug!(id, attempt, "retry re-queued"),
            Err(entry) => {
                tracing::warn!(id, "queue full at retry re-insert, diverting");
                spill_or_fail(
                    self.spill.as_ref(),
                    entry.event,
                    LossReason::QueueFull,
                    &self.metrics,
                    &self.callback,
                );
            }
        }
    }
}
