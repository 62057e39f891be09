//! Bounded handoff queue between producers and the sender pool.
//!
//! Producers enqueue with a non-blocking `try_push`; they never await or
//! touch the network. Sender workers take from the shared receiver, with a
//! bounded wait while assembling a batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::event::Event;
use crate::metrics::Metrics;

/// An event plus its delivery bookkeeping. Owned by exactly one place at a
/// time: the queue, a sender, or the retry scheduler.
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub id: u64,
    pub attempt: u32,
    pub event: Event,
}

/// Bounded FIFO over a tokio channel. Cloning shares the channel.
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    tx: mpsc::Sender<QueueEntry>,
    rx: Arc<Mutex<mpsc::Receiver<QueueEntry>>>,
    metrics: Arc<Metrics>,
    next_id: Arc<AtomicU64>,
}

impl EventQueue {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            metrics,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wrap a fresh event into an entry with a process-unique id.
    pub fn entry(&self, event: Event) -> QueueEntry {
        QueueEntry { id: self.next_id.fetch_add(1, Ordering::Relaxed), attempt: 0, event }
    }

    /// Non-blocking enqueue. On a full (or closed) channel the entry comes
    /// back to the caller, which decides between spillover and loss.
    pub fn try_push(&self, entry: QueueEntry) -> Result<(), QueueEntry> {
        match self.tx.try_send(entry) {
            Ok(()) => {
                self.metrics.depth_add(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(entry))
            | Err(mpsc::error::TrySendError::Closed(entry)) => Err(entry),
        }
    }

    /// Blocking take of the queue head. Returns `None` once the queue is
    /// closed and drained.
    pub async fn take(&self) -> Option<QueueEntry> {
        let entry = self.rx.lock().await.recv().await;
        if entry.is_some() {
            self.metrics.depth_sub(1);
        }
        entry
    }

    /// Bounded-wait take used while accumulating a batch.
    pub async fn take_timeout(&self, wait: Duration) -> Option<QueueEntry> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(entry)) => {
                self.metrics.depth_sub(1);
                Some(entry)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Take whatever is immediately available, if anything.
    pub async fn try_take(&self) -> Option<QueueEntry> {
        let entry = self.rx.lock().await.try_recv().ok();
        if entry.is_some() {
            self.metrics.depth_sub(1);
        }
        entry
    }

    pub fn depth(&self) -> usize {
        self.metrics.queue_depth()
    }
}
