//! Durable on-disk overflow buffer.
//!
//! All mutation of the spill file funnels through a single writer task fed by
//! an unbounded channel, so producers never perform disk I/O and the size and
//! count ceilings are enforced by exactly one owner. The replay loop obtains
//! the file through [`SpilloverStore::snapshot`], which atomically renames it
//! out from under future appends.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::callback::{notify, LossCallback, LossReason};
use crate::event::Event;
use crate::metrics::Metrics;
use crate::wire;

/// Active append target inside the spillover directory.
pub(crate) const SPILL_FILE: &str = "spill";
/// Rename target drained by the replay loop.
pub(crate) const REPLAY_FILE: &str = "replay";

enum SpillCommand {
    Append(Box<Event>),
    Flush(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<io::Result<Option<PathBuf>>>),
}

/// Handle to the spillover writer task. Clones share the writer.
#[derive(Clone)]
pub(crate) struct SpilloverStore {
    tx: mpsc::UnboundedSender<SpillCommand>,
    replay_path: PathBuf,
    metrics: Arc<Metrics>,
    callback: LossCallback,
}

impl SpilloverStore {
    /// Open the store inside `dir`, adopting any spill file a previous run
    /// left behind. The directory must already exist.
    pub fn open(
        dir: &Path,
        max_events: usize,
        max_bytes: u64,
        metrics: Arc<Metrics>,
        callback: LossCallback,
    ) -> io::Result<Self> {
        let spill_path = dir.join(SPILL_FILE);
        let replay_path = dir.join(REPLAY_FILE);

        let (size_bytes, events) = match std::fs::read_to_string(&spill_path) {
            Ok(content) => {
                let lines = content.lines().filter(|line| !line.trim().is_empty()).count();
                (content.len() as u64, lines)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => (0, 0),
            Err(err) => return Err(err),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = SpillWriter {
            spill_path,
            replay_path: replay_path.clone(),
            max_events,
            max_bytes,
            size_bytes,
            events,
            metrics: metrics.clone(),
            callback: callback.clone(),
        };
        tokio::spawn(writer.run(rx));

        Ok(Self { tx, replay_path, metrics, callback })
    }

    /// Hand an event to the writer. Never blocks and never touches disk on
    /// the calling task.
    pub fn spill(&self, event: Event) {
        if let Err(rejected) = self.tx.send(SpillCommand::Append(Box::new(event))) {
            if let SpillCommand::Append(event) = rejected.0 {
                notify(&self.callback, &event, LossReason::SpilloverIoError);
                self.metrics.record_failed(1);
            }
        }
    }

    /// Wait until every previously submitted append has been processed.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SpillCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Rename the spill file to the replay file and reset the tracked size.
    /// Returns the replay path, or `None` when there is nothing to replay or
    /// a previous replay file is still pending.
    pub async fn snapshot(&self) -> io::Result<Option<PathBuf>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(SpillCommand::Snapshot(reply_tx)).is_err() {
            return Ok(None);
        }
        reply_rx.await.unwrap_or(Ok(None))
    }

    pub fn replay_path(&self) -> &Path {
        &self.replay_path
    }
}

struct SpillWriter {
    spill_path: PathBuf,
    replay_path: PathBuf,
    max_events: usize,
    max_bytes: u64,
    size_bytes: u64,
    events: usize,
    metrics: Arc<Metrics>,
    callback: LossCallback,
}

impl SpillWriter {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SpillCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SpillCommand::Append(event) => self.append(*event).await,
                SpillCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
                SpillCommand::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot().await);
                }
            }
        }
    }

    async fn append(&mut self, event: Event) {
        let line = match wire::spill_line(&event) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize event for spillover");
                notify(&self.callback, &event, LossReason::SpilloverIoError);
                self.metrics.record_failed(1);
                return;
            }
        };

        let length = line.len() as u64;
        if self.size_bytes + length > self.max_bytes {
            tracing::warn!(
                size = self.size_bytes,
                line_bytes = length,
                max = self.max_bytes,
                "spillover size ceiling reached, dropping event"
            );
            notify(&self.callback, &event, LossReason::SpilloverMaxSize);
            self.metrics.record_failed(1);
            return;
        }
        if self.events + 1 > self.max_events {
            tracing::warn!(
                events = self.events,
                max = self.max_events,
                "spillover event ceiling reached, dropping event"
            );
            notify(&self.callback, &event, LossReason::SpilloverMaxEvents);
            self.metrics.record_failed(1);
            return;
        }

        match self.write_line(&line).await {
            Ok(()) => {
                self.size_bytes += length;
                self.events += 1;
                self.metrics.record_spilled(1);
                tracing::debug!(events = self.events, size = self.size_bytes, "event spilled");
            }
            Err(err) => {
                tracing::error!(error = %err, path = %self.spill_path.display(), "spillover write failed");
                notify(&self.callback, &event, LossReason::SpilloverIoError);
                self.metrics.record_failed(1);
            }
        }
    }

    async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spill_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn snapshot(&mut self) -> io::Result<Option<PathBuf>> {
        if self.events == 0 {
            return Ok(None);
        }
        // A leftover replay file means the last tick stopped early; it must
        // drain before the spill file may take its place.
        if tokio::fs::metadata(&self.replay_path).await.is_ok() {
            return Ok(None);
        }

        if let Err(rename_err) = tokio::fs::rename(&self.spill_path, &self.replay_path).await {
            // Some filesystems cannot rename in place; degrade to copy+remove.
            tracing::warn!(
                error = %rename_err,
                "atomic rename unavailable for spill snapshot, copying instead"
            );
            tokio::fs::copy(&self.spill_path, &self.replay_path).await?;
            tokio::fs::remove_file(&self.spill_path).await?;
        }

        self.size_bytes = 0;
        self.events = 0;
        Ok(Some(self.replay_path.clone()))
    }
}

/// Route an event to spillover when configured, otherwise account it as lost.
pub(crate) fn spill_or_fail(
    spill: Option<&SpilloverStore>,
    event: Event,
    reason: LossReason,
    metrics: &Metrics,
    callback: &LossCallback,
) {
    match spill {
        Some(store) => store.spill(event),
        None => {
            notify(callback, &event, reason);
            metrics.record_failed(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::default_callback;
    use std::sync::Mutex;

    fn test_event(step: &str) -> Event {
        Event::builder().correlation_id("corr").step_name(step).event_timestamp_ms(1).build()
    }

    fn capturing_callback() -> (LossCallback, Arc<Mutex<Vec<LossReason>>>) {
        let seen: Arc<Mutex<Vec<LossReason>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: LossCallback =
            Arc::new(move |_event, reason| seen_clone.lock().unwrap().push(reason));
        (callback, seen)
    }

    #[tokio::test]
    async fn append_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let store = SpilloverStore::open(
            dir.path(),
            100,
            1_000_000,
            metrics.clone(),
            default_callback(),
        )
        .unwrap();

        store.spill(test_event("a"));
        store.spill(test_event("b"));
        store.flush().await;

        let content = std::fs::read_to_string(dir.path().join(SPILL_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(metrics.snapshot(false).spilled, 2);
    }

    #[tokio::test]
    async fn size_ceiling_rejects_without_creating_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let (callback, seen) = capturing_callback();

        let event = test_event("multibyte-päyload-𝓍");
        let line_len = wire::spill_line(&event).unwrap().len() as u64;

        let store =
            SpilloverStore::open(dir.path(), 100, line_len - 1, metrics.clone(), callback)
                .unwrap();
        store.spill(event);
        store.flush().await;

        assert_eq!(seen.lock().unwrap().as_slice(), &[LossReason::SpilloverMaxSize]);
        assert_eq!(metrics.snapshot(false).failed, 1);
        assert_eq!(metrics.snapshot(false).spilled, 0);
        assert!(!dir.path().join(SPILL_FILE).exists());
    }

    #[tokio::test]
    async fn event_ceiling_rejects_the_overflow_event() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let (callback, seen) = capturing_callback();

        let store =
            SpilloverStore::open(dir.path(), 1, 1_000_000, metrics.clone(), callback).unwrap();
        store.spill(test_event("kept"));
        store.spill(test_event("dropped"));
        store.flush().await;

        assert_eq!(seen.lock().unwrap().as_slice(), &[LossReason::SpilloverMaxEvents]);
        let content = std::fs::read_to_string(dir.path().join(SPILL_FILE)).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("kept"));
    }

    #[tokio::test]
    async fn snapshot_renames_and_resets_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new());
        let store = SpilloverStore::open(
            dir.path(),
            10,
            1_000_000,
            metrics.clone(),
            default_callback(),
        )
        .unwrap();

        store.spill(test_event("first"));
        store.flush().await;

        let path = store.snapshot().await.unwrap().expect("snapshot available");
        assert_eq!(path, dir.path().join(REPLAY_FILE));
        assert!(!dir.path().join(SPILL_FILE).exists());

        // The ceiling tracking restarted: a new spill file accepts appends.
        store.spill(test_event("second"));
        store.flush().await;
        let content = std::fs::read_to_string(dir.path().join(SPILL_FILE)).unwrap();
        assert!(content.contains("second"));
        assert!(!content.contains("first"));
    }

    #[tokio::test]
    async fn snapshot_is_none_when_empty_or_replay_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpilloverStore::open(
            dir.path(),
            10,
            1_000_000,
            Arc::new(Metrics::new()),
            default_callback(),
        )
        .unwrap();

        assert!(store.snapshot().await.unwrap().is_none(), "nothing spilled yet");

        store.spill(test_event("pending"));
        store.flush().await;
        assert!(store.snapshot().await.unwrap().is_some());

        // Remainder still on disk: the next snapshot must not clobber it.
        store.spill(test_event("later"));
        store.flush().await;
        assert!(store.snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_adopts_existing_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let seeded = wire::spill_line(&test_event("old")).unwrap();
        std::fs::write(dir.path().join(SPILL_FILE), &seeded).unwrap();

        let metrics = Arc::new(Metrics::new());
        let (callback, seen) = capturing_callback();
        let store = SpilloverStore::open(
            dir.path(),
            1,
            1_000_000,
            metrics.clone(),
            callback,
        )
        .unwrap();

        // The adopted line already fills the event ceiling.
        store.spill(test_event("new"));
        store.flush().await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[LossReason::SpilloverMaxEvents]);
    }
}
