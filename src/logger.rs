//! The public facade: accepts events without blocking the caller and owns
//! the background delivery pipeline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backoff::{RetryBackoff, DEFAULT_MAX_DELAY};
use crate::callback::{default_callback, notify, LossCallback, LossReason};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use crate::error::ConfigError;
use crate::event::Event;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::EventQueue;
use crate::replay::{self, ReplayContext};
use crate::retry::RetryScheduler;
use crate::sender::{self, SenderContext};
use crate::spillover::{spill_or_fail, SpilloverStore};
use crate::transport::{TokenProvider, Transport};

const STATE_RUNNING: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// How long shutdown lets the sender pool drain before aborting it.
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

struct LoggerInner {
    state: AtomicU8,
    queue: EventQueue,
    metrics: Arc<Metrics>,
    breaker: CircuitBreaker,
    callback: LossCallback,
    spill: Option<SpilloverStore>,
    retry: RetryScheduler,
    replay_ctx: Option<Arc<ReplayContext>>,
    sender_handles: StdMutex<Vec<JoinHandle<()>>>,
    replay_handle: StdMutex<Option<JoinHandle<()>>>,
    hook_handle: StdMutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_gate: tokio::sync::Mutex<bool>,
}

/// Asynchronous, durable event-logging client.
///
/// `log` never blocks and never fails the caller; events flow through a
/// bounded queue to a pool of batching sender tasks, with retry, circuit
/// breaking, and disk spillover behind it. Call [`shutdown`](Self::shutdown)
/// before the process exits so every accepted event is delivered, spilled,
/// or accounted as lost.
#[derive(Clone)]
pub struct AsyncLogger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for AsyncLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLogger").finish_non_exhaustive()
    }
}

impl AsyncLogger {
    pub fn builder() -> AsyncLoggerBuilder {
        AsyncLoggerBuilder::new()
    }

    /// Submit one event. Returns `true` when the event was accepted into the
    /// pipeline (queued or deferred to spillover), `false` when it was
    /// dropped. Never blocks and never panics.
    pub fn log(&self, event: Event) -> bool {
        let inner = &self.inner;
        inner.metrics.record_queued(1);

        if inner.state.load(Ordering::Acquire) != STATE_RUNNING {
            notify(&inner.callback, &event, LossReason::ShutdownInProgress);
            inner.metrics.record_failed(1);
            return false;
        }

        match inner.queue.try_push(inner.queue.entry(event)) {
            Ok(()) => true,
            Err(entry) => match &inner.spill {
                Some(store) => {
                    tracing::debug!("queue full, deferring event to spillover");
                    store.spill(entry.event);
                    true
                }
                None => {
                    notify(&inner.callback, &entry.event, LossReason::QueueFull);
                    inner.metrics.record_failed(1);
                    false
                }
            },
        }
    }

    /// Submit a batch; same per-event semantics as [`log`](Self::log).
    /// Returns the number of accepted events.
    pub fn log_batch(&self, events: Vec<Event>) -> usize {
        let mut accepted = 0;
        for event in events {
            if self.log(event) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Wait until the queue and in-flight batches drain, polling on a timer.
    /// Returns `false` when the timeout elapses first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.metrics.queue_depth() == 0 && self.inner.metrics.in_flight() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10).min(deadline - now)).await;
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.metrics.queue_depth()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.breaker.is_open())
    }

    pub fn is_circuit_open(&self) -> bool {
        self.inner.breaker.is_open()
    }

    /// Number of entries waiting on a scheduled retry.
    pub fn pending_retries(&self) -> usize {
        self.inner.retry.pending_len()
    }

    /// Whether the process-interrupt hook is currently installed.
    pub fn shutdown_hook_registered(&self) -> bool {
        self.inner.hook_handle.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Stop the pipeline, preserving every in-flight event by delivery or by
    /// spilling. Idempotent; concurrent callers wait for the first to finish.
    pub async fn shutdown(&self) {
        let mut done = self.inner.shutdown_gate.lock().await;
        if *done {
            return;
        }

        self.inner.state.store(STATE_SHUTTING_DOWN, Ordering::Release);
        let _ = self.inner.shutdown_tx.send(true);
        tracing::info!("logger shutting down");

        // Sender pool drains the queue, bounded by the graceful deadline.
        let handles = {
            let mut guard =
                self.inner.sender_handles.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *guard)
        };
        let deadline = Instant::now() + SHUTDOWN_DRAIN_DEADLINE;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                tracing::warn!("sender worker aborted at shutdown deadline");
            }
        }

        // Cancel scheduled retries and reclaim the waiting entries.
        for entry in self.inner.retry.shutdown() {
            spill_or_fail(
                self.inner.spill.as_ref(),
                entry.event,
                LossReason::ShutdownInProgress,
                &self.inner.metrics,
                &self.inner.callback,
            );
        }

        // Catch anything still queued. Two passes with a short settle, since
        // a retry timer that fired concurrently may re-insert just behind us.
        for pass in 0..2 {
            while let Some(entry) = self.inner.queue.try_take().await {
                spill_or_fail(
                    self.inner.spill.as_ref(),
                    entry.event,
                    LossReason::ShutdownInProgress,
                    &self.inner.metrics,
                    &self.inner.callback,
                );
            }
            if pass == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        // Stop the replay loop.
        let replay_handle = {
            let mut guard =
                self.inner.replay_handle.lock().unwrap_or_else(|p| p.into_inner());
            guard.take()
        };
        if let Some(mut handle) = replay_handle {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle).await.is_err() {
                handle.abort();
            }
        }

        // Let the spillover writer finish everything already handed to it.
        if let Some(store) = &self.inner.spill {
            store.flush().await;
        }

        // Deregister the interrupt hook so a fresh logger can install its own.
        let hook = {
            let mut guard = self.inner.hook_handle.lock().unwrap_or_else(|p| p.into_inner());
            guard.take()
        };
        if let Some(handle) = hook {
            handle.abort();
        }

        self.inner.state.store(STATE_TERMINATED, Ordering::Release);
        *done = true;
        tracing::info!("logger terminated");
    }

    /// Alias for [`shutdown`](Self::shutdown).
    pub async fn close(&self) {
        self.shutdown().await;
    }

    /// Hermetic test hook: pin the circuit breaker into a given state.
    pub fn force_circuit_state(&self, open: bool, opened_at_millis: u64) {
        self.inner.breaker.force_state(open, opened_at_millis);
    }

    /// Hermetic test hook: run one replay tick inline. No-op without a
    /// configured spillover path.
    pub async fn run_replay_once(&self) {
        if let Some(ctx) = &self.inner.replay_ctx {
            replay::run_once(ctx).await;
        }
    }
}

/// Builder for [`AsyncLogger`]. Invalid values fail [`build`](Self::build).
pub struct AsyncLoggerBuilder {
    transport: Option<Arc<dyn Transport>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    queue_capacity: usize,
    max_retries: u32,
    base_retry_delay: Duration,
    max_retry_delay: Duration,
    circuit_breaker_threshold: usize,
    circuit_breaker_reset: Duration,
    batch_size: usize,
    max_batch_wait: Duration,
    sender_threads: usize,
    replay_interval: Duration,
    spillover_path: Option<PathBuf>,
    max_spillover_events: usize,
    max_spillover_size_bytes: u64,
    register_shutdown_hook: bool,
    loss_callback: Option<LossCallback>,
    retry_sleeper: Arc<dyn Sleeper>,
    clock: Option<Arc<dyn Clock>>,
}

impl AsyncLoggerBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            token_provider: None,
            queue_capacity: 1024,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: DEFAULT_MAX_DELAY,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset: Duration::from_secs(30),
            batch_size: 16,
            max_batch_wait: Duration::from_millis(25),
            sender_threads: 1,
            replay_interval: Duration::from_secs(60),
            spillover_path: None,
            max_spillover_events: 10_000,
            max_spillover_size_bytes: 16 * 1024 * 1024,
            register_shutdown_hook: false,
            loss_callback: None,
            retry_sleeper: Arc::new(TokioSleeper),
            clock: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn circuit_breaker_threshold(mut self, threshold: usize) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    pub fn circuit_breaker_reset(mut self, reset: Duration) -> Self {
        self.circuit_breaker_reset = reset;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn max_batch_wait(mut self, wait: Duration) -> Self {
        self.max_batch_wait = wait;
        self
    }

    pub fn sender_threads(mut self, threads: usize) -> Self {
        self.sender_threads = threads;
        self
    }

    pub fn replay_interval(mut self, interval: Duration) -> Self {
        self.replay_interval = interval;
        self
    }

    pub fn spillover_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.spillover_path = Some(path.into());
        self
    }

    pub fn max_spillover_events(mut self, events: usize) -> Self {
        self.max_spillover_events = events;
        self
    }

    pub fn max_spillover_size_bytes(mut self, bytes: u64) -> Self {
        self.max_spillover_size_bytes = bytes;
        self
    }

    pub fn register_shutdown_hook(mut self, register: bool) -> Self {
        self.register_shutdown_hook = register;
        self
    }

    pub fn loss_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Event, LossReason) + Send + Sync + 'static,
    {
        self.loss_callback = Some(Arc::new(callback));
        self
    }

    /// Override the retry timer source (deterministic tests).
    pub fn retry_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.retry_sleeper = Arc::new(sleeper);
        self
    }

    /// Override the circuit breaker's clock (deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate the configuration and start the pipeline. Must be called
    /// within a tokio runtime; the background tasks are spawned here.
    pub fn build(self) -> Result<AsyncLogger, ConfigError> {
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.base_retry_delay.is_zero() {
            return Err(ConfigError::InvalidRetryDelay);
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::InvalidCircuitThreshold);
        }
        if self.circuit_breaker_reset.is_zero() {
            return Err(ConfigError::InvalidCircuitReset);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.sender_threads == 0 {
            return Err(ConfigError::InvalidSenderThreads);
        }
        if self.replay_interval < Duration::from_secs(1) {
            return Err(ConfigError::InvalidReplayInterval(self.replay_interval));
        }
        if self.max_spillover_events == 0 {
            return Err(ConfigError::InvalidSpilloverEvents);
        }
        if self.max_spillover_size_bytes == 0 {
            return Err(ConfigError::InvalidSpilloverSize);
        }

        let metrics = Arc::new(Metrics::new());
        let callback = self.loss_callback.unwrap_or_else(default_callback);
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::default()));
        let breaker = CircuitBreaker::with_clock(
            self.circuit_breaker_threshold,
            self.circuit_breaker_reset,
            clock,
        );
        let queue = EventQueue::new(self.queue_capacity, metrics.clone());

        let spill = match &self.spillover_path {
            Some(path) => {
                std::fs::create_dir_all(path)
                    .map_err(|source| ConfigError::SpilloverDir { path: path.clone(), source })?;
                Some(
                    SpilloverStore::open(
                        path,
                        self.max_spillover_events,
                        self.max_spillover_size_bytes,
                        metrics.clone(),
                        callback.clone(),
                    )
                    .map_err(|source| ConfigError::SpilloverDir { path: path.clone(), source })?,
                )
            }
            None => None,
        };

        let backoff = RetryBackoff::new(self.base_retry_delay).with_max(self.max_retry_delay);
        let retry = RetryScheduler::new(
            queue.clone(),
            spill.clone(),
            metrics.clone(),
            callback.clone(),
            backoff,
            self.retry_sleeper,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sender_ctx = Arc::new(SenderContext {
            queue: queue.clone(),
            transport: transport.clone(),
            token_provider: self.token_provider.clone(),
            breaker: breaker.clone(),
            retry: retry.clone(),
            spill: spill.clone(),
            metrics: metrics.clone(),
            callback: callback.clone(),
            batch_size: self.batch_size,
            max_batch_wait: self.max_batch_wait,
            max_retries: self.max_retries,
        });
        let sender_handles = sender::spawn_workers(sender_ctx, self.sender_threads, &shutdown_rx);

        let (replay_ctx, replay_handle) = match &spill {
            Some(store) => {
                let ctx = Arc::new(ReplayContext {
                    store: store.clone(),
                    transport,
                    token_provider: self.token_provider,
                    breaker: breaker.clone(),
                    metrics: metrics.clone(),
                    interval: self.replay_interval,
                });
                let handle = replay::spawn(ctx.clone(), shutdown_rx);
                (Some(ctx), Some(handle))
            }
            None => (None, None),
        };

        let logger = AsyncLogger {
            inner: Arc::new(LoggerInner {
                state: AtomicU8::new(STATE_RUNNING),
                queue,
                metrics,
                breaker,
                callback,
                spill,
                retry,
                replay_ctx,
                sender_handles: StdMutex::new(sender_handles),
                replay_handle: StdMutex::new(replay_handle),
                hook_handle: StdMutex::new(None),
                shutdown_tx,
                shutdown_gate: tokio::sync::Mutex::new(false),
            }),
        };

        if self.register_shutdown_hook {
            let hooked = logger.clone();
            let handle = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting logger down");
                    hooked.shutdown().await;
                }
            });
            *logger.inner.hook_handle.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        }

        tracing::debug!(
            queue_capacity = self.queue_capacity,
            batch_size = self.batch_size,
            sender_threads = self.sender_threads,
            spillover = self.spillover_path.is_some(),
            "event logger started"
        );
        Ok(logger)
    }
}

impl Default for AsyncLoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
