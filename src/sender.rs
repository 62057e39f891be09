//! Sender pool: drains the queue, batches, calls the transport, and routes
//! failures to the retry scheduler or spillover.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::callback::{LossCallback, LossReason};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::TransportError;
use crate::event::Event;
use crate::metrics::Metrics;
use crate::queue::{EventQueue, QueueEntry};
use crate::retry::RetryScheduler;
use crate::spillover::{spill_or_fail, SpilloverStore};
use crate::transport::{TokenProvider, Transport, TransportRequest, TransportResponse};
use crate::wire;

/// Everything a sender worker needs, shared across the pool.
pub(crate) struct SenderContext {
    pub queue: EventQueue,
    pub transport: Arc<dyn Transport>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub breaker: CircuitBreaker,
    pub retry: RetryScheduler,
    pub spill: Option<SpilloverStore>,
    pub metrics: Arc<Metrics>,
    pub callback: LossCallback,
    pub batch_size: usize,
    pub max_batch_wait: Duration,
    pub max_retries: u32,
}

pub(crate) fn spawn_workers(
    ctx: Arc<SenderContext>,
    count: usize,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(worker_loop(worker, ctx, shutdown))
        })
        .collect()
}

async fn worker_loop(worker: usize, ctx: Arc<SenderContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            // Drain mode: empty the queue without waiting for more arrivals.
            let mut batch = Vec::new();
            while batch.len() < ctx.batch_size {
                match ctx.queue.try_take().await {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
            if batch.is_empty() {
                tracing::debug!(worker, "sender drained, stopping");
                break;
            }
            process_batch(&ctx, batch).await;
            continue;
        }

        let head = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            entry = ctx.queue.take() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };
        let batch = accumulate(&ctx, head).await;
        process_batch(&ctx, batch).await;
    }
}

/// With one entry in hand, wait up to `max_batch_wait` for more arrivals,
/// bounded by `batch_size`. A batch size of one disables batching entirely.
async fn accumulate(ctx: &SenderContext, head: QueueEntry) -> Vec<QueueEntry> {
    let mut batch = vec![head];
    if ctx.batch_size <= 1 {
        return batch;
    }
    if ctx.max_batch_wait.is_zero() {
        while batch.len() < ctx.batch_size {
            match ctx.queue.try_take().await {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        return batch;
    }
    let deadline = Instant::now() + ctx.max_batch_wait;
    while batch.len() < ctx.batch_size {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match ctx.queue.take_timeout(remaining).await {
            Some(entry) => batch.push(entry),
            None => break,
        }
    }
    batch
}

async fn process_batch(ctx: &SenderContext, batch: Vec<QueueEntry>) {
    let size = batch.len();
    ctx.metrics.in_flight_add(size);

    if ctx.breaker.is_open() {
        tracing::debug!(batch = size, "circuit open, diverting batch without sending");
        for mut entry in batch {
            entry.attempt += 1;
            spill_or_fail(
                ctx.spill.as_ref(),
                entry.event,
                LossReason::RetriesExhausted,
                &ctx.metrics,
                &ctx.callback,
            );
        }
        ctx.metrics.in_flight_sub(size);
        return;
    }

    match send_batch(ctx, &batch).await {
        Ok(response) if response.is_success() => {
            ctx.metrics.record_sent(size as u64);
            ctx.breaker.record_success();
            tracing::debug!(batch = size, status = response.status_code, "batch delivered");
        }
        Ok(response) => {
            tracing::warn!(batch = size, status = response.status_code, "batch rejected");
            ctx.breaker.record_failure();
            dispatch_failures(ctx, batch);
        }
        Err(err) => {
            tracing::warn!(batch = size, error = %err, "batch send failed");
            ctx.breaker.record_failure();
            dispatch_failures(ctx, batch);
        }
    }
    ctx.metrics.in_flight_sub(size);
}

/// One entry goes to the single-event path, two or more to the batch path.
/// Queue order is preserved on the wire.
async fn send_batch(
    ctx: &SenderContext,
    batch: &[QueueEntry],
) -> Result<TransportResponse, TransportError> {
    let mut request = if batch.len() == 1 {
        let body = wire::single_body(&batch[0].event)
            .map_err(|err| TransportError::Network(format!("serialize event: {err}")))?;
        TransportRequest::post(wire::EVENTS_PATH, body)
    } else {
        let events: Vec<Event> = batch.iter().map(|entry| entry.event.clone()).collect();
        let body = wire::batch_body(&events)
            .map_err(|err| TransportError::Network(format!("serialize batch: {err}")))?;
        TransportRequest::post(wire::EVENTS_BATCH_PATH, body)
    };
    if let Some(provider) = &ctx.token_provider {
        request = request.bearer(provider.token().await?);
    }
    ctx.transport.send(request).await
}

/// The whole batch failed: bump each attempt counter and hand entries to the
/// retry scheduler, or spill once attempts are spent.
fn dispatch_failures(ctx: &SenderContext, batch: Vec<QueueEntry>) {
    for mut entry in batch {
        entry.attempt += 1;
        if entry.attempt <= ctx.max_retries {
            if let Err(entry) = ctx.retry.schedule(entry) {
                tracing::warn!(id = entry.id, "retry scheduler rejected entry");
                spill_or_fail(
                    ctx.spill.as_ref(),
                    entry.event,
                    LossReason::RetryRejected,
                    &ctx.metrics,
                    &ctx.callback,
                );
            }
        } else {
            spill_or_fail(
                ctx.spill.as_ref(),
                entry.event,
                LossReason::RetriesExhausted,
                &ctx.metrics,
                &ctx.callback,
            );
        }
    }
}
