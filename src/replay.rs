//! Periodic replay of spilled events back through the delivery path.
//!
//! Each tick snapshots the spill file by atomic rename, then walks it line by
//! line on the single-event path. Corrupt lines are skipped; a send failure
//! stops the tick and preserves the unprocessed remainder, in order, for the
//! next one. The tick is also the sole authority for closing an open circuit
//! once the reset window has elapsed.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::circuit_breaker::CircuitBreaker;
use crate::metrics::Metrics;
use crate::spillover::SpilloverStore;
use crate::transport::{TokenProvider, Transport, TransportRequest};
use crate::wire;

pub(crate) struct ReplayContext {
    pub store: SpilloverStore,
    pub transport: Arc<dyn Transport>,
    pub token_provider: Option<Arc<dyn TokenProvider>>,
    pub breaker: CircuitBreaker,
    pub metrics: Arc<Metrics>,
    pub interval: Duration,
}

pub(crate) fn spawn(
    ctx: Arc<ReplayContext>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + ctx.interval;
        let mut ticker = tokio::time::interval_at(start, ctx.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => run_once(&ctx).await,
            }
        }
        tracing::debug!("replay loop stopped");
    })
}

/// One replay tick. Exposed to the facade as a hermetic test hook.
pub(crate) async fn run_once(ctx: &ReplayContext) {
    if ctx.breaker.is_open() && !ctx.breaker.try_reset() {
        tracing::debug!("replay skipped while circuit is open");
        return;
    }

    // A leftover replay file from an interrupted tick drains first; only
    // then may the spill file be renamed into its place.
    let replay_path = ctx.store.replay_path().to_path_buf();
    let path = if tokio::fs::metadata(&replay_path).await.is_ok() {
        replay_path
    } else {
        match ctx.store.snapshot().await {
            Ok(Some(path)) => path,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "spill snapshot failed");
                return;
            }
        }
    };

    if let Err(err) = drain(ctx, &path).await {
        tracing::warn!(error = %err, "replay tick aborted on I/O error");
    }
}

async fn drain(ctx: &ReplayContext, path: &Path) -> io::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let body = match wire::parse_spill_line(&line) {
            Ok(event) => match wire::single_body(&event) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unserializable spill line");
                    continue;
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "skipping corrupt spill line");
                continue;
            }
        };

        if resend(ctx, body).await {
            ctx.metrics.record_replayed(1);
            continue;
        }

        // Preserve this line and everything after it for the next tick.
        let mut remainder = line;
        remainder.push('\n');
        while let Some(rest) = lines.next_line().await? {
            remainder.push_str(&rest);
            remainder.push('\n');
        }
        tokio::fs::write(path, remainder).await?;
        tracing::debug!("replay stopped early, remainder preserved");
        return Ok(());
    }

    tokio::fs::remove_file(path).await?;
    tracing::debug!("replay file drained");
    Ok(())
}

async fn resend(ctx: &ReplayContext, body: String) -> bool {
    let mut request = TransportRequest::post(wire::EVENTS_PATH, body);
    if let Some(provider) = &ctx.token_provider {
        match provider.token().await {
            Ok(token) => request = request.bearer(token),
            Err(err) => {
                tracing::warn!(error = %err, "token provider failed during replay");
                return false;
            }
        }
    }
    match ctx.transport.send(request).await {
        Ok(response) if response.is_success() => true,
        Ok(response) => {
            tracing::warn!(status = response.status_code, "replay send rejected");
            false
        }
        Err(err) => {
            tracing::warn!(error = %err, "replay send failed");
            false
        }
    }
}
