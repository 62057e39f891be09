#![forbid(unsafe_code)]

//! # eventline
//!
//! Asynchronous, durable delivery of structured business events to a remote
//! event-log service over HTTP.
//!
//! The logger decouples callers from network latency and failures:
//!
//! - **Bounded queue** between producers and a pool of sender tasks; the
//!   producer-side `log` call never blocks and never fails the caller.
//! - **Batching** of queued events into a single outbound request.
//! - **Retry** with exponential backoff and per-event attempt accounting.
//! - **Circuit breaker** that suppresses outbound traffic during sustained
//!   failure; only the replay loop closes it again.
//! - **Disk spillover** with byte and event ceilings, used when the queue
//!   overflows and when retries are exhausted.
//! - **Replay loop** that periodically drains spilled events back through
//!   the delivery path.
//! - **Graceful shutdown** that delivers, spills, or accounts for every
//!   in-flight event.
//!
//! Delivery is at-least-once; supply an idempotency key on events if the
//! downstream service should deduplicate.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use eventline::{AsyncLogger, Event, EventStatus, EventType, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), eventline::ConfigError> {
//!     // Swap MemoryTransport for your HTTP client's Transport impl.
//!     let logger = AsyncLogger::builder()
//!         .transport(Arc::new(MemoryTransport::new()))
//!         .queue_capacity(1024)
//!         .batch_size(16)
//!         .spillover_path("/var/spool/eventline")
//!         .build()?;
//!
//!     let event = Event::builder()
//!         .correlation_id("order-7421")
//!         .process_name("order-ingest")
//!         .step_name("validate")
//!         .event_type(EventType::Step)
//!         .event_status(EventStatus::Success)
//!         .build();
//!
//!     logger.log(event);
//!     logger.flush(Duration::from_secs(2)).await;
//!     logger.shutdown().await;
//!     Ok(())
//! }
//! ```

mod backoff;
mod callback;
mod circuit_breaker;
mod clock;
mod error;
mod event;
mod logger;
mod metrics;
mod queue;
mod replay;
mod retry;
mod sender;
mod spillover;
mod transport;
mod wire;

pub use backoff::{RetryBackoff, DEFAULT_MAX_DELAY};
pub use callback::{LossCallback, LossReason};
pub use clock::{Clock, InstantSleeper, MonotonicClock, Sleeper, TokioSleeper, TrackingSleeper};
pub use error::{ConfigError, TransportError};
pub use event::{Event, EventBuilder, EventStatus, EventType};
pub use logger::{AsyncLogger, AsyncLoggerBuilder};
pub use metrics::{Metrics, MetricsSnapshot};
pub use transport::{
    MemoryTransport, StaticTokenProvider, TokenProvider, Transport, TransportRequest,
    TransportResponse,
};
pub use wire::{BatchResponse, EventResponse, EVENTS_BATCH_PATH, EVENTS_PATH};
