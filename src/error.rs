//! Error types for logger construction and transport failures.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Rejected configuration detected while building an [`AsyncLogger`](crate::AsyncLogger).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a transport implementation is required")]
    MissingTransport,
    #[error("queue_capacity must be at least 1")]
    InvalidQueueCapacity,
    #[error("base_retry_delay must be greater than zero")]
    InvalidRetryDelay,
    #[error("circuit_breaker_threshold must be at least 1")]
    InvalidCircuitThreshold,
    #[error("circuit_breaker_reset must be greater than zero")]
    InvalidCircuitReset,
    #[error("batch_size must be at least 1")]
    InvalidBatchSize,
    #[error("sender_threads must be at least 1")]
    InvalidSenderThreads,
    #[error("replay_interval must be at least 1s (got {0:?})")]
    InvalidReplayInterval(Duration),
    #[error("max_spillover_events must be at least 1")]
    InvalidSpilloverEvents,
    #[error("max_spillover_size_bytes must be at least 1")]
    InvalidSpilloverSize,
    #[error("failed to prepare spillover directory {path}")]
    SpilloverDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure reported by a [`Transport`](crate::Transport) or
/// [`TokenProvider`](crate::TokenProvider) implementation.
///
/// A non-2xx HTTP status is not an error at this level; the transport reports
/// it through the response status code and the sender decides what to do.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("token provider error: {0}")]
    Token(String),
}
