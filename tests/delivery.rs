mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_event, wait_for};
use eventline::{
    AsyncLogger, MemoryTransport, StaticTokenProvider, EVENTS_BATCH_PATH, EVENTS_PATH,
};

#[tokio::test]
async fn happy_single_send_uses_the_single_event_path() {
    let transport = MemoryTransport::new();
    let logger = AsyncLogger::builder()
        .transport(Arc::new(transport.clone()))
        .queue_capacity(16)
        .max_retries(0)
        .batch_size(1)
        .build()
        .unwrap();

    assert!(logger.log(test_event("happy")));
    assert!(wait_for(Duration::from_secs(2), || logger.metrics().sent == 1).await);

    let metrics = logger.metrics();
    assert!(metrics.queued >= 1);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.spilled, 0);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].uri, EVENTS_PATH);
    assert_eq!(requests[0].method, "POST");

    logger.shutdown().await;
}

#[tokio::test]
async fn accumulated_batch_uses_the_batch_path_in_order() {
    let transport = MemoryTransport::new();
    let logger = AsyncLogger::builder()
        .transport(Arc::new(transport.clone()))
        .queue_capacity(16)
        .batch_size(4)
        .max_batch_wait(Duration::from_millis(500))
        .build()
        .unwrap();

    let accepted = logger.log_batch(vec![
        test_event("one"),
        test_event("two"),
        test_event("three"),
        test_event("four"),
    ]);
    assert_eq!(accepted, 4);
    assert!(wait_for(Duration::from_secs(2), || logger.metrics().sent == 4).await);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1, "all four events should ride one request");
    assert_eq!(requests[0].uri, EVENTS_BATCH_PATH);

    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0]["stepName"], "one");
    assert_eq!(events[3]["stepName"], "four");

    logger.shutdown().await;
}

#[tokio::test]
async fn batch_size_one_never_uses_the_batch_endpoint() {
    let transport = MemoryTransport::new();
    let logger = AsyncLogger::builder()
        .transport(Arc::new(transport.clone()))
        .queue_capacity(16)
        .batch_size(1)
        .build()
        .unwrap();

    logger.log_batch(vec![test_event("a"), test_event("b"), test_event("c")]);
    assert!(wait_for(Duration::from_secs(2), || logger.metrics().sent == 3).await);

    for request in transport.requests() {
        assert_eq!(request.uri, EVENTS_PATH);
    }

    logger.shutdown().await;
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let transport = MemoryTransport::with_script([500]);
    let logger = AsyncLogger::builder()
        .transport(Arc::new(transport.clone()))
        .queue_capacity(16)
        .batch_size(1)
        .max_retries(1)
        .base_retry_delay(Duration::from_millis(50))
        .build()
        .unwrap();

    logger.log(test_event("flaky"));
    assert!(wait_for(Duration::from_secs(2), || logger.metrics().sent == 1).await);
    assert_eq!(transport.calls(), 2, "one failure plus one successful retry");
    assert_eq!(logger.metrics().failed, 0);

    logger.shutdown().await;
}

#[tokio::test]
async fn bearer_token_rides_every_request() {
    let transport = MemoryTransport::new();
    let logger = AsyncLogger::builder()
        .transport(Arc::new(transport.clone()))
        .token_provider(Arc::new(StaticTokenProvider::new("secret-token")))
        .batch_size(1)
        .build()
        .unwrap();

    logger.log(test_event("authed"));
    assert!(wait_for(Duration::from_secs(2), || logger.metrics().sent == 1).await);

    let requests = transport.requests();
    assert_eq!(requests[0].headers["Authorization"], "Bearer secret-token");

    logger.shutdown().await;
}

#[tokio::test]
async fn multiple_sender_workers_drain_concurrently() {
    let transport = MemoryTransport::new();
    let logger = AsyncLogger::builder()
        .transport(Arc::new(transport.clone()))
        .queue_capacity(64)
        .batch_size(1)
        .sender_threads(4)
        .build()
        .unwrap();

    for i in 0..20 {
        assert!(logger.log(test_event(&format!("step-{i}"))));
    }
    assert!(wait_for(Duration::from_secs(2), || logger.metrics().sent == 20).await);
    assert_eq!(logger.queue_depth(), 0);

    logger.shutdown().await;
}
