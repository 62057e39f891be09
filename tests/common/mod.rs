#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eventline::{
    Event, EventStatus, EventType, LossReason, Transport, TransportError, TransportRequest,
    TransportResponse,
};

/// Transport that records each request, then holds it until the test hands
/// out a permit. Useful for pinning an event in-flight.
#[derive(Clone)]
pub struct GatedTransport {
    gate: Arc<tokio::sync::Semaphore>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| TransportError::Network("gate closed".to_string()))?;
        permit.forget();
        Ok(TransportResponse::new(200, ""))
    }
}

/// Shared sink for loss-callback invocations.
pub type LossLog = Arc<Mutex<Vec<LossReason>>>;

pub fn loss_log() -> LossLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn reasons(log: &LossLog) -> Vec<LossReason> {
    log.lock().unwrap().clone()
}

pub fn test_event(step: &str) -> Event {
    Event::builder()
        .correlation_id(uuid::Uuid::new_v4().to_string())
        .application_id("integration-suite")
        .process_name("checkout")
        .step_name(step)
        .event_type(EventType::Step)
        .event_status(EventStatus::Success)
        .build()
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
