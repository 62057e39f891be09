//! The business-event record accepted by the logger.
//!
//! Events are created by callers via [`Event::builder`] and never mutated by
//! the delivery pipeline. The serde attributes define the wire shape: flat
//! camelCase keys, absent fields omitted, maps as nested objects.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Lifecycle position of an event within a business process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ProcessStart,
    Step,
    ProcessEnd,
    Error,
}

/// Outcome classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Success,
    Failure,
    InProgress,
    Skipped,
    Warning,
}

/// A single structured business-event record.
///
/// Immutable once built. All optional fields are omitted from the wire and
/// spill forms when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originating_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default)]
    pub step_sequence: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub event_type: EventType,
    pub event_status: EventStatus,
    #[serde(default)]
    pub event_timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_links: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl Event {
    pub fn builder() -> EventBuilder {
        EventBuilder::new()
    }
}

/// Builder for [`Event`].
///
/// `event_type` defaults to [`EventType::Step`], `event_status` to
/// [`EventStatus::InProgress`], and the timestamp to wall-clock now.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
    timestamp_set: bool,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self {
            event: Event {
                correlation_id: None,
                trace_id: None,
                application_id: None,
                target_system: None,
                originating_system: None,
                process_name: None,
                step_sequence: 0,
                step_name: None,
                event_type: EventType::Step,
                event_status: EventStatus::InProgress,
                event_timestamp_ms: 0,
                http_method: None,
                http_endpoint: None,
                http_status_code: None,
                error_code: None,
                error_message: None,
                request_payload: None,
                response_payload: None,
                identifiers: None,
                metadata: None,
                idempotency_key: None,
                span_id: None,
                parent_span_id: None,
                span_links: None,
                batch_id: None,
                execution_time_ms: None,
            },
            timestamp_set: false,
        }
    }

    pub fn correlation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.event.correlation_id = Some(id.into());
        self
    }

    pub fn trace_id<S: Into<String>>(mut self, id: S) -> Self {
        self.event.trace_id = Some(id.into());
        self
    }

    pub fn application_id<S: Into<String>>(mut self, id: S) -> Self {
        self.event.application_id = Some(id.into());
        self
    }

    pub fn target_system<S: Into<String>>(mut self, system: S) -> Self {
        self.event.target_system = Some(system.into());
        self
    }

    pub fn originating_system<S: Into<String>>(mut self, system: S) -> Self {
        self.event.originating_system = Some(system.into());
        self
    }

    pub fn process_name<S: Into<String>>(mut self, name: S) -> Self {
        self.event.process_name = Some(name.into());
        self
    }

    pub fn step_sequence(mut self, sequence: u32) -> Self {
        self.event.step_sequence = sequence;
        self
    }

    pub fn step_name<S: Into<String>>(mut self, name: S) -> Self {
        self.event.step_name = Some(name.into());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event.event_type = event_type;
        self
    }

    pub fn event_status(mut self, status: EventStatus) -> Self {
        self.event.event_status = status;
        self
    }

    pub fn event_timestamp_ms(mut self, millis: u64) -> Self {
        self.event.event_timestamp_ms = millis;
        self.timestamp_set = true;
        self
    }

    pub fn http_method<S: Into<String>>(mut self, method: S) -> Self {
        self.event.http_method = Some(method.into());
        self
    }

    pub fn http_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.event.http_endpoint = Some(endpoint.into());
        self
    }

    pub fn http_status_code(mut self, status: u16) -> Self {
        self.event.http_status_code = Some(status);
        self
    }

    pub fn error_code<S: Into<String>>(mut self, code: S) -> Self {
        self.event.error_code = Some(code.into());
        self
    }

    pub fn error_message<S: Into<String>>(mut self, message: S) -> Self {
        self.event.error_message = Some(message.into());
        self
    }

    pub fn request_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.event.request_payload = Some(payload.into());
        self
    }

    pub fn response_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.event.response_payload = Some(payload.into());
        self
    }

    /// Add one key-value identifier (for example an order or account number).
    pub fn identifier<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.event
            .identifiers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add one free-form metadata entry.
    pub fn metadata_entry<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.event
            .metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn idempotency_key<S: Into<String>>(mut self, key: S) -> Self {
        self.event.idempotency_key = Some(key.into());
        self
    }

    pub fn span_id<S: Into<String>>(mut self, id: S) -> Self {
        self.event.span_id = Some(id.into());
        self
    }

    pub fn parent_span_id<S: Into<String>>(mut self, id: S) -> Self {
        self.event.parent_span_id = Some(id.into());
        self
    }

    pub fn span_link<S: Into<String>>(mut self, id: S) -> Self {
        self.event.span_links.get_or_insert_with(Vec::new).push(id.into());
        self
    }

    pub fn batch_id<S: Into<String>>(mut self, id: S) -> Self {
        self.event.batch_id = Some(id.into());
        self
    }

    pub fn execution_time_ms(mut self, millis: u64) -> Self {
        self.event.execution_time_ms = Some(millis);
        self
    }

    pub fn build(mut self) -> Event {
        if !self.timestamp_set {
            self.event.event_timestamp_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
        }
        self.event
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}
