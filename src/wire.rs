//! Wire and spill-file encoding for events.
//!
//! A single event posts to [`EVENTS_PATH`] as one flat JSON object; two or
//! more post to [`EVENTS_BATCH_PATH`] wrapped in an `events` array. The spill
//! file stores the same flat object, one per line, newline-terminated, UTF-8.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Single-event delivery path.
pub const EVENTS_PATH: &str = "/v1/events";
/// Batch delivery path, used for two or more events.
pub const EVENTS_BATCH_PATH: &str = "/v1/events/batch";

#[derive(Serialize)]
struct BatchEnvelope<'a> {
    events: &'a [Event],
}

/// Body for `POST /v1/events`.
pub fn single_body(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Body for `POST /v1/events/batch`.
pub fn batch_body(events: &[Event]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&BatchEnvelope { events })
}

/// One newline-terminated spill-file line. Self-contained: everything needed
/// to re-send the event, including maps and payloads.
pub fn spill_line(event: &Event) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Parse one spill-file line back into an event.
pub fn parse_spill_line(line: &str) -> Result<Event, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// Server response for a successful single-event post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub success: bool,
    #[serde(default)]
    pub execution_ids: Vec<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Server response for a successful batch post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    #[serde(default)]
    pub total_received: u64,
    #[serde(default)]
    pub total_inserted: u64,
    #[serde(default)]
    pub execution_ids: Vec<String>,
    #[serde(default)]
    pub correlation_ids: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStatus, EventType};

    fn sample(step: &str) -> Event {
        Event::builder()
            .correlation_id("corr-1")
            .process_name("billing")
            .step_name(step)
            .event_type(EventType::Step)
            .event_status(EventStatus::Success)
            .event_timestamp_ms(1_700_000_000_000)
            .build()
    }

    #[test]
    fn batch_body_wraps_events_array() {
        let events = vec![sample("a"), sample("b")];
        let value: serde_json::Value =
            serde_json::from_str(&batch_body(&events).unwrap()).unwrap();
        let array = value["events"].as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["stepName"], "a");
        assert_eq!(array[1]["stepName"], "b");
    }

    #[test]
    fn spill_line_is_newline_terminated_and_round_trips() {
        let event = sample("persist");
        let line = spill_line(&event).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed = parse_spill_line(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn parse_rejects_corrupt_lines() {
        assert!(parse_spill_line("not-json").is_err());
        assert!(parse_spill_line("{\"eventType\":\"BOGUS\"}").is_err());
    }

    #[test]
    fn single_response_parses() {
        let body = r#"{"success":true,"executionIds":["e1"],"correlationId":"c1"}"#;
        let response: EventResponse = serde_json::from_str(body).unwrap();
        assert!(response.success);
        assert_eq!(response.execution_ids, vec!["e1"]);
        assert_eq!(response.correlation_id.as_deref(), Some("c1"));
    }

    #[test]
    fn batch_response_parses_with_defaults() {
        let body = r#"{"success":true,"totalReceived":2,"totalInserted":2}"#;
        let response: BatchResponse = serde_json::from_str(body).unwrap();
        assert!(response.success);
        assert_eq!(response.total_received, 2);
        assert!(response.errors.is_empty());
    }
}
