//! Inbound message router.
//!
//! Translates decoded [`WireMessage`]s into the [`ClientEvent`]s that
//! subscribers see. The router holds no state and performs no I/O; the
//! connection publishes whatever it returns, in order.

use serde_json::Value;
use taskpulse_core::wire::{
    json_type_name, parse_message, WireMessage, CURRENT_TASK_ID, MSG_TYPE_FULL_STATE,
    MSG_TYPE_PROGRESS_UPDATE, MSG_TYPE_QUEUE_UPDATE, MSG_TYPE_SUBSCRIBED,
};

use crate::events::{ClientEvent, ErrorEvent, ProgressUpdate, QueueUpdate};

/// Decode and route one text frame.
///
/// A frame that fails to decode yields a single `parse_error` event.
pub fn route_text(text: &str) -> Vec<ClientEvent> {
    match parse_message(text) {
        Ok(message) => route(message),
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse progress message",
            );
            vec![ClientEvent::Error(ErrorEvent::parse(e.to_string()))]
        }
    }
}

/// Route a decoded message to zero or more events.
pub fn route(message: WireMessage) -> Vec<ClientEvent> {
    match message.kind.as_str() {
        MSG_TYPE_PROGRESS_UPDATE => vec![ClientEvent::ProgressUpdate(ProgressUpdate {
            task_id: message.task_id,
            data: message.data,
        })],
        MSG_TYPE_QUEUE_UPDATE => vec![ClientEvent::QueueUpdate(QueueUpdate {
            data: message.data,
        })],
        MSG_TYPE_FULL_STATE => route_full_state(message.data),
        MSG_TYPE_SUBSCRIBED => {
            tracing::debug!(task_id = ?message.task_id, "Task subscription acknowledged");
            Vec::new()
        }
        other => {
            tracing::warn!(message_type = %other, "Unrecognized message type");
            Vec::new()
        }
    }
}

/// Replay a `full_state` snapshot in the vocabulary of incremental updates.
///
/// A snapshot whose `data` is not an object is malformed and yields a
/// single `parse_error`.
fn route_full_state(data: Value) -> Vec<ClientEvent> {
    let mut snapshot = match data {
        Value::Object(snapshot) => snapshot,
        other => {
            tracing::warn!(data = %other, "full_state payload is not an object");
            return vec![ClientEvent::Error(ErrorEvent::parse(format!(
                "full_state data must be an object, got {}",
                json_type_name(&other)
            )))];
        }
    };

    let mut events = Vec::with_capacity(2);
    if let Some(current_task) = snapshot.remove("current_task").filter(is_present) {
        events.push(ClientEvent::ProgressUpdate(ProgressUpdate {
            task_id: Some(CURRENT_TASK_ID.to_string()),
            data: current_task,
        }));
    }
    if let Some(queue_state) = snapshot.remove("queue_state").filter(is_present) {
        events.push(ClientEvent::QueueUpdate(QueueUpdate { data: queue_state }));
    }
    events
}

/// Whether a snapshot part carries a value. `null`, `false`, `0` and `""`
/// count as absent.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::events::ErrorKind;

    #[test]
    fn progress_update_keeps_task_id_and_data() {
        let events = route_text(
            r#"{"type":"progress_update","task_id":"a.pdf","data":{"progress":0.25,"filename":"a.pdf"}}"#,
        );
        assert_eq!(
            events,
            vec![ClientEvent::ProgressUpdate(ProgressUpdate {
                task_id: Some("a.pdf".into()),
                data: json!({"progress": 0.25, "filename": "a.pdf"}),
            })]
        );
    }

    #[test]
    fn queue_update_forwards_data() {
        let events = route(WireMessage::new(
            MSG_TYPE_QUEUE_UPDATE,
            json!({"queue_length": 2, "queue_files": ["x", "y"]}),
        ));
        assert_matches!(
            events.as_slice(),
            [ClientEvent::QueueUpdate(QueueUpdate { data })] if data["queue_length"] == 2
        );
    }

    #[test]
    fn full_state_with_both_parts_yields_progress_then_queue() {
        let current = json!({"progress": 0.5, "filename": "doc.pdf"});
        let queue = json!({"queue_length": 1, "queue_files": ["next.pdf"]});
        let events = route(WireMessage::new(
            MSG_TYPE_FULL_STATE,
            json!({"current_task": current, "queue_state": queue}),
        ));

        assert_eq!(
            events,
            vec![
                ClientEvent::ProgressUpdate(ProgressUpdate {
                    task_id: Some(CURRENT_TASK_ID.into()),
                    data: current,
                }),
                ClientEvent::QueueUpdate(QueueUpdate { data: queue }),
            ]
        );
    }

    #[test]
    fn full_state_with_only_queue() {
        let events = route(WireMessage::new(
            MSG_TYPE_FULL_STATE,
            json!({"current_task": null, "queue_state": {"queue_length": 0}}),
        ));
        assert_matches!(events.as_slice(), [ClientEvent::QueueUpdate(_)]);
    }

    #[test]
    fn full_state_without_known_parts_is_empty() {
        let events = route(WireMessage::new(
            MSG_TYPE_FULL_STATE,
            json!({"tasks": {}, "timestamp": "2024-05-01T10:00:00"}),
        ));
        assert!(events.is_empty());
    }

    #[test]
    fn full_state_without_object_data_yields_parse_error() {
        for frame in [
            r#"{"type":"full_state"}"#,
            r#"{"type":"full_state","data":null}"#,
            r#"{"type":"full_state","data":5}"#,
            r#"{"type":"full_state","data":["x"]}"#,
        ] {
            let events = route_text(frame);
            assert_matches!(
                events.as_slice(),
                [ClientEvent::Error(ErrorEvent { kind: ErrorKind::ParseError, .. })],
                "frame: {frame}"
            );
        }
    }

    #[test]
    fn full_state_skips_empty_parts() {
        let events = route(WireMessage::new(
            MSG_TYPE_FULL_STATE,
            json!({"current_task": "", "queue_state": false}),
        ));
        assert!(events.is_empty());

        let events = route(WireMessage::new(
            MSG_TYPE_FULL_STATE,
            json!({"current_task": 0, "queue_state": {}}),
        ));
        assert_matches!(events.as_slice(), [ClientEvent::QueueUpdate(_)]);
    }

    #[test]
    fn progress_update_without_data_forwards_null() {
        let events = route(
            WireMessage::new(MSG_TYPE_PROGRESS_UPDATE, Value::Null).with_task_id("b.pdf"),
        );
        assert_matches!(
            events.as_slice(),
            [ClientEvent::ProgressUpdate(ProgressUpdate { task_id: Some(id), data: Value::Null })]
                if id == "b.pdf"
        );
    }

    #[test]
    fn unknown_type_yields_nothing() {
        assert!(route_text(r#"{"type":"heartbeat","data":{}}"#).is_empty());
    }

    #[test]
    fn subscribed_ack_yields_nothing() {
        assert!(route_text(r#"{"type":"subscribed","task_id":"a.pdf"}"#).is_empty());
    }

    #[test]
    fn malformed_frame_yields_parse_error() {
        let events = route_text("{not json");
        assert_matches!(
            events.as_slice(),
            [ClientEvent::Error(ErrorEvent { kind: ErrorKind::ParseError, .. })]
        );
    }
}
