//! Wire envelope shared by both directions of the progress channel.
//!
//! Every text frame is a JSON object of the shape
//! `{"type": "<kind>", "task_id": "<optional>", "data": {...}}`.
//! The envelope keeps `type` as a plain string so that unknown kinds still
//! decode and can be logged by the router instead of surfacing as parse
//! failures.

use serde_json::Value;

use crate::error::WireError;
use crate::types::TaskId;

/// Incremental progress of a single task.
pub const MSG_TYPE_PROGRESS_UPDATE: &str = "progress_update";

/// Queue length / waiting files changed.
pub const MSG_TYPE_QUEUE_UPDATE: &str = "queue_update";

/// Snapshot of the current task and the queue, sent on (re)connect.
pub const MSG_TYPE_FULL_STATE: &str = "full_state";

/// Server acknowledgement of a client `subscribe` request.
pub const MSG_TYPE_SUBSCRIBED: &str = "subscribed";

/// Client request to follow a specific task.
pub const MSG_TYPE_SUBSCRIBE: &str = "subscribe";

/// Task id used when a `full_state` snapshot is replayed as a progress update.
pub const CURRENT_TASK_ID: &str = "current_task";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// The envelope's `type` field.
    pub kind: String,
    pub task_id: Option<TaskId>,
    /// `null` when the frame carried no `data`.
    pub data: Value,
}

impl WireMessage {
    /// Build a message without a task id.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            task_id: None,
            data,
        }
    }

    /// Attach the task this message refers to.
    pub fn with_task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Parse a text frame into a [`WireMessage`].
///
/// The payload must be a JSON object carrying a string `type`. A missing
/// `data` field decodes as `null`; a non-string `task_id` is ignored.
pub fn parse_message(text: &str) -> Result<WireMessage, WireError> {
    let value: Value = serde_json::from_str(text)?;
    let mut object = match value {
        Value::Object(map) => map,
        other => return Err(WireError::NotAnObject(json_type_name(&other))),
    };

    let kind = match object.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(WireError::MissingType),
    };

    let task_id = match object.remove("task_id") {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };

    Ok(WireMessage {
        kind,
        task_id,
        data: object.remove("data").unwrap_or(Value::Null),
    })
}

/// Article-prefixed JSON type name for error messages (`"an array"`).
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Requests the client can originate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Ask the server to follow one task; answered with `subscribed`.
    Subscribe { task_id: TaskId },
}

impl ClientMessage {
    /// Encode as the JSON object sent on the wire.
    pub fn to_value(&self) -> Value {
        match self {
            ClientMessage::Subscribe { task_id } => serde_json::json!({
                "type": MSG_TYPE_SUBSCRIBE,
                "task_id": task_id,
            }),
        }
    }
}

impl From<ClientMessage> for Value {
    fn from(message: ClientMessage) -> Self {
        message.to_value()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_progress_update() {
        let json = r#"{"type":"progress_update","task_id":"doc.pdf","data":{"progress":0.5}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind, MSG_TYPE_PROGRESS_UPDATE);
        assert_eq!(msg.task_id.as_deref(), Some("doc.pdf"));
        assert_eq!(msg.data["progress"], 0.5);
    }

    #[test]
    fn parse_without_data_yields_null() {
        let msg = parse_message(r#"{"type":"queue_update"}"#).unwrap();
        assert!(msg.data.is_null());
        assert!(msg.task_id.is_none());
    }

    #[test]
    fn parse_unknown_type_is_not_an_error() {
        let msg = parse_message(r#"{"type":"heartbeat","data":{}}"#).unwrap();
        assert_eq!(msg.kind, "heartbeat");
    }

    #[test]
    fn parse_non_string_task_id_is_dropped() {
        let msg = parse_message(r#"{"type":"progress_update","task_id":7,"data":{}}"#).unwrap();
        assert!(msg.task_id.is_none());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert_matches!(parse_message("not json at all"), Err(WireError::Json(_)));
    }

    #[test]
    fn parse_array_returns_error() {
        assert_matches!(parse_message("[1,2]"), Err(WireError::NotAnObject("an array")));
    }

    #[test]
    fn parse_missing_type_returns_error() {
        assert_matches!(parse_message(r#"{"data":{}}"#), Err(WireError::MissingType));
        assert_matches!(parse_message(r#"{"type":3}"#), Err(WireError::MissingType));
    }

    #[test]
    fn subscribe_request_shape() {
        let value = ClientMessage::Subscribe {
            task_id: "report.docx".into(),
        }
        .to_value();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["task_id"], "report.docx");
    }
}
