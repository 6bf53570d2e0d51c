//! Events published by the connection to its subscribers.
//!
//! The four kinds mirror the names used on the wire and by UI code:
//! `progress_update`, `queue_update`, `connection_change` and `error`.

use std::fmt;

use serde_json::Value;
use taskpulse_core::progress::{ProgressData, QueueData};
use taskpulse_core::types::TaskId;
use taskpulse_events::Event;

/// Discriminant used to subscribe to one category of [`ClientEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProgressUpdate,
    QueueUpdate,
    ConnectionChange,
    Error,
}

impl EventKind {
    /// Name used on the wire and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ProgressUpdate => "progress_update",
            EventKind::QueueUpdate => "queue_update",
            EventKind::ConnectionChange => "connection_change",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to subscribers of the progress client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ProgressUpdate(ProgressUpdate),
    QueueUpdate(QueueUpdate),
    ConnectionChange(ConnectionChange),
    Error(ErrorEvent),
}

impl Event for ClientEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            ClientEvent::ProgressUpdate(_) => EventKind::ProgressUpdate,
            ClientEvent::QueueUpdate(_) => EventKind::QueueUpdate,
            ClientEvent::ConnectionChange(_) => EventKind::ConnectionChange,
            ClientEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Progress of one task. `data` is forwarded exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub task_id: Option<TaskId>,
    pub data: Value,
}

impl ProgressUpdate {
    /// Decode `data` into its typed form.
    pub fn progress(&self) -> Result<ProgressData, serde_json::Error> {
        ProgressData::from_value(&self.data)
    }
}

/// Queue state. `data` is forwarded exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueUpdate {
    pub data: Value,
}

impl QueueUpdate {
    /// Decode `data` into its typed form.
    pub fn queue(&self) -> Result<QueueData, serde_json::Error> {
        QueueData::from_value(&self.data)
    }
}

/// The connection opened (`true`) or closed (`false`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChange {
    pub connected: bool,
}

/// Category of a reported, recovered failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An inbound frame could not be decoded; the frame was dropped.
    ParseError,
    /// The transport reported an error; reconnection follows its close.
    TransportError,
}

/// A recovered failure reported to `error` subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEvent {
    /// A `parse_error` with the decoder's message.
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ParseError,
            message: message.into(),
        }
    }

    /// A `transport_error` with the transport's message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::TransportError,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::TransportError => "transport_error",
        };
        write!(f, "{label}: {}", self.message)
    }
}
