//! WebSocket client for the job processor's progress channel.
//!
//! Keeps one persistent connection open, reconnecting with exponential
//! backoff, buffers outbound messages while disconnected, and turns
//! inbound frames into typed events published through a
//! [`Dispatcher`](taskpulse_events::Dispatcher).

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod router;
pub mod transport;
pub mod ws;

pub use client::{ProgressClient, WsConnection};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState, ConnectionStatus};
pub use events::{
    ClientEvent, ConnectionChange, ErrorEvent, ErrorKind, EventKind, ProgressUpdate, QueueUpdate,
};
