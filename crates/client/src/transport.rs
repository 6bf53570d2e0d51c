//! Seams between the connection state machine and the outside world.
//!
//! The state machine never talks to sockets or clocks directly. It asks a
//! [`Transport`] to open/write/close and a [`Timer`] to arm or cancel the
//! reconnect timer. Both report back asynchronously as [`Signal`]s, which
//! the driver feeds into [`Connection::handle`](crate::connection::Connection::handle)
//! one at a time. Tests substitute in-memory fakes.

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

/// Tag identifying one connect attempt or one armed timer.
///
/// The connection bumps its generation for every new attempt and on
/// `disconnect()`; signals carrying an older generation are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    /// The following generation.
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asynchronous notifications from the transport and the timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The transport finished its handshake.
    Opened(Generation),
    /// A text frame arrived.
    Message(Generation, String),
    /// The transport closed, or never managed to open.
    Closed(Generation, Option<String>),
    /// The transport hit an error; a `Closed` signal follows separately.
    Error(Generation, String),
    /// The reconnect timer elapsed.
    TimerFired(Generation),
}

impl Signal {
    /// Generation this signal belongs to.
    pub fn generation(&self) -> Generation {
        match self {
            Signal::Opened(g)
            | Signal::Message(g, _)
            | Signal::Closed(g, _)
            | Signal::Error(g, _)
            | Signal::TimerFired(g) => *g,
        }
    }
}

/// A message transport, exclusively owned by the connection.
pub trait Transport: Send {
    /// Begin connecting to `url`. Completion is reported later with
    /// `Signal::Opened` or `Signal::Closed` tagged with `generation`.
    ///
    /// Any previous connection is discarded first. An `Err` means the
    /// attempt could not even be started.
    fn open(&mut self, url: &str, generation: Generation) -> Result<(), TransportError>;

    /// Whether a frame written now would be accepted.
    fn is_writable(&self) -> bool;

    /// Queue one text frame for writing.
    fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the current connection, if any. No signal is required.
    fn close(&mut self);
}

/// A one-shot timer, exclusively owned by the connection.
pub trait Timer: Send {
    /// Arm the timer; report `Signal::TimerFired(generation)` after `delay`.
    /// Re-arming replaces any pending schedule.
    fn schedule(&mut self, delay: Duration, generation: Generation);

    /// Cancel the pending schedule, if any.
    fn cancel(&mut self);
}
