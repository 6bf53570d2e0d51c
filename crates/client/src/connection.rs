//! Connection state machine.
//!
//! [`Connection`] owns the transport, the reconnect timer, the backoff
//! policy and the outbound buffer, and publishes routed events to a
//! shared [`Dispatcher`]. It performs no I/O of its own: the driver
//! forwards transport/timer [`Signal`]s to [`Connection::handle`].
//!
//! ```text
//!                 connect()                 Opened
//!  Disconnected ─────────────► Connecting ─────────► Connected
//!       ▲   ▲                   │  ▲                    │
//!       │   │          Closed / │  │ TimerFired         │ Closed
//!       │   │    start failure  ▼  │                    │
//!       │   └──────────── (Disconnected) ◄──────────────┘
//!       │                       │ schedule
//!       │ disconnect()          ▼
//!       └──────────────── ReconnectScheduled
//! ```
//!
//! The internal lock is never held while subscriber callbacks run, so a
//! callback may call back into the connection (`send`, `disconnect`,
//! subscribe/unsubscribe) without deadlocking.
//!
//! Transitions and the events they publish are serialized by a reentrant
//! gate taken by `connect`, `disconnect` and `handle`. A `disconnect()`
//! from another thread therefore waits for an in-flight publish to finish,
//! and nothing from the torn-down attempt is published after it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use taskpulse_core::types::{TaskId, Timestamp};
use taskpulse_core::wire::ClientMessage;
use taskpulse_events::{Dispatcher, Event, SubscriptionId};

use crate::backoff::Backoff;
use crate::buffer::OutboundBuffer;
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::events::{
    ClientEvent, ConnectionChange, ErrorEvent, EventKind, ProgressUpdate, QueueUpdate,
};
use crate::router;
use crate::transport::{Generation, Signal, Timer, Transport};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectScheduled => "reconnect_scheduled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the connection, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Reconnects scheduled since the last successful open.
    pub retry_count: u32,
    /// Delay the next reconnect will wait.
    pub next_delay: Duration,
    /// Messages waiting in the outbound buffer.
    pub buffered: usize,
    pub last_connected_at: Option<Timestamp>,
}

struct Inner<T, M> {
    state: ConnectionState,
    generation: Generation,
    /// Set by `disconnect()` (and before the first `connect()`); suppresses
    /// automatic reconnection.
    stopped: bool,
    transport: T,
    timer: M,
    backoff: Backoff,
    buffer: OutboundBuffer,
    last_connected_at: Option<Timestamp>,
}

impl<T: Transport, M: Timer> Inner<T, M> {
    fn is_stale(&self, generation: Generation) -> bool {
        self.stopped || generation != self.generation
    }

    /// Write out buffered messages in FIFO order. Stops at the first
    /// failed write and keeps the unsent remainder at the front.
    fn flush_buffer(&mut self) -> usize {
        let mut sent = 0;
        loop {
            let mut batch = self.buffer.drain();
            if batch.is_empty() {
                return sent;
            }
            while let Some(message) = batch.pop_front() {
                let result = if self.transport.is_writable() {
                    self.transport.send(message.to_string())
                } else {
                    Err(TransportError::NotConnected)
                };
                if let Err(e) = result {
                    tracing::warn!(
                        error = %e,
                        remaining = batch.len() + 1,
                        "Stopped flushing outbound buffer",
                    );
                    batch.push_front(message);
                    self.buffer.requeue_front(batch);
                    return sent;
                }
                sent += 1;
            }
        }
    }

    fn enqueue(&mut self, message: Value) {
        if let Some(evicted) = self.buffer.enqueue(message) {
            tracing::warn!(
                capacity = self.buffer.capacity(),
                dropped = %evicted,
                "Outbound buffer full, dropped oldest message",
            );
        }
    }
}

/// The connection to the job processor's progress channel.
pub struct Connection<T: Transport, M: Timer> {
    url: String,
    /// Held across a transition and its publishes.
    gate: ReentrantMutex<()>,
    inner: Mutex<Inner<T, M>>,
    dispatcher: Arc<Dispatcher<ClientEvent>>,
}

impl<T: Transport, M: Timer> Connection<T, M> {
    /// Build an idle connection. Nothing happens until [`connect`](Self::connect).
    pub fn new(
        config: &ClientConfig,
        transport: T,
        timer: M,
        dispatcher: Arc<Dispatcher<ClientEvent>>,
    ) -> Self {
        Self {
            url: config.url.clone(),
            gate: ReentrantMutex::new(()),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                generation: Generation(0),
                stopped: true,
                transport,
                timer,
                backoff: Backoff::new(config.backoff.clone()),
                buffer: OutboundBuffer::new(config.buffer_capacity),
                last_connected_at: None,
            }),
            dispatcher,
        }
    }

    /// Endpoint this connection dials.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The dispatcher this connection publishes to.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<ClientEvent>> {
        &self.dispatcher
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether the transport is open and writable from the connection's view.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of state, retry count, next delay and buffer depth.
    pub fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock();
        ConnectionStatus {
            state: inner.state,
            retry_count: inner.backoff.retry_count(),
            next_delay: inner.backoff.current_delay(),
            buffered: inner.buffer.len(),
            last_connected_at: inner.last_connected_at,
        }
    }

    // ---- lifecycle ----

    /// Start connecting. Also re-arms a connection stopped by
    /// [`disconnect`](Self::disconnect). No-op while a session is active.
    pub fn connect(&self) {
        let _gate = self.gate.lock();
        let failed = {
            let mut inner = self.inner.lock();
            if !inner.stopped {
                tracing::debug!(url = %self.url, state = %inner.state, "Already connecting or connected");
                return;
            }
            inner.stopped = false;
            self.begin_attempt(&mut inner)
        };
        if let Some((generation, error)) = failed {
            self.attempt_failed(generation, error);
        }
    }

    /// End the session: cancel any pending reconnect, close the transport
    /// and stop reconnecting. Signals from the torn-down attempt are
    /// ignored from here on.
    ///
    /// Called from another thread, this waits for an event being published
    /// by the driver to reach all subscribers first.
    pub fn disconnect(&self) {
        let _gate = self.gate.lock();
        let was_connected = {
            let mut inner = self.inner.lock();
            let was_connected = inner.state == ConnectionState::Connected;
            inner.stopped = true;
            inner.generation = inner.generation.next();
            inner.timer.cancel();
            inner.transport.close();
            inner.state = ConnectionState::Disconnected;
            tracing::info!(
                url = %self.url,
                buffered = inner.buffer.len(),
                "Disconnected by client",
            );
            was_connected
        };
        if was_connected {
            self.publish(ClientEvent::ConnectionChange(ConnectionChange { connected: false }));
        }
    }

    /// Apply one transport or timer signal.
    pub fn handle(&self, signal: Signal) {
        let _gate = self.gate.lock();
        match signal {
            Signal::Opened(generation) => self.on_opened(generation),
            Signal::Message(generation, text) => self.on_message(generation, &text),
            Signal::Closed(generation, reason) => self.on_closed(generation, reason),
            Signal::Error(generation, message) => self.on_transport_error(generation, message),
            Signal::TimerFired(generation) => self.on_timer_fired(generation),
        }
    }

    // ---- outbound ----

    /// Send a message, or buffer it until the next successful open.
    ///
    /// Never blocks and never fails: delivery is best-effort.
    pub fn send(&self, message: impl Into<Value>) {
        let message = message.into();
        let mut inner = self.inner.lock();

        if inner.state == ConnectionState::Connected && inner.transport.is_writable() {
            if !inner.buffer.is_empty() {
                inner.flush_buffer();
            }
            if inner.buffer.is_empty() {
                match inner.transport.send(message.to_string()) {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "Write failed, buffering message");
                    }
                }
            }
        }

        inner.enqueue(message);
        tracing::trace!(buffered = inner.buffer.len(), state = %inner.state, "Message buffered");
    }

    /// Ask the server to follow `task_id`.
    pub fn subscribe_task(&self, task_id: impl Into<TaskId>) {
        self.send(ClientMessage::Subscribe {
            task_id: task_id.into(),
        });
    }

    // ---- subscriptions ----

    /// Register `callback` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, callback)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(kind, id)
    }

    /// Register a callback for `progress_update` events.
    pub fn subscribe_to_progress<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ProgressUpdate, move |event| {
            if let ClientEvent::ProgressUpdate(update) = event {
                callback(update);
            }
        })
    }

    /// Register a callback for `queue_update` events.
    pub fn subscribe_to_queue<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&QueueUpdate) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::QueueUpdate, move |event| {
            if let ClientEvent::QueueUpdate(update) = event {
                callback(update);
            }
        })
    }

    /// Register a callback for `connection_change` events.
    pub fn subscribe_to_connection<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectionChange) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConnectionChange, move |event| {
            if let ClientEvent::ConnectionChange(change) = event {
                callback(change);
            }
        })
    }

    /// Register a callback for `error` events.
    pub fn subscribe_to_errors<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Error, move |event| {
            if let ClientEvent::Error(error) = event {
                callback(error);
            }
        })
    }

    // ---- private helpers ----

    /// Open a new transport attempt under a fresh generation. Returns the
    /// generation and error when the attempt could not be started; the
    /// caller reports it once the lock is released.
    fn begin_attempt(&self, inner: &mut Inner<T, M>) -> Option<(Generation, TransportError)> {
        inner.generation = inner.generation.next();
        let generation = inner.generation;
        inner.state = ConnectionState::Connecting;

        tracing::info!(
            url = %self.url,
            generation = generation.0,
            attempt = inner.backoff.retry_count(),
            "Connecting to progress server",
        );

        match inner.transport.open(&self.url, generation) {
            Ok(()) => None,
            Err(e) => Some((generation, e)),
        }
    }

    fn attempt_failed(&self, generation: Generation, error: TransportError) {
        tracing::warn!(url = %self.url, error = %error, "Connection attempt could not start");
        self.on_transport_error(generation, error.to_string());
        self.on_closed(generation, Some(error.to_string()));
    }

    fn on_opened(&self, generation: Generation) {
        {
            let mut inner = self.inner.lock();
            if inner.is_stale(generation) || inner.state != ConnectionState::Connecting {
                tracing::debug!(generation = generation.0, "Ignoring stale open signal");
                return;
            }
            inner.state = ConnectionState::Connected;
            inner.timer.cancel();
            inner.backoff.reset();
            inner.last_connected_at = Some(Utc::now());
            let flushed = inner.flush_buffer();

            tracing::info!(
                url = %self.url,
                generation = generation.0,
                flushed,
                "Connected to progress server",
            );
        }
        self.publish_current(
            generation,
            ClientEvent::ConnectionChange(ConnectionChange { connected: true }),
        );
    }

    fn on_message(&self, generation: Generation, text: &str) {
        {
            let inner = self.inner.lock();
            if inner.is_stale(generation) || inner.state != ConnectionState::Connected {
                tracing::debug!(generation = generation.0, "Ignoring message from stale connection");
                return;
            }
        }
        for event in router::route_text(text) {
            // A subscriber may have disconnected while handling the previous one.
            if !self.publish_current(generation, event) {
                break;
            }
        }
    }

    fn on_closed(&self, generation: Generation, reason: Option<String>) {
        {
            let mut inner = self.inner.lock();
            if inner.is_stale(generation) {
                tracing::debug!(generation = generation.0, "Ignoring stale close signal");
                return;
            }
            if !matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return;
            }
            tracing::warn!(
                url = %self.url,
                generation = generation.0,
                was_connected = inner.state == ConnectionState::Connected,
                reason = reason.as_deref().unwrap_or("unknown"),
                "Progress connection closed",
            );
            inner.state = ConnectionState::Disconnected;
        }

        self.publish_current(
            generation,
            ClientEvent::ConnectionChange(ConnectionChange { connected: false }),
        );
        self.schedule_reconnect(generation);
    }

    /// Arm the reconnect timer, unless a subscriber reacting to the close
    /// already disconnected or reconnected.
    fn schedule_reconnect(&self, generation: Generation) {
        let mut inner = self.inner.lock();
        if inner.is_stale(generation) || inner.state != ConnectionState::Disconnected {
            return;
        }
        let delay = inner.backoff.next_attempt();
        inner.timer.schedule(delay, generation);
        inner.state = ConnectionState::ReconnectScheduled;

        tracing::info!(
            url = %self.url,
            delay_ms = delay.as_millis() as u64,
            retry_count = inner.backoff.retry_count(),
            "Reconnect scheduled",
        );
    }

    fn on_timer_fired(&self, generation: Generation) {
        let failed = {
            let mut inner = self.inner.lock();
            if inner.is_stale(generation) || inner.state != ConnectionState::ReconnectScheduled {
                tracing::debug!(generation = generation.0, "Ignoring stale reconnect timer");
                return;
            }
            self.begin_attempt(&mut inner)
        };
        if let Some((generation, error)) = failed {
            self.attempt_failed(generation, error);
        }
    }

    fn on_transport_error(&self, generation: Generation, message: String) {
        if self.inner.lock().is_stale(generation) {
            return;
        }
        tracing::warn!(url = %self.url, error = %message, "Transport error");
        self.publish_current(generation, ClientEvent::Error(ErrorEvent::transport(message)));
    }

    fn publish(&self, event: ClientEvent) {
        self.dispatcher.publish(event);
    }

    /// Publish unless `generation` was torn down in the meantime. Returns
    /// whether the event was published.
    fn publish_current(&self, generation: Generation, event: ClientEvent) -> bool {
        if self.inner.lock().is_stale(generation) {
            tracing::debug!(
                generation = generation.0,
                kind = %event.kind(),
                "Dropping event from torn-down connection",
            );
            return false;
        }
        self.publish(event);
        true
    }
}

impl<T: Transport, M: Timer> fmt::Debug for Connection<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish()
    }
}
