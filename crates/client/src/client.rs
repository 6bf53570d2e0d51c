//! Composition root for a live progress connection.
//!
//! [`ProgressClient::start`] wires a [`Connection`] to the Tokio
//! [`WsTransport`] and [`TokioTimer`], spawns the driver task that
//! applies their signals one at a time, and starts connecting.
//! Subscriber callbacks run on that driver task.
//!
//! The returned `Arc` is meant to be passed explicitly to whatever needs
//! it; there is no global instance.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use taskpulse_events::Dispatcher;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::events::ClientEvent;
use crate::transport::Signal;
use crate::ws::{TokioTimer, WsTransport};

/// A [`Connection`] over the Tokio WebSocket transport.
pub type WsConnection = Connection<WsTransport, TokioTimer>;

/// How long [`ProgressClient::shutdown`] waits for the driver task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running progress client.
pub struct ProgressClient {
    session_id: Uuid,
    connection: Arc<WsConnection>,
    cancel: CancellationToken,
    driver: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProgressClient {
    /// Build the connection, spawn its driver and begin connecting.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn start(config: ClientConfig, dispatcher: Arc<Dispatcher<ClientEvent>>) -> Arc<Self> {
        let session_id = Uuid::new_v4();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Connection::new(
            &config,
            WsTransport::new(signal_tx.clone()),
            TokioTimer::new(signal_tx),
            dispatcher,
        ));
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(
            run_driver(Arc::clone(&connection), signal_rx, cancel.clone())
                .instrument(tracing::info_span!("progress_client", session_id = %session_id)),
        );

        tracing::info!(session_id = %session_id, url = %config.url, "Starting progress client");
        connection.connect();

        Arc::new(Self {
            session_id,
            connection,
            cancel,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Identifier attached to this client's log lines.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The connection: `send`, subscriptions, `disconnect`, `status`.
    pub fn connection(&self) -> &Arc<WsConnection> {
        &self.connection
    }

    /// Disconnect and stop the driver task.
    ///
    /// Waits up to 5 seconds for the driver to exit.
    pub async fn shutdown(&self) {
        tracing::info!(session_id = %self.session_id, "Shutting down progress client");
        self.connection.disconnect();
        self.cancel.cancel();

        let driver = self.driver.lock().take();
        if let Some(handle) = driver {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(session_id = %self.session_id, "Driver task did not stop in time");
            }
        }
    }
}

impl Drop for ProgressClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Apply signals to the connection in arrival order until cancelled.
async fn run_driver(
    connection: Arc<WsConnection>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    cancel: CancellationToken,
) {
    tracing::debug!("Driver task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => connection.handle(signal),
                None => break,
            },
        }
    }

    tracing::debug!("Driver task exited");
}
