//! Tokio implementations of the [`Transport`] and [`Timer`] seams.
//!
//! [`WsTransport`] runs each connect attempt as its own task: it dials
//! the endpoint with `tokio-tungstenite`, forwards text frames as
//! [`Signal::Message`], writes queued outbound frames, and always ends
//! with a [`Signal::Closed`]. [`TokioTimer`] sleeps on the runtime and
//! reports [`Signal::TimerFired`]. Both must be used from inside a Tokio
//! runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{Generation, Signal, Timer, Transport};

/// Channel the driver reads signals from.
pub type SignalSender = mpsc::UnboundedSender<Signal>;

// ---------------------------------------------------------------------------
// WsTransport
// ---------------------------------------------------------------------------

/// WebSocket transport backed by `tokio-tungstenite`.
pub struct WsTransport {
    signals: SignalSender,
    session: Option<WsSession>,
}

/// Handles into the task that owns one connect attempt.
struct WsSession {
    outbound: mpsc::UnboundedSender<String>,
    writable: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Create a transport reporting to `signals`.
    pub fn new(signals: SignalSender) -> Self {
        Self {
            signals,
            session: None,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, generation: Generation) -> Result<(), TransportError> {
        self.close();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Start(format!("no Tokio runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writable = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        runtime.spawn(run_session(
            url.to_string(),
            generation,
            self.signals.clone(),
            outbound_rx,
            Arc::clone(&writable),
            cancel.clone(),
        ));

        self.session = Some(WsSession {
            outbound: outbound_tx,
            writable,
            cancel,
        });
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.writable.load(Ordering::Acquire) && !s.outbound.is_closed())
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        if !session.writable.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        session
            .outbound
            .send(text)
            .map_err(|_| TransportError::NotConnected)
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.writable.store(false, Ordering::Release);
            session.cancel.cancel();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive one connect attempt from handshake to close.
async fn run_session(
    url: String,
    generation: Generation,
    signals: SignalSender,
    mut outbound: mpsc::UnboundedReceiver<String>,
    writable: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Failed to connect to progress server");
            let _ = signals.send(Signal::Error(generation, format!("Failed to connect to {url}: {e}")));
            let _ = signals.send(Signal::Closed(generation, Some(e.to_string())));
            return;
        }
    };

    writable.store(true, Ordering::Release);
    let _ = signals.send(Signal::Opened(generation));

    let (mut sink, mut stream) = ws_stream.split();
    let close_reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                writable.store(false, Ordering::Release);
                let _ = sink.send(Message::Close(None)).await;
                // Closed locally; the connection already ignores this generation.
                break Some("closed by client".to_string());
            }
            text = outbound.recv() => {
                let Some(text) = text else {
                    break Some("outbound channel closed".to_string());
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::error!(error = %e, "WebSocket send error");
                    let _ = signals.send(Signal::Error(generation, e.to_string()));
                    break Some(e.to_string());
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = signals.send(Signal::Message(generation, text));
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::trace!("Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Progress server closed WebSocket");
                        break Some(match frame {
                            Some(f) => format!("{} {}", u16::from(f.code), f.reason),
                            None => "closed by server".to_string(),
                        });
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket receive error");
                        let _ = signals.send(Signal::Error(generation, e.to_string()));
                        break Some(e.to_string());
                    }
                    None => {
                        tracing::info!("WebSocket stream exhausted");
                        break None;
                    }
                }
            }
        }
    };

    writable.store(false, Ordering::Release);
    let _ = signals.send(Signal::Closed(generation, close_reason));
}

// ---------------------------------------------------------------------------
// TokioTimer
// ---------------------------------------------------------------------------

/// Reconnect timer backed by `tokio::time::sleep`.
pub struct TokioTimer {
    signals: SignalSender,
    pending: Option<CancellationToken>,
}

impl TokioTimer {
    /// Create an idle timer reporting to `signals`.
    pub fn new(signals: SignalSender) -> Self {
        Self {
            signals,
            pending: None,
        }
    }
}

impl Timer for TokioTimer {
    fn schedule(&mut self, delay: Duration, generation: Generation) {
        self.cancel();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Reconnect timer requires a Tokio runtime; reconnect not scheduled");
            return;
        };

        let token = CancellationToken::new();
        let cancel = token.clone();
        let signals = self.signals.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = signals.send(Signal::TimerFired(generation));
                }
            }
        });
        self.pending = Some(token);
    }

    fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
