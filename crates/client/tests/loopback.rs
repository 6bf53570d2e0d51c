//! End-to-end tests against a loopback WebSocket server.
//!
//! A `tokio-tungstenite` server on 127.0.0.1 plays the job processor. The
//! client under test is the real `ProgressClient` with the Tokio transport
//! and timer.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use taskpulse_client::backoff::BackoffConfig;
use taskpulse_client::{ClientConfig, ClientEvent, ConnectionChange, ProgressClient};
use taskpulse_events::Dispatcher;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(tap: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, tap.recv())
        .await
        .expect("timed out waiting for event")
        .expect("tap closed")
}

fn fast_config(addr: std::net::SocketAddr) -> ClientConfig {
    ClientConfig {
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        },
        ..ClientConfig::new(format!("ws://{addr}"))
    }
}

// ---------------------------------------------------------------------------
// Test: full_state and subscribe round-trip over a real socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receives_full_state_and_sends_subscribe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, received_rx) = oneshot::channel::<String>();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let snapshot = json!({
            "type": "full_state",
            "data": {
                "current_task": {"progress": 0.25, "filename": "a.mp4"},
                "queue_state": {"queue_length": 3, "queue_files": ["b.mp4", "c.mp4"]},
            },
        });
        ws.send(Message::Text(snapshot.to_string())).await.unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(text) = frame {
                let _ = received_tx.send(text);
                break;
            }
        }
        // Hold the socket open until the client leaves.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let dispatcher = Arc::new(Dispatcher::<ClientEvent>::default());
    let mut tap = dispatcher.tap();
    let client = ProgressClient::start(fast_config(addr), dispatcher);

    assert_eq!(
        next_event(&mut tap).await,
        ClientEvent::ConnectionChange(ConnectionChange { connected: true })
    );

    let ClientEvent::ProgressUpdate(progress) = next_event(&mut tap).await else {
        panic!("expected progress_update first");
    };
    assert_eq!(progress.task_id.as_deref(), Some("current_task"));
    assert_eq!(progress.progress().unwrap().filename.as_deref(), Some("a.mp4"));

    let ClientEvent::QueueUpdate(queue) = next_event(&mut tap).await else {
        panic!("expected queue_update second");
    };
    assert_eq!(queue.queue().unwrap().queue_length, 3);

    client.connection().subscribe_task("task-7");
    let received = tokio::time::timeout(WAIT, received_rx)
        .await
        .expect("server never received the subscribe message")
        .unwrap();
    let received: serde_json::Value = serde_json::from_str(&received).unwrap();
    assert_eq!(received, json!({"type": "subscribe", "task_id": "task-7"}));

    client.shutdown().await;
    assert!(!client.connection().is_connected());
    let _ = tokio::time::timeout(WAIT, server).await;
}

// ---------------------------------------------------------------------------
// Test: the client reconnects after the server drops it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnects_after_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First session: close right after the handshake.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
        drop(ws);

        // Second session: stay up until the client leaves.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let dispatcher = Arc::new(Dispatcher::<ClientEvent>::default());
    let mut tap = dispatcher.tap();
    let client = ProgressClient::start(fast_config(addr), dispatcher);

    let mut changes = Vec::new();
    while changes.len() < 3 {
        if let ClientEvent::ConnectionChange(change) = next_event(&mut tap).await {
            changes.push(change.connected);
        }
    }
    assert_eq!(changes, vec![true, false, true]);
    assert_eq!(client.connection().status().retry_count, 0);

    client.shutdown().await;
    let _ = tokio::time::timeout(WAIT, server).await;
}

// ---------------------------------------------------------------------------
// Test: an unreachable server yields transport errors and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    // Bind then drop to get a port with nothing listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let dispatcher = Arc::new(Dispatcher::<ClientEvent>::default());
    let mut tap = dispatcher.tap();
    let client = ProgressClient::start(fast_config(addr), Arc::clone(&dispatcher));

    let mut errors = 0;
    while errors < 2 {
        if let ClientEvent::Error(_) = next_event(&mut tap).await {
            errors += 1;
        }
    }
    assert!(!client.connection().is_connected());

    client.shutdown().await;
}
