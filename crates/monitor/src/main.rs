//! `taskpulse-monitor` -- follows the job processor's progress channel.
//!
//! Connects to the progress WebSocket, logs every progress, queue,
//! connection and error event, and optionally asks the server to follow
//! specific tasks. Runs until Ctrl-C.
//!
//! # Environment variables
//!
//! Client settings (`TASKPULSE_WS_URL`, reconnect and buffer tuning) are
//! read by [`ClientConfig::from_env`]. In addition:
//!
//! | Variable             | Required | Default | Description                          |
//! |----------------------|----------|---------|--------------------------------------|
//! | `TASKPULSE_TASK_IDS` | no       | --      | Comma-separated task IDs to follow   |

use std::sync::Arc;

use taskpulse_client::{ClientConfig, ClientEvent, ProgressClient};
use taskpulse_events::Dispatcher;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpulse_monitor=info,taskpulse_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env()?;
    let task_ids = task_ids_from_env();

    tracing::info!(
        url = %config.url,
        buffer_capacity = ?config.buffer_capacity,
        tasks = task_ids.len(),
        "Starting taskpulse-monitor",
    );

    let dispatcher = Arc::new(Dispatcher::<ClientEvent>::default());
    let client = ProgressClient::start(config, dispatcher);
    let connection = client.connection();

    connection.subscribe_to_progress(|update| match update.progress() {
        Ok(progress) => tracing::info!(
            task_id = update.task_id.as_deref().unwrap_or("-"),
            percent = progress.progress_percent(),
            stage = progress.stage_label().unwrap_or("-"),
            eta_secs = progress.eta().map(|d| d.as_secs()),
            "Progress",
        ),
        Err(e) => tracing::warn!(error = %e, data = %update.data, "Unreadable progress payload"),
    });

    connection.subscribe_to_queue(|update| match update.queue() {
        Ok(queue) => tracing::info!(
            queue_length = queue.queue_length,
            wait_secs = queue.total_wait().map(|d| d.as_secs()),
            "Queue",
        ),
        Err(e) => tracing::warn!(error = %e, data = %update.data, "Unreadable queue payload"),
    });

    connection.subscribe_to_connection(|change| {
        if change.connected {
            tracing::info!("Connected");
        } else {
            tracing::warn!("Disconnected, waiting to reconnect");
        }
    });

    connection.subscribe_to_errors(|error| {
        tracing::warn!(error = %error, "Client error");
    });

    // Sent now if already open, otherwise flushed on connect.
    for task_id in task_ids {
        connection.subscribe_task(task_id);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!(status = ?connection.status(), "Received shutdown signal");

    client.shutdown().await;
    Ok(())
}

/// Parse `TASKPULSE_TASK_IDS` into a list, skipping blanks.
fn task_ids_from_env() -> Vec<String> {
    std::env::var("TASKPULSE_TASK_IDS")
        .map(|raw| parse_task_ids(&raw))
        .unwrap_or_default()
}

fn parse_task_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
