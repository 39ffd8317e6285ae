//! Holds one connection open until Ctrl-C, echoing traffic to the log.
//!
//! Lines typed on stdin are sent as text messages.

use std::sync::Arc;

use anyhow::Context;
use tether_connection::{Callbacks, ConnectionEvent, ConnectionManager};
use tether_transport::WsTransport;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let callbacks = Callbacks::new()
        .on_connect(|| async {
            tracing::info!("session established");
        })
        .on_reconnect(|attempt| async move {
            tracing::info!(attempt, "session recovered");
        })
        .on_disconnect(|reason| tracing::warn!(reason, "session lost"))
        .on_error(|e| tracing::error!(error = %e, "connection error"))
        .on_message(|text| tracing::info!(len = text.len(), "<- {text}"));

    let manager = ConnectionManager::new(
        config.manager_options(),
        Arc::new(WsTransport::new()),
        callbacks,
    )
    .context("invalid connection settings")?;
    let mut events = manager
        .take_events()
        .context("connection events already taken")?;

    manager.connect().await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break Ok(());
            }
            event = events.recv() => match event {
                Some(ConnectionEvent::StateChanged { from, to }) => {
                    tracing::info!(%from, %to, "connection state");
                }
                Some(ConnectionEvent::Exhausted { attempts }) => {
                    break Err(anyhow::anyhow!(
                        "could not reach {} after {attempts} attempts",
                        manager.url()
                    ));
                }
                None => break Ok(()),
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    if let Err(e) = manager.send(line) {
                        tracing::warn!(error = %e, "message not sent");
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    };

    manager.disconnect().await;
    result
}
