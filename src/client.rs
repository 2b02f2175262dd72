//! Minimal WebSocket client for the `ask` subcommand

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crewstream_core::protocol::{ERROR_PREFIX, STREAM_COMPLETE};

/// Send `query` and print every message until the server closes.
///
/// Fails when the stream ends with a diagnostic or without the completion
/// marker.
pub async fn ask(url: &str, query: &str) -> Result<()> {
    let (mut ws_stream, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;
    tracing::debug!("Connected to {}", url);

    ws_stream
        .send(Message::Text(query.to_string()))
        .await
        .context("Failed to send query")?;

    let mut last = None;
    while let Some(message) = ws_stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                print!("{}", text);
                if !text.ends_with('\n') {
                    println!();
                }
                last = Some(text);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Connection ended: {}", e);
                break;
            }
        }
    }

    match last.as_deref() {
        Some(STREAM_COMPLETE) => Ok(()),
        Some(text) if text.starts_with(ERROR_PREFIX) => bail!("Server reported a failure"),
        _ => bail!("Stream ended before completion"),
    }
}
