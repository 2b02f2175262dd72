//! ClientChannel trait - the session's view of one client connection
//!
//! Text frames only. Implemented for tokio-tungstenite WebSocket streams and
//! for an in-memory channel used by tests and embedders.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::error::SessionError;

#[async_trait]
pub trait ClientChannel: Send {
    /// Wait for the next inbound text message.
    ///
    /// Returns `SessionError::ClientDisconnected` once the client has gone.
    async fn recv_text(&mut self) -> Result<String, SessionError>;

    /// Deliver one outbound text message
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    /// Resolve once inbound traffic ends, with the reason: a clean
    /// `ClientDisconnected` or a `Transport` failure. Inbound text received
    /// in the meantime is discarded, one query per connection.
    async fn closed(&mut self) -> SessionError {
        loop {
            match self.recv_text().await {
                Ok(extra) => {
                    tracing::debug!("Ignoring {} bytes of inbound text after the query", extra.len())
                }
                Err(reason) => return reason,
            }
        }
    }

    /// Release the connection after the last message
    async fn close(&mut self);
}

#[async_trait]
impl<S> ClientChannel for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv_text(&mut self) -> Result<String, SessionError> {
        while let Some(message) = self.next().await {
            match message.map_err(map_ws_error)? {
                Message::Text(text) => return Ok(text),
                Message::Close(_) => return Err(SessionError::ClientDisconnected),
                Message::Binary(data) => {
                    tracing::debug!("Ignoring {}-byte binary frame", data.len())
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Err(SessionError::ClientDisconnected)
    }

    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.send(Message::Text(text)).await.map_err(map_ws_error)
    }

    async fn close(&mut self) {
        if let Err(e) = WebSocketStream::close(self, None).await {
            tracing::debug!("Close handshake did not complete: {}", e);
        }
    }
}

fn map_ws_error(err: WsError) -> SessionError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Io(_)
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
        | WsError::Protocol(ProtocolError::SendAfterClosing) => SessionError::ClientDisconnected,
        other => SessionError::Transport {
            message: other.to_string(),
        },
    }
}

/// Server side of an in-memory connection
pub struct MemoryChannel {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

/// Client side of an in-memory connection.
///
/// Dropping `to_server` disconnects inbound; dropping `from_server` makes
/// every later send fail as a disconnect.
pub struct MemoryClient {
    pub to_server: mpsc::UnboundedSender<String>,
    pub from_server: mpsc::UnboundedReceiver<String>,
}

impl MemoryClient {
    /// Receive everything the server sends until it closes the channel
    pub async fn drain(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(message) = self.from_server.recv().await {
            messages.push(message);
        }
        messages
    }
}

/// Creates a connected in-memory channel pair
pub fn memory_pair() -> (MemoryChannel, MemoryClient) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            inbound,
            outbound: Some(outbound),
        },
        MemoryClient {
            to_server,
            from_server,
        },
    )
}

#[async_trait]
impl ClientChannel for MemoryChannel {
    async fn recv_text(&mut self) -> Result<String, SessionError> {
        self.inbound
            .recv()
            .await
            .ok_or(SessionError::ClientDisconnected)
    }

    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        match &self.outbound {
            Some(outbound) => outbound
                .send(text)
                .map_err(|_| SessionError::ClientDisconnected),
            None => Err(SessionError::ClientDisconnected),
        }
    }

    async fn close(&mut self) {
        self.outbound = None;
    }
}
