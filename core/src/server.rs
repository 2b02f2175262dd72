//! WebSocket server
//!
//! Accepts TCP connections, upgrades the ones addressed to the configured
//! path and hands each to its own `Session` task. Sessions share only the
//! immutable config, the collaborators and the worker pool.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::Instrument;

use crate::config::Config;
use crate::crew::Collaborators;
use crate::emitter::StepEmitter;
use crate::error::SessionError;
use crate::index::DocumentIndex;
use crate::pool::WorkerPool;
use crate::runner;
use crate::session::{Session, SessionState};

/// Build the lookup and runner described by `config`. Blocks while the
/// embedding model loads.
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let index = DocumentIndex::load(&config.index)
        .with_context(|| format!("Failed to load documents from {}", config.index.data_dir.display()))?;
    tracing::info!(
        passages = index.len(),
        retrieval = if index.is_semantic() { "embeddings" } else { "terms" },
        backend = ?config.pipeline.backend,
        "Collaborators ready"
    );
    Ok(Collaborators::new(
        Arc::new(index),
        runner::from_config(&config.pipeline),
    ))
}

pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    collaborators: Collaborators,
    pool: WorkerPool,
}

impl Server {
    pub async fn bind(config: Arc<Config>, collaborators: Collaborators) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind server to {addr}"))?;
        let pool = WorkerPool::new(config.workers.max_blocking);

        Ok(Self {
            listener,
            config,
            collaborators,
            pool,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections until `shutdown` resolves. Sessions already
    /// running are left to finish on their own tasks.
    pub async fn serve<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        tracing::info!(
            "Listening on ws://{}{} ({} blocking workers)",
            addr,
            self.config.server.path,
            self.pool.capacity()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },
            }
        }

        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let config = self.config.clone();
        let collaborators = self.collaborators.clone();
        let pool = self.pool.clone();

        let span = tracing::info_span!("session", peer = %peer, id = tracing::field::Empty);
        tokio::spawn(
            async move {
                let ws_stream = match accept_session(stream, &config.server.path).await {
                    Ok(ws_stream) => ws_stream,
                    Err(e) => {
                        tracing::debug!("{}", e);
                        return;
                    }
                };

                let mut session = Session::new(ws_stream, pool, &config.stream);
                tracing::Span::current().record("id", tracing::field::display(session.id()));
                tracing::debug!("Handshake complete");
                let settings = config.stream.clone();
                session
                    .run(move |query| StepEmitter::new(query, collaborators, settings))
                    .await;
            }
            .instrument(span),
        );
    }
}

/// Complete the WebSocket upgrade, rejecting requests for any other path
pub async fn accept_session(
    stream: TcpStream,
    path: &str,
) -> Result<WebSocketStream<TcpStream>, SessionError> {
    tracing::debug!(state = %SessionState::Accepting, "Upgrading connection");
    let expected = path.to_string();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == expected {
            return Ok(response);
        }
        let mut rejection = ErrorResponse::new(Some(format!(
            "No WebSocket endpoint at {}",
            request.uri().path()
        )));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    };

    accept_hdr_async(stream, callback)
        .await
        .map_err(|e| SessionError::Handshake {
            reason: e.to_string(),
        })
}
