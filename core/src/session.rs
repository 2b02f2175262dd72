//! Connection session
//!
//! Drives one client connection through the protocol: receive the query,
//! acknowledge it, forward every progress record as it is pulled through the
//! bridge, then send the completion marker. While a pull is in flight the
//! session also watches for the client going away. The optional run deadline
//! covers the whole forwarding loop, sends included; whichever comes first
//! wins. The diagnostic and the close that follow are bounded by
//! `FAREWELL_TIMEOUT`.
//!
//! Leaving the stream loop drops the bridge stream. A pull that is still on
//! its worker at that point runs to completion and its result is discarded.

use futures_util::{Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::config::StreamConfig;
use crate::emitter::RecordResult;
use crate::error::{PipelineExecutionError, SessionError};
use crate::pool::WorkerPool;
use crate::protocol::{self, STREAM_COMPLETE};
use crate::transport::ClientChannel;

/// Upper bound on the diagnostic send and the close after a failed run
pub const FAREWELL_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a session. `Accepting` belongs to the server's handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepting,
    AwaitingQuery,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepting => "accepting",
            Self::AwaitingQuery => "awaiting_query",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a session ended. `records` counts progress records delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every record and the completion marker were delivered
    Completed { records: usize },
    /// Client went away; nothing more was sent
    Disconnected { records: usize },
    /// A collaborator failed; a diagnostic was attempted, no marker sent
    Failed {
        records: usize,
        error: PipelineExecutionError,
    },
    /// The run exceeded the configured deadline
    TimedOut { records: usize },
    /// The connection failed for a reason other than a clean disconnect
    TransportError { records: usize, message: String },
}

impl SessionOutcome {
    fn from_error(error: SessionError, records: usize) -> Self {
        match error {
            SessionError::ClientDisconnected => Self::Disconnected { records },
            SessionError::Pipeline(error) => Self::Failed { records, error },
            SessionError::TimedOut { .. } => Self::TimedOut { records },
            SessionError::Transport { message } => Self::TransportError { records, message },
            SessionError::Handshake { reason } => Self::TransportError {
                records,
                message: reason,
            },
        }
    }

    pub fn records(&self) -> usize {
        match self {
            Self::Completed { records }
            | Self::Disconnected { records }
            | Self::Failed { records, .. }
            | Self::TimedOut { records }
            | Self::TransportError { records, .. } => *records,
        }
    }
}

pub struct Session<C> {
    id: Uuid,
    channel: C,
    pool: WorkerPool,
    max_run: Option<Duration>,
    state: SessionState,
}

impl<C: ClientChannel> Session<C> {
    /// Session over an already-accepted channel
    pub fn new(channel: C, pool: WorkerPool, settings: &StreamConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            pool,
            max_run: settings.max_run(),
            state: SessionState::AwaitingQuery,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = %self.id, from = %self.state, to = %next, "Session state change");
        self.state = next;
    }

    /// Serve one query. `make_emitter` builds the blocking record source
    /// from the trimmed query text.
    pub async fn run<F, I>(&mut self, make_emitter: F) -> SessionOutcome
    where
        F: FnOnce(String) -> I,
        I: Iterator<Item = RecordResult> + Send + 'static,
    {
        let outcome = self.exchange(make_emitter).await;

        match &outcome {
            SessionOutcome::Completed { records } => {
                tracing::info!(session = %self.id, records, "Stream complete")
            }
            SessionOutcome::Disconnected { records } => {
                tracing::info!(session = %self.id, records, "Client disconnected")
            }
            SessionOutcome::Failed { records, error } => {
                tracing::warn!(session = %self.id, records, stage = %error.stage, "Pipeline failed: {}", error.message)
            }
            SessionOutcome::TimedOut { records } => {
                tracing::warn!(session = %self.id, records, "Pipeline run timed out")
            }
            SessionOutcome::TransportError { records, message } => {
                tracing::warn!(session = %self.id, records, "Transport error: {}", message)
            }
        }

        if !matches!(outcome, SessionOutcome::Disconnected { .. })
            && tokio::time::timeout(FAREWELL_TIMEOUT, self.channel.close())
                .await
                .is_err()
        {
            tracing::debug!(session = %self.id, "Close did not finish in time");
        }
        self.transition(SessionState::Closed);
        outcome
    }

    async fn exchange<F, I>(&mut self, make_emitter: F) -> SessionOutcome
    where
        F: FnOnce(String) -> I,
        I: Iterator<Item = RecordResult> + Send + 'static,
    {
        let query = match self.channel.recv_text().await {
            Ok(text) => text.trim().to_string(),
            Err(e) => return SessionOutcome::from_error(e, 0),
        };
        tracing::info!(session = %self.id, query = %query, "Received query");

        if let Err(e) = self.channel.send_text(protocol::acknowledgment(&query)).await {
            return SessionOutcome::from_error(e, 0);
        }

        self.transition(SessionState::Streaming);
        let bridge = Bridge::new(make_emitter(query), self.pool.clone());
        let delivered = match self.forward(bridge).await {
            Ok(delivered) => delivered,
            Err((error, delivered)) => return self.fail(error, delivered).await,
        };

        match self.channel.send_text(STREAM_COMPLETE.to_string()).await {
            Ok(()) => SessionOutcome::Completed { records: delivered },
            Err(e) => SessionOutcome::from_error(e, delivered),
        }
    }

    /// Forward records until the source ends, returning how many were sent
    async fn forward<I>(&mut self, bridge: Bridge<I>) -> Result<usize, (SessionError, usize)>
    where
        I: Iterator<Item = RecordResult> + Send + 'static,
    {
        let records = bridge.into_stream();
        futures_util::pin_mut!(records);

        let deadline = self.max_run.map(|limit| (Instant::now() + limit, limit));
        let mut delivered = 0;

        let result = tokio::select! {
            result = self.pump(records, &mut delivered) => result,
            limit = expire(deadline) => Err(SessionError::TimedOut { duration: limit }),
        };

        match result {
            Ok(()) => Ok(delivered),
            Err(e) => Err((e, delivered)),
        }
    }

    /// Pull and send until the source ends, counting sends into `delivered`
    async fn pump<S>(&mut self, mut records: S, delivered: &mut usize) -> Result<(), SessionError>
    where
        S: Stream<Item = RecordResult> + Unpin,
    {
        loop {
            let item = tokio::select! {
                item = records.next() => item,
                reason = self.channel.closed() => return Err(reason),
            };

            let record = match item {
                Some(Ok(record)) => record,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            };

            tracing::trace!(session = %self.id, seq = record.seq(), "Forwarding record");
            self.channel.send_text(record.into_text()).await?;
            *delivered += 1;
        }
    }

    async fn fail(&mut self, error: SessionError, records: usize) -> SessionOutcome {
        let reportable = matches!(
            error,
            SessionError::Pipeline(_) | SessionError::TimedOut { .. }
        );
        if reportable {
            let message = match &error {
                SessionError::Pipeline(e) => protocol::diagnostic(&e.message),
                other => protocol::diagnostic(other),
            };
            match tokio::time::timeout(FAREWELL_TIMEOUT, self.channel.send_text(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(session = %self.id, "Could not deliver diagnostic: {}", e)
                }
                Err(_) => tracing::debug!(session = %self.id, "Diagnostic send timed out"),
            }
        }
        SessionOutcome::from_error(error, records)
    }
}

async fn expire(deadline: Option<(Instant, Duration)>) -> Duration {
    match deadline {
        Some((at, limit)) => {
            tokio::time::sleep_until(at).await;
            limit
        }
        None => std::future::pending().await,
    }
}
