//! Structured error types for crewstream
//!
//! Every recoverable failure is session-local. Only `PipelineExecutionError`
//! crosses the emitter -> bridge -> session path; the rest describe what went
//! wrong with the connection itself or with startup configuration.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external collaborator while a step emitter was running
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pipeline execution failed during {stage}: {message}")]
pub struct PipelineExecutionError {
    /// Which collaborator step failed (`lookup`, `run_pipeline`, `worker`, ...)
    pub stage: String,
    pub message: String,
}

impl PipelineExecutionError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Failure raised by a document lookup
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::new("lookup", message)
    }

    /// Failure raised by the blocking crew run
    pub fn run_pipeline(message: impl Into<String>) -> Self {
        Self::new("run_pipeline", message)
    }

    /// Failure of the execution context a pull was offloaded to
    pub fn worker(message: impl Into<String>) -> Self {
        Self::new("worker", message)
    }
}

/// Errors produced by the blocking worker pool
#[derive(Error, Debug)]
pub enum OffloadError {
    /// The pool's semaphore was closed; no more work is accepted
    #[error("worker pool is closed")]
    PoolClosed,

    /// The offloaded closure panicked or was cancelled by the runtime
    #[error("offloaded work did not complete: {0}")]
    Join(String),
}

impl From<OffloadError> for PipelineExecutionError {
    fn from(err: OffloadError) -> Self {
        PipelineExecutionError::worker(err.to_string())
    }
}

/// Errors that end a single connection session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Upgrade handshake failed; the session never reached `AwaitingQuery`
    #[error("handshake failed: {reason}")]
    Handshake { reason: String },

    /// Client went away. Expected, logged but never surfaced
    #[error("client disconnected")]
    ClientDisconnected,

    /// Transport-level failure other than a clean disconnect
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Collaborator failure propagated through the bridge
    #[error(transparent)]
    Pipeline(#[from] PipelineExecutionError),

    /// Pipeline run exceeded the configured limit
    #[error("pipeline run exceeded {}s", duration.as_secs())]
    TimedOut { duration: Duration },
}

impl SessionError {
    /// Disconnects are normal terminations, not failures
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ClientDisconnected)
    }
}

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("failed to write configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
