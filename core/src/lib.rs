//! crewstream core
//!
//! Streams the progress of a blocking, multi-step document question-answering
//! crew to WebSocket clients. The step emitter is an ordinary blocking
//! iterator; the bridge pulls it on a bounded worker pool so a slow pull never
//! stalls other sessions; each connection session forwards records in order
//! and finishes with a completion marker.

pub mod bridge;
pub mod config;
pub mod crew;
pub mod emitter;
pub mod error;
pub mod index;
pub mod pool;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use bridge::Bridge;
pub use crate::config::Config;
pub use crew::{Collaborators, DocumentLookup, PipelineRunner};
pub use emitter::{ProgressRecord, StepEmitter};
pub use error::{PipelineExecutionError, SessionError};
pub use pool::WorkerPool;
pub use server::Server;
pub use session::{Session, SessionOutcome, SessionState};
pub use transport::ClientChannel;
