//! Pipeline runners
//!
//! Implementations of [`PipelineRunner`](crate::crew::PipelineRunner) selected
//! by `pipeline.backend`.

pub mod chat;
pub mod offline;

pub use chat::ChatCompletionsRunner;
pub use offline::OfflineRunner;

use std::sync::Arc;

use crate::config::{PipelineBackend, PipelineConfig};
use crate::crew::PipelineRunner;

/// Runner for the configured backend
pub fn from_config(settings: &PipelineConfig) -> Arc<dyn PipelineRunner> {
    match settings.backend {
        PipelineBackend::Offline => Arc::new(OfflineRunner::new()),
        PipelineBackend::ChatCompletions => Arc::new(ChatCompletionsRunner::new(settings.clone())),
    }
}
