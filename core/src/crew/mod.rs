//! Crew model and collaborator seams
//!
//! The step emitter only talks to the outside world through the two
//! synchronous traits below. Both may block for a long time; callers are
//! expected to run them off the async scheduler.

pub mod role;
pub mod task;

pub use role::{Role, RoleKind, ToolKind};
pub use task::{default_roles, default_tasks, Crew, SequencingPolicy, SubTask};

use std::sync::Arc;

use crate::error::PipelineExecutionError;

/// Read-only retrieval over a pre-built document index
pub trait DocumentLookup: Send + Sync {
    fn lookup(&self, question: &str) -> Result<String, PipelineExecutionError>;
}

/// Executes a crew to completion and returns its composed answer
pub trait PipelineRunner: Send + Sync {
    fn run_pipeline(
        &self,
        crew: &Crew,
        lookup: &dyn DocumentLookup,
    ) -> Result<String, PipelineExecutionError>;
}

/// Collaborators built once at startup and shared by every session
#[derive(Clone)]
pub struct Collaborators {
    pub lookup: Arc<dyn DocumentLookup>,
    pub runner: Arc<dyn PipelineRunner>,
}

impl Collaborators {
    pub fn new(lookup: Arc<dyn DocumentLookup>, runner: Arc<dyn PipelineRunner>) -> Self {
        Self { lookup, runner }
    }

    /// Run `crew` against the shared lookup
    pub fn run(&self, crew: &Crew) -> Result<String, PipelineExecutionError> {
        self.runner.run_pipeline(crew, self.lookup.as_ref())
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
