//! Sub-tasks and crew assembly

use serde::{Deserialize, Serialize};

use super::role::{Role, RoleKind};
use crate::error::PipelineExecutionError;

/// A unit of work assigned to one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub description: String,
    pub expected_output: String,
    pub assigned_role: RoleKind,
}

impl SubTask {
    pub fn new(
        description: impl Into<String>,
        expected_output: impl Into<String>,
        assigned_role: RoleKind,
    ) -> Self {
        Self {
            description: description.into(),
            expected_output: expected_output.into(),
            assigned_role,
        }
    }
}

/// Order in which a crew's sub-tasks execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SequencingPolicy {
    /// One after another, each seeing the previous outputs
    #[default]
    Sequential,
}

/// Roles, their sub-tasks and the policy that orders them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crew {
    pub roles: Vec<Role>,
    pub tasks: Vec<SubTask>,
    pub policy: SequencingPolicy,
}

impl Crew {
    /// Assemble a crew, rejecting tasks assigned to a role it does not have
    pub fn new(
        roles: Vec<Role>,
        tasks: Vec<SubTask>,
        policy: SequencingPolicy,
    ) -> Result<Self, PipelineExecutionError> {
        let crew = Self {
            roles,
            tasks,
            policy,
        };
        crew.validate()?;
        Ok(crew)
    }

    pub fn validate(&self) -> Result<(), PipelineExecutionError> {
        if self.tasks.is_empty() {
            return Err(PipelineExecutionError::new(
                "configure_crew",
                "crew has no tasks",
            ));
        }
        for task in &self.tasks {
            if self.role(task.assigned_role).is_none() {
                return Err(PipelineExecutionError::new(
                    "configure_crew",
                    format!(
                        "task '{}' is assigned to {} which is not part of the crew",
                        task.description, task.assigned_role
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn role(&self, kind: RoleKind) -> Option<&Role> {
        self.roles.iter().find(|role| role.kind == kind)
    }

    /// Tasks in execution order with their assigned role
    pub fn schedule(&self) -> Vec<(&SubTask, &Role)> {
        match self.policy {
            SequencingPolicy::Sequential => self
                .tasks
                .iter()
                .filter_map(|task| self.role(task.assigned_role).map(|role| (task, role)))
                .collect(),
        }
    }
}

/// Roles of the document question-answering crew
pub fn default_roles() -> Vec<Role> {
    vec![Role::new(RoleKind::Analyst), Role::new(RoleKind::ContentWriter)]
}

/// Sub-tasks answering `query`: analyse, then rewrite for laypeople
pub fn default_tasks(query: &str) -> Vec<SubTask> {
    vec![
        SubTask::new(
            format!("Analyze the query: '{query}'"),
            "Bullet points with insights",
            RoleKind::Analyst,
        ),
        SubTask::new(
            "Convert findings into a short article for laypeople",
            "An engaging summary in 3-4 paragraphs",
            RoleKind::ContentWriter,
        ),
    ]
}
