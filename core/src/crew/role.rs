//! Crew roles
//!
//! A closed set of personas. Each role carries its goal, backstory and the
//! tools it may call while working on a sub-task.

use serde::{Deserialize, Serialize};

/// Which persona a role plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Researches the document index and extracts insights
    Analyst,
    /// Turns findings into prose for non-specialists
    ContentWriter,
}

impl RoleKind {
    /// Get the display name for this role
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyst => "Analyst",
            Self::ContentWriter => "Content Writer",
        }
    }

    /// Default goal for this role
    pub fn default_goal(&self) -> &'static str {
        match self {
            Self::Analyst => "Find insights",
            Self::ContentWriter => "Present insights clearly",
        }
    }

    /// Default backstory for this role
    pub fn default_backstory(&self) -> &'static str {
        match self {
            Self::Analyst => "Expert in tech reports and company filings",
            Self::ContentWriter => "Converts technical info into readable formats",
        }
    }

    /// Tools granted to this role unless overridden
    pub fn default_tools(&self) -> Vec<ToolKind> {
        match self {
            Self::Analyst => vec![ToolKind::DocumentLookup],
            Self::ContentWriter => Vec::new(),
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tools a role may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Read-only query against the shared document index
    DocumentLookup,
}

/// A role in the crew
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub kind: RoleKind,
    pub goal: String,
    pub backstory: String,
    pub tools: Vec<ToolKind>,
}

impl Role {
    /// Role with the default goal, backstory and tools of `kind`
    pub fn new(kind: RoleKind) -> Self {
        Self {
            kind,
            goal: kind.default_goal().to_string(),
            backstory: kind.default_backstory().to_string(),
            tools: kind.default_tools(),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolKind>) -> Self {
        self.tools = tools;
        self
    }

    pub fn can_use(&self, tool: ToolKind) -> bool {
        self.tools.contains(&tool)
    }

    /// System prompt describing this persona
    pub fn persona_prompt(&self) -> String {
        format!(
            "You are the {}. Your goal: {}. Background: {}.",
            self.kind.name(),
            self.goal,
            self.backstory
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roles() {
        let analyst = Role::new(RoleKind::Analyst);
        assert_eq!(analyst.goal, "Find insights");
        assert!(analyst.can_use(ToolKind::DocumentLookup));

        let writer = Role::new(RoleKind::ContentWriter);
        assert_eq!(writer.kind.name(), "Content Writer");
        assert!(!writer.can_use(ToolKind::DocumentLookup));
    }

    #[test]
    fn test_persona_prompt() {
        let role = Role::new(RoleKind::Analyst).with_goal("Spot revenue trends");
        assert_eq!(
            role.persona_prompt(),
            "You are the Analyst. Your goal: Spot revenue trends. Background: Expert in tech reports and company filings."
        );
    }
}
