//! Offline crew execution
//!
//! Runs the crew sequentially without network access: lookup roles quote the
//! document index, other roles restate the previous sub-task's output.

use crate::crew::{Crew, DocumentLookup, PipelineRunner, ToolKind};
use crate::error::PipelineExecutionError;

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRunner;

impl OfflineRunner {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineRunner for OfflineRunner {
    fn run_pipeline(
        &self,
        crew: &Crew,
        lookup: &dyn DocumentLookup,
    ) -> Result<String, PipelineExecutionError> {
        crew.validate()?;

        let mut sections = Vec::new();
        let mut previous: Option<String> = None;

        for (task, role) in crew.schedule() {
            tracing::debug!(role = role.kind.name(), "Running sub-task: {}", task.description);

            let output = if role.can_use(ToolKind::DocumentLookup) {
                as_bullets(&lookup.lookup(&task.description)?)
            } else {
                match &previous {
                    Some(findings) => plain_summary(findings),
                    None => task.description.clone(),
                }
            };

            sections.push(format!("## {}\n{}", role.kind.name(), output));
            previous = Some(output);
        }

        Ok(sections.join("\n\n"))
    }
}

fn as_bullets(findings: &str) -> String {
    findings
        .split("\n\n")
        .map(str::trim)
        .filter(|finding| !finding.is_empty())
        .map(|finding| format!("- {finding}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn plain_summary(findings: &str) -> String {
    let sentences: Vec<&str> = findings
        .lines()
        .map(|line| line.trim().trim_start_matches("- "))
        .map(strip_source_tag)
        .filter(|line| !line.is_empty())
        .collect();

    format!("In plain terms: {}", sentences.join(" "))
}

fn strip_source_tag(line: &str) -> &str {
    if line.starts_with('[') {
        if let Some(end) = line.find("] ") {
            return &line[end + 2..];
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::{default_roles, default_tasks, Role, RoleKind, SequencingPolicy};
    use crate::index::DocumentIndex;

    #[test]
    fn test_sequential_run() {
        let index = DocumentIndex::from_documents(
            vec![(
                "uber.txt",
                "Uber revenue reached $14.1 billion.\n\nUber operates in 69 countries.",
            )],
            5,
        );
        let crew = Crew::new(
            default_roles(),
            default_tasks("Uber revenue"),
            SequencingPolicy::Sequential,
        )
        .expect("valid crew");

        let result = OfflineRunner::new()
            .run_pipeline(&crew, &index)
            .expect("run succeeds");

        assert_eq!(
            result,
            "## Analyst\n\
             - [uber.txt] Uber revenue reached $14.1 billion.\n\
             - [uber.txt] Uber operates in 69 countries.\n\n\
             ## Content Writer\n\
             In plain terms: Uber revenue reached $14.1 billion. Uber operates in 69 countries."
        );
    }

    #[test]
    fn test_lookup_failure_propagates() {
        struct Broken;
        impl DocumentLookup for Broken {
            fn lookup(&self, _: &str) -> Result<String, PipelineExecutionError> {
                Err(PipelineExecutionError::lookup("index offline"))
            }
        }

        let crew = Crew::new(
            default_roles(),
            default_tasks("anything"),
            SequencingPolicy::Sequential,
        )
        .expect("valid crew");
        let err = OfflineRunner::new()
            .run_pipeline(&crew, &Broken)
            .expect_err("lookup fails");
        assert_eq!(err.stage, "lookup");
    }

    #[test]
    fn test_role_without_tools_skips_lookup() {
        struct Unreachable;
        impl DocumentLookup for Unreachable {
            fn lookup(&self, _: &str) -> Result<String, PipelineExecutionError> {
                panic!("lookup must not be called");
            }
        }

        let crew = Crew::new(
            vec![Role::new(RoleKind::Analyst).with_tools(Vec::new())],
            vec![default_tasks("q").remove(0)],
            SequencingPolicy::Sequential,
        )
        .expect("valid crew");
        let result = OfflineRunner::new()
            .run_pipeline(&crew, &Unreachable)
            .expect("run succeeds");
        assert_eq!(result, "## Analyst\nAnalyze the query: 'q'");
    }
}
