//! Wire protocol
//!
//! One text message in (the query), then, in order: the acknowledgment, one
//! message per progress record, and the completion marker. Every string the
//! server emits is built here.

/// Sent once after every progress record of a successful run
pub const STREAM_COMPLETE: &str = "Stream complete.";

/// Prefix of the best-effort diagnostic sent when a run fails
pub const ERROR_PREFIX: &str = "Error: ";

/// Echo of the received query, sent before any progress record
pub fn acknowledgment(query: &str) -> String {
    format!("Received query: {query}")
}

/// Diagnostic message sent before closing a failed session
pub fn diagnostic(description: impl std::fmt::Display) -> String {
    format!("{ERROR_PREFIX}{description}")
}

/// First record of every run
pub fn starting_analysis(query: &str) -> String {
    format!("Starting analysis for query: '{query}'\n")
}

pub const AGENTS_CONFIGURED: &str = "Agents configured. Starting tasks...\n";

pub const TASKS_DEFINED: &str = "Tasks defined. Running crew...\n";

/// Periodic working record, `step` is 1-based
pub fn working_step(step: usize, total: usize) -> String {
    format!("Processing... step {step}/{total} completed.\n")
}

/// Last record of a successful run
pub fn final_result(result: &str) -> String {
    format!("Final Result:\n{result}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_formats() {
        assert_eq!(acknowledgment("revenue?"), "Received query: revenue?");
        assert_eq!(acknowledgment(""), "Received query: ");
        assert_eq!(working_step(2, 3), "Processing... step 2/3 completed.\n");
        assert_eq!(final_result("done"), "Final Result:\ndone\n");
        assert_eq!(diagnostic("boom"), "Error: boom");
        assert_eq!(
            starting_analysis("What is Uber's revenue?"),
            "Starting analysis for query: 'What is Uber's revenue?'\n"
        );
    }
}
