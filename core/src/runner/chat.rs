//! Chat completions crew execution
//!
//! Sequential crew run against an OpenAI-compatible `/chat/completions`
//! endpoint (Groq, OpenRouter, a local server...). The HTTP client is blocking
//! and is created inside `run_pipeline`, which always runs on a worker thread.
//!
//! Roles holding the document lookup tool get a written answer rather than
//! raw passages: the retrieved passages go to the model once more, at
//! `lookup_temperature`, and the reply becomes that role's context.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::crew::{Crew, DocumentLookup, PipelineRunner, Role, RoleKind, SubTask, ToolKind};
use crate::error::PipelineExecutionError;
use crate::index::NO_MATCHES;

const LOOKUP_PROMPT: &str = "Answer the question using only the passages provided. \
If the passages do not contain the answer, say that the documents do not cover it.";

pub struct ChatCompletionsRunner {
    settings: PipelineConfig,
}

impl ChatCompletionsRunner {
    pub fn new(settings: PipelineConfig) -> Self {
        Self { settings }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    fn build_client(&self) -> Result<reqwest::blocking::Client, PipelineExecutionError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| PipelineExecutionError::run_pipeline("API key is not a valid header value"))?;
            headers.insert(AUTHORIZATION, value);
        }

        reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .build()
            .map_err(|e| PipelineExecutionError::run_pipeline(format!("Failed to build HTTP client: {e}")))
    }

    fn complete(
        &self,
        client: &reqwest::blocking::Client,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, PipelineExecutionError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages,
            temperature,
            max_tokens,
            stream: false,
        };

        let response = client
            .post(self.endpoint())
            .json(&body)
            .send()
            .map_err(|e| PipelineExecutionError::run_pipeline(format!("Request failed: {e}")))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|e| PipelineExecutionError::run_pipeline(format!("Failed to read response: {e}")))?;

        parse_completion(status, &text)
    }

    /// Look `question` up and have the model answer it from the passages
    fn answer_from_documents(
        &self,
        client: &reqwest::blocking::Client,
        lookup: &dyn DocumentLookup,
        question: &str,
    ) -> Result<String, PipelineExecutionError> {
        let passages = lookup.lookup(question)?;
        if passages == NO_MATCHES {
            return Ok(passages);
        }

        tracing::debug!(model = %self.settings.model, "Writing answer from passages");
        self.complete(
            client,
            lookup_messages(question, &passages),
            self.settings.lookup_temperature,
            self.settings.lookup_max_tokens,
        )
    }
}

impl PipelineRunner for ChatCompletionsRunner {
    fn run_pipeline(
        &self,
        crew: &Crew,
        lookup: &dyn DocumentLookup,
    ) -> Result<String, PipelineExecutionError> {
        crew.validate()?;
        let client = self.build_client()?;

        let mut outputs: Vec<(RoleKind, String)> = Vec::new();
        for (task, role) in crew.schedule() {
            let context = if role.can_use(ToolKind::DocumentLookup) {
                Some(self.answer_from_documents(&client, lookup, &task.description)?)
            } else {
                None
            };

            tracing::debug!(role = role.kind.name(), model = %self.settings.model, "Requesting completion");
            let answer = self.complete(
                &client,
                build_messages(role, task, context.as_deref(), &outputs),
                self.settings.temperature,
                self.settings.max_tokens,
            )?;
            outputs.push((role.kind, answer));
        }

        outputs
            .pop()
            .map(|(_, answer)| answer)
            .ok_or_else(|| PipelineExecutionError::run_pipeline("crew produced no output"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_messages(
    role: &Role,
    task: &SubTask,
    context: Option<&str>,
    previous: &[(RoleKind, String)],
) -> Vec<ChatMessage> {
    let mut prompt = format!(
        "Task: {}\nExpected output: {}",
        task.description, task.expected_output
    );
    if let Some(context) = context {
        prompt.push_str("\n\nAnswer from the document index:\n");
        prompt.push_str(context);
    }
    for (kind, output) in previous {
        prompt.push_str(&format!("\n\nOutput from the {}:\n{}", kind.name(), output));
    }

    vec![
        ChatMessage {
            role: "system",
            content: role.persona_prompt(),
        },
        ChatMessage {
            role: "user",
            content: prompt,
        },
    ]
}

fn lookup_messages(question: &str, passages: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system",
            content: LOOKUP_PROMPT.to_string(),
        },
        ChatMessage {
            role: "user",
            content: format!("Question: {question}\n\nPassages:\n{passages}"),
        },
    ]
}

fn parse_completion(status: u16, body: &str) -> Result<String, PipelineExecutionError> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(PipelineExecutionError::run_pipeline(format!(
            "API request failed ({status}): {detail}"
        )));
    }

    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        PipelineExecutionError::run_pipeline(format!("Failed to parse completion response: {e}"))
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| PipelineExecutionError::run_pipeline("completion response had no content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::{default_roles, default_tasks, SequencingPolicy};
    use crate::index::DocumentIndex;
    use mockito::Matcher;
    use serde_json::json;

    fn completion(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    fn runner_for(server: &mockito::Server) -> ChatCompletionsRunner {
        ChatCompletionsRunner::new(PipelineConfig {
            backend: crate::config::PipelineBackend::ChatCompletions,
            base_url: server.url(),
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            ..Default::default()
        })
    }

    fn uber_index() -> DocumentIndex {
        DocumentIndex::from_documents(
            vec![("uber-10k.txt", "Uber revenue grew 26% to $14.1 billion in 2019.")],
            5,
        )
    }

    #[test]
    fn test_lookup_role_gets_written_answer() {
        let mut server = mockito::Server::new();
        let answer = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"temperature": 0.0, "max_tokens": 1000})),
                Matcher::Regex(r"Passages:\\n\[uber-10k\.txt\] Uber revenue grew 26%".to_string()),
            ]))
            .with_status(200)
            .with_body(completion("Uber earned $14.1 billion in 2019."))
            .expect(1)
            .create();
        let analyst = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"max_tokens": 4000})),
                Matcher::Regex(
                    r"Answer from the document index:\\nUber earned \$14\.1 billion".to_string(),
                ),
            ]))
            .with_status(200)
            .with_body(completion("- Revenue: $14.1B"))
            .expect(1)
            .create();
        let writer = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"max_tokens": 4000})),
                Matcher::Regex(r"Output from the Analyst:\\n- Revenue".to_string()),
            ]))
            .with_status(200)
            .with_body(completion("Uber made $14.1 billion."))
            .expect(1)
            .create();

        let crew = Crew::new(
            default_roles(),
            default_tasks("Uber revenue"),
            SequencingPolicy::Sequential,
        )
        .expect("valid crew");
        let result = runner_for(&server)
            .run_pipeline(&crew, &uber_index())
            .expect("run succeeds");

        assert_eq!(result, "Uber made $14.1 billion.");
        answer.assert();
        analyst.assert();
        writer.assert();
    }

    #[test]
    fn test_no_matches_skips_answer_request() {
        let mut server = mockito::Server::new();
        let answer = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"max_tokens": 1000})))
            .expect(0)
            .create();

        let runner = runner_for(&server);
        let client = runner.build_client().expect("client");
        let context = runner
            .answer_from_documents(&client, &uber_index(), "weather in Paris")
            .expect("lookup");

        assert_eq!(context, NO_MATCHES);
        answer.assert();
    }

    #[test]
    fn test_build_messages_for_lookup_role() {
        let role = Role::new(RoleKind::Analyst);
        let tasks = default_tasks("growth");
        let task = &tasks[0];
        let messages = build_messages(&role, task, Some("Revenue grew 26%."), &[]);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("You are the Analyst."));
        assert_eq!(
            messages[1].content,
            "Task: Analyze the query: 'growth'\n\
             Expected output: Bullet points with insights\n\n\
             Answer from the document index:\n\
             Revenue grew 26%."
        );
    }

    #[test]
    fn test_build_messages_carries_previous_outputs() {
        let role = Role::new(RoleKind::ContentWriter);
        let tasks = default_tasks("growth");
        let task = &tasks[1];
        let previous = vec![(RoleKind::Analyst, "- revenue up".to_string())];
        let messages = build_messages(&role, task, None, &previous);
        assert!(messages[1]
            .content
            .ends_with("Output from the Analyst:\n- revenue up"));
        assert!(!messages[1].content.contains("Answer from the document index"));
    }

    #[test]
    fn test_parse_completion_success() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Revenue rose."}}]}"#;
        assert_eq!(parse_completion(200, body).expect("parsed"), "Revenue rose.");
    }

    #[test]
    fn test_parse_completion_api_error() {
        let body = r#"{"error":{"message":"Invalid API Key","type":"invalid_request_error"}}"#;
        let err = parse_completion(401, body).expect_err("401 fails");
        assert_eq!(err.stage, "run_pipeline");
        assert_eq!(err.message, "API request failed (401): Invalid API Key");
    }

    #[test]
    fn test_parse_completion_empty_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(parse_completion(200, body).is_err());
        assert!(parse_completion(200, "not json").is_err());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let runner = ChatCompletionsRunner::new(PipelineConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..Default::default()
        });
        assert_eq!(runner.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
