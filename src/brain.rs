use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{ModelConfig, PromptConfig};
use crate::dom::truncate_with_marker;
use crate::error::AgentError;
use crate::types::{Action, ActionResult, ChatMessage, PageState};

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real Chrome browser by issuing ONE action at a time as JSON.

Available actions:
- {"type":"Navigate","url":"https://..."}
- {"type":"Click","selector":"[data-eid=\"e0\"]"}
- {"type":"Type","selector":"[data-eid=\"e0\"]","text":"search query"}
- {"type":"PressKey","key":"Enter"}
- {"type":"Scroll","direction":"down"} or {"type":"Scroll","selector":"[data-eid=\"e0\"]"}
- {"type":"Wait","duration_ms":1000}
- {"type":"Extract","query":"[data-eid=\"e0\"]"}
- {"type":"Finish","summary":"Completed: found the answer is 42"}

Rules:
1. Return ONLY a single JSON object per response. No markdown, no explanation.
2. Use the [eN] element ids from the DOM outline to target elements. Use selector format: [data-eid="eN"]
3. After each action, the system shows you the new page. Decide your next action from what you see.
4. Use Type to fill inputs, then PressKey with "Enter" to submit. Or Click the submit button.
5. When the task is accomplished, use Finish with a summary of what was achieved.
6. If an action failed, the failure is recorded in the history. Try an alternative approach. If stuck after 3 attempts, use Finish to explain.
7. Keep actions minimal. Do not over-navigate."#;

/// Language-model capability. One request/response call; the executor owns
/// retries. Implementations must be substitutable with deterministic stubs.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError>;
}

#[async_trait]
impl<M: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<M> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        (**self).complete(messages).await
    }
}

/// Chat-completions backend.
#[derive(Clone)]
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    config: ModelConfig,
}

impl OpenAiChat {
    pub fn new(api_key: String, config: ModelConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            config,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await
            .map_err(|e| AgentError::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::ModelUnavailable(e.to_string()))?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown API error");
            warn!(%status, "model API error: {message}");
            return Err(AgentError::ModelUnavailable(format!("{status}: {message}")));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AgentError::MalformedResponse(format!("no content in response: {body}")))
    }
}

/// Deterministic model used for tests and offline dry runs: replays a fixed
/// sequence of canned responses.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, AgentError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::ModelUnavailable("scripted responses exhausted".into()))
    }
}

/// Maps (instruction, history, current page) to the next intended action.
/// Stateless between calls; the caller-supplied history is the only context.
pub struct Translator<M> {
    model: M,
    config: PromptConfig,
}

impl<M: LanguageModel> Translator<M> {
    pub fn new(model: M, config: PromptConfig) -> Self {
        Self { model, config }
    }

    pub async fn translate(
        &self,
        instruction: &str,
        history: &[ActionResult],
        page: &PageState,
    ) -> Result<Action, AgentError> {
        let messages = self.build_messages(instruction, history, page);
        let content = self.model.complete(&messages).await?;
        debug!("model says: {content}");
        parse_action(&content)
    }

    /// Assemble a bounded prompt: system rules, the task, the most recent
    /// history entries (oldest dropped first) and the current observation.
    fn build_messages(
        &self,
        instruction: &str,
        history: &[ActionResult],
        page: &PageState,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!("Task: {instruction}")),
        ];

        let start = history.len().saturating_sub(self.config.max_history);
        if start > 0 {
            messages.push(ChatMessage::user(format!("({start} earlier steps omitted)")));
        }
        for result in &history[start..] {
            let action_json =
                serde_json::to_string(&result.action).unwrap_or_else(|_| "{}".to_string());
            messages.push(ChatMessage::assistant(action_json));
            messages.push(ChatMessage::user(render_outcome(result)));
        }

        messages.push(ChatMessage::user(format!(
            "Page URL: {}\nTitle: {}\n\nDOM outline:\n{}\n\nWhat is your next action? Respond with a single JSON object.",
            page.url,
            page.title,
            truncate_with_marker(&page.outline, self.config.max_outline_chars),
        )));
        messages
    }
}

fn render_outcome(result: &ActionResult) -> String {
    if result.success {
        match &result.detail {
            Some(text) => format!("Result: ok\nExtracted: {text}"),
            None => "Result: ok".to_string(),
        }
    } else {
        format!(
            "Result: FAILED ({})",
            result.detail.as_deref().unwrap_or("no detail")
        )
    }
}

/// Parse the model's reply into an action. Markdown fences are tolerated;
/// anything else unparseable fails rather than guessing.
pub fn parse_action(content: &str) -> Result<Action, AgentError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned)
        .map_err(|e| AgentError::MalformedResponse(format!("{e}; content: {cleaned}")))
}
