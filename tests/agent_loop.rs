//! End-to-end task loop tests with deterministic stand-ins for the browser
//! and the language model.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use browser_agent::brain::{LanguageModel, ScriptedModel, Translator};
use browser_agent::config::{ExecutorConfig, HumanizeConfig, PromptConfig};
use browser_agent::error::{AgentError, ErrorKind};
use browser_agent::events::{EventKind, EventSink, RecordingSink};
use browser_agent::executor::TaskExecutor;
use browser_agent::hands::Browser;
use browser_agent::humanize::{Humanizer, Keystroke};
use browser_agent::types::{ChatMessage, PageState, ScrollDirection, TaskStatus};

/// Scripted browser: every mutating call yields a fresh page with a unique
/// URL, and the full call sequence is recorded.
#[derive(Default)]
struct StubBrowser {
    calls: Mutex<Vec<String>>,
    counter: AtomicUsize,
    current: Mutex<PageState>,
    /// Clicks fail with ElementNotFound while true.
    fail_clicks: bool,
    /// Remaining navigations that fail with a transient Timeout.
    nav_failures: AtomicUsize,
}

impl StubBrowser {
    fn new() -> Self {
        Self::default()
    }

    fn failing_clicks() -> Self {
        Self {
            fail_clicks: true,
            ..Self::default()
        }
    }

    fn flaky_navigation(failures: usize) -> Self {
        Self {
            nav_failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn advance(&self, tag: &str) -> PageState {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let page = PageState {
            url: format!("https://stub/{tag}/{n}"),
            title: format!("page {n}"),
            html: format!("<body data-page=\"{n}\"></body>"),
            outline: format!("[e0] input type=text placeholder=\"{tag}\""),
            interactive_elements: Vec::new(),
        };
        *self.current.lock().unwrap() = page.clone();
        page
    }
}

#[async_trait]
impl Browser for StubBrowser {
    async fn navigate(&self, url: &str) -> Result<PageState, AgentError> {
        self.log(format!("navigate {url}"));
        let remaining = self.nav_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.nav_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::Timeout(format!("page body after navigating to {url}")));
        }
        Ok(self.advance("nav"))
    }

    async fn click(&self, selector: &str) -> Result<PageState, AgentError> {
        self.log(format!("click {selector}"));
        if self.fail_clicks {
            return Err(AgentError::ElementNotFound(selector.to_string()));
        }
        Ok(self.advance("click"))
    }

    async fn type_text(&self, selector: &str, plan: &[Keystroke]) -> Result<PageState, AgentError> {
        self.log(format!("type {selector} ({} strokes)", plan.len()));
        Ok(self.advance("type"))
    }

    async fn press_key(&self, key: &str) -> Result<PageState, AgentError> {
        self.log(format!("press {key}"));
        Ok(self.advance("press"))
    }

    async fn scroll(
        &self,
        _direction: Option<ScrollDirection>,
        _selector: Option<&str>,
    ) -> Result<PageState, AgentError> {
        self.log("scroll");
        Ok(self.advance("scroll"))
    }

    async fn extract(&self, query: &str) -> Result<String, AgentError> {
        self.log(format!("extract {query}"));
        Ok("extracted text".into())
    }

    async fn snapshot(&self) -> Result<PageState, AgentError> {
        self.log("snapshot");
        Ok(self.current.lock().unwrap().clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        self.log("screenshot");
        Ok(Vec::new())
    }
}

/// Always replies with the same content and counts its calls.
struct FixedModel {
    response: String,
    calls: AtomicUsize,
}

impl FixedModel {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for FixedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Scripted model that also keeps the prompt it saw on every call.
struct CapturingModel {
    inner: ScriptedModel,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl CapturingModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: ScriptedModel::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for CapturingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.inner.complete(messages).await
    }
}

fn fast_humanizer() -> Humanizer {
    Humanizer::seeded(
        HumanizeConfig {
            min_key_delay_ms: 0,
            max_key_delay_ms: 1,
            pause_extra_ms: 1,
            typo_probability: 0.0,
            min_action_delay_ms: 0,
            max_action_delay_ms: 1,
        },
        7,
    )
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_steps: 25,
        task_timeout: Duration::from_secs(30),
        translation_retries: 2,
        action_retries: 2,
        backoff_base: Duration::from_millis(1),
        continue_on_error: true,
    }
}

fn executor<M: LanguageModel + 'static>(
    browser: Arc<StubBrowser>,
    model: M,
    sink: Arc<RecordingSink>,
    config: ExecutorConfig,
) -> TaskExecutor<StubBrowser, M> {
    TaskExecutor::new(
        browser,
        Translator::new(model, PromptConfig::default()),
        fast_humanizer(),
        sink as Arc<dyn EventSink>,
        config,
    )
}

#[tokio::test]
async fn search_for_cricket_end_to_end() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = ScriptedModel::new([
        r#"{"type":"Navigate","url":"https://google.com"}"#,
        r##"{"type":"Type","selector":"#search","text":"cricket"}"##,
        r#"{"type":"Finish","summary":"Searched for cricket on Google"}"#,
    ]);
    let mut exec = executor(browser.clone(), model, sink.clone(), fast_config());

    let task = exec
        .run("Search for cricket on Google", CancellationToken::new())
        .await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.history.len(), 3);
    assert_eq!(task.step_count, 2);
    assert!(task.history.iter().all(|r| r.success));

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].kind, EventKind::Action);
    assert_eq!(events[0].action.as_ref().unwrap().label(), "Navigate");
    assert_eq!(events[1].kind, EventKind::Action);
    assert_eq!(events[1].action.as_ref().unwrap().label(), "Type");
    assert_eq!(events[2].kind, EventKind::Status);
    assert_eq!(events[2].status, Some(TaskStatus::Completed));
    assert_eq!(
        events[2].message.as_deref(),
        Some("Searched for cricket on Google")
    );

    let calls = browser.calls();
    assert_eq!(calls[0], "snapshot");
    assert_eq!(calls[1], "navigate https://google.com");
    assert!(calls[2].starts_with("type #search"));
}

#[tokio::test]
async fn finish_stops_the_browser_immediately() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = ScriptedModel::new([r#"{"type":"Finish","summary":"nothing to do"}"#]);
    let mut exec = executor(browser.clone(), model, sink.clone(), fast_config());

    let task = exec.run("do nothing", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    // Only the initial observation; no calls after Finish.
    assert_eq!(browser.calls(), vec!["snapshot".to_string()]);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
}

#[tokio::test]
async fn malformed_responses_fail_after_bounded_retries() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = Arc::new(FixedModel::new("I would rather chat than emit JSON"));
    let mut exec = executor(
        browser,
        model.clone(),
        sink.clone(),
        ExecutorConfig {
            translation_retries: 2,
            ..fast_config()
        },
    );

    let task = exec.run("anything", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Failed);
    // First attempt plus exactly `translation_retries` retries.
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    assert!(task.history.is_empty());

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Error);
    assert_eq!(events[0].status, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn step_budget_aborts_the_task() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = FixedModel::new(r#"{"type":"PressKey","key":"PageDown"}"#);
    let mut exec = executor(
        browser,
        model,
        sink.clone(),
        ExecutorConfig {
            max_steps: 3,
            ..fast_config()
        },
    );

    let task = exec.run("scroll forever", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Aborted);
    assert_eq!(task.step_count, 3);
    assert_eq!(task.history.len(), 3);

    let events = sink.events();
    assert_eq!(events.len(), 4);
    assert!(events[..3].iter().all(|e| e.kind == EventKind::Action));
    assert_eq!(events[3].status, Some(TaskStatus::Aborted));
    assert!(events[3].message.as_ref().unwrap().contains("step budget"));
}

#[tokio::test]
async fn abort_token_stops_before_the_first_action() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = FixedModel::new(r#"{"type":"Navigate","url":"https://example.com"}"#);
    let mut exec = executor(browser.clone(), model, sink.clone(), fast_config());

    let token = CancellationToken::new();
    token.cancel();
    let task = exec.run("never starts", token).await;

    assert_eq!(task.status, TaskStatus::Aborted);
    assert!(task.history.is_empty());
    assert_eq!(browser.calls(), vec!["snapshot".to_string()]);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, Some(TaskStatus::Aborted));
}

#[tokio::test]
async fn each_translation_sees_the_previous_steps_page() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = Arc::new(CapturingModel::new([
        r#"{"type":"Navigate","url":"https://first.example"}"#,
        r#"{"type":"Click","selector":"[data-eid=\"e0\"]"}"#,
        r#"{"type":"Finish","summary":"done"}"#,
    ]));
    let mut exec = executor(browser, model.clone(), sink, fast_config());

    let task = exec.run("walk two pages", CancellationToken::new()).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 3);

    // Translation N+1 observes exactly the page produced by step N.
    let nav_page = task.history[0].page.as_ref().unwrap();
    let click_page = task.history[1].page.as_ref().unwrap();
    assert!(prompts[1].last().unwrap().content.contains(&nav_page.url));
    assert!(prompts[2].last().unwrap().content.contains(&click_page.url));
}

#[tokio::test]
async fn continue_on_error_surfaces_the_failure_to_the_model() {
    let browser = Arc::new(StubBrowser::failing_clicks());
    let sink = Arc::new(RecordingSink::new());
    let model = Arc::new(CapturingModel::new([
        r##"{"type":"Click","selector":"#missing"}"##,
        r#"{"type":"Finish","summary":"gave up gracefully"}"#,
    ]));
    let mut exec = executor(browser, model.clone(), sink.clone(), fast_config());

    let task = exec.run("click the ghost", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.history.len(), 2);
    assert!(!task.history[0].success);
    assert_eq!(task.history[0].error, Some(ErrorKind::ElementNotFound));

    // The failure is an observation in the next prompt, not a guess.
    let prompts = model.prompts();
    let second_prompt: String = prompts[1].iter().map(|m| m.content.as_str()).collect();
    assert!(second_prompt.contains("FAILED"));
    assert!(second_prompt.contains("#missing"));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, EventKind::Error);
    assert!(!events[0].is_terminal());
    assert!(events[1].is_terminal());
}

#[tokio::test]
async fn fail_fast_ends_the_task_on_action_failure() {
    let browser = Arc::new(StubBrowser::failing_clicks());
    let sink = Arc::new(RecordingSink::new());
    let model = FixedModel::new(r##"{"type":"Click","selector":"#missing"}"##);
    let mut exec = executor(
        browser,
        model,
        sink.clone(),
        ExecutorConfig {
            continue_on_error: false,
            ..fast_config()
        },
    );

    let task = exec.run("click the ghost", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.history.len(), 1);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn transient_navigation_failures_are_retried_in_place() {
    let browser = Arc::new(StubBrowser::flaky_navigation(2));
    let sink = Arc::new(RecordingSink::new());
    let model = ScriptedModel::new([
        r#"{"type":"Navigate","url":"https://flaky.example"}"#,
        r#"{"type":"Finish","summary":"made it"}"#,
    ]);
    let mut exec = executor(
        browser.clone(),
        model,
        sink,
        ExecutorConfig {
            action_retries: 2,
            ..fast_config()
        },
    );

    let task = exec.run("reach a flaky site", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.history[0].success);
    let attempts = browser
        .calls()
        .iter()
        .filter(|c| c.starts_with("navigate"))
        .count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn extract_records_the_text_in_the_audit_trail() {
    let browser = Arc::new(StubBrowser::new());
    let sink = Arc::new(RecordingSink::new());
    let model = ScriptedModel::new([
        r#"{"type":"Extract","query":"[data-eid=\"e0\"]"}"#,
        r#"{"type":"Finish","summary":"read the page"}"#,
    ]);
    let mut exec = executor(browser, model, sink, fast_config());

    let task = exec.run("read something", CancellationToken::new()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.history[0].detail.as_deref(), Some("extracted text"));
    assert!(task.history[0].success);
}
