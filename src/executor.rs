use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::brain::{LanguageModel, Translator};
use crate::config::ExecutorConfig;
use crate::error::AgentError;
use crate::events::{Event, EventSink};
use crate::hands::Browser;
use crate::humanize::Humanizer;
use crate::types::{Action, ActionResult, PageState, TaskContext, TaskStatus};

/// `Wait` actions cannot sleep past this, or they could eat the task budget.
const WAIT_CEILING_MS: u64 = 10_000;

struct StepOutcome {
    page: PageState,
    extracted: Option<String>,
}

/// Drives one task through the observe -> translate -> humanize-execute ->
/// record loop until a terminal status. Owns its browser session and task
/// context exclusively; nothing here is shared across tasks.
pub struct TaskExecutor<B, M> {
    browser: Arc<B>,
    translator: Translator<M>,
    humanizer: Humanizer,
    sink: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl<B, M> TaskExecutor<B, M>
where
    B: Browser + 'static,
    M: LanguageModel + 'static,
{
    pub fn new(
        browser: Arc<B>,
        translator: Translator<M>,
        humanizer: Humanizer,
        sink: Arc<dyn EventSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            browser,
            translator,
            humanizer,
            sink,
            config,
        }
    }

    /// Run to a terminal status. The abort token is observed between steps;
    /// an in-flight action is allowed to finish on its own bound.
    pub async fn run(&mut self, instruction: &str, abort: CancellationToken) -> TaskContext {
        let mut task = TaskContext::new(instruction);
        info!(instruction, "task started");

        let mut page = match self.browser.snapshot().await {
            Ok(p) => p,
            Err(e) => {
                return self.finish(task, TaskStatus::Failed, format!("initial observation failed: {e}"));
            }
        };

        loop {
            if abort.is_cancelled() {
                return self.finish(task, TaskStatus::Aborted, "aborted by caller".into());
            }
            if task.step_count >= self.config.max_steps {
                let e = AgentError::BudgetExceeded(format!(
                    "step budget ({}) exhausted",
                    self.config.max_steps
                ));
                return self.finish(task, TaskStatus::Aborted, e.to_string());
            }
            if task.elapsed() >= self.config.task_timeout {
                let e = AgentError::BudgetExceeded(format!(
                    "time budget ({:?}) exhausted",
                    self.config.task_timeout
                ));
                return self.finish(task, TaskStatus::Aborted, e.to_string());
            }

            let action = match self.translate_with_retry(&task, &page).await {
                Ok(a) => a,
                Err(e) => {
                    return self.finish(task, TaskStatus::Failed, format!("translation failed: {e}"));
                }
            };
            debug!(action = action.label(), step = task.step_count, "next action");

            if let Action::Finish { summary } = &action {
                let summary = summary.clone();
                task.history.push(ActionResult::ok(action, None));
                task.status = TaskStatus::Completed;
                info!("task completed: {summary}");
                self.sink.report(Event::completed(&summary));
                return task;
            }

            tokio::time::sleep(self.humanizer.inter_action_delay()).await;

            match self.execute_with_retry(&action).await {
                Ok(outcome) => {
                    page = outcome.page.clone();
                    let result = match outcome.extracted {
                        Some(text) => ActionResult::extracted(action.clone(), text, outcome.page),
                        None => ActionResult::ok(action.clone(), Some(outcome.page)),
                    };
                    task.history.push(result);
                    task.step_count += 1;
                    self.sink.report(Event::action(&action, &page));
                }
                Err(e) => {
                    warn!(action = action.label(), "action failed: {e}");
                    task.history
                        .push(ActionResult::failed(action.clone(), e.kind(), e.to_string()));
                    task.step_count += 1;
                    if self.config.continue_on_error {
                        self.sink
                            .report(Event::step_error(format!("{} failed: {e}", action.label())));
                        // Re-observe so the next translation sees the page as it is now.
                        if let Ok(fresh) = self.browser.snapshot().await {
                            page = fresh;
                        }
                    } else {
                        task.status = TaskStatus::Failed;
                        self.sink
                            .report(Event::failed(format!("{} failed: {e}", action.label())));
                        return task;
                    }
                }
            }
        }
    }

    async fn translate_with_retry(
        &self,
        task: &TaskContext,
        page: &PageState,
    ) -> Result<Action, AgentError> {
        let mut attempt = 0;
        loop {
            match self
                .translator
                .translate(&task.instruction, &task.history, page)
                .await
            {
                Ok(action) => return Ok(action),
                Err(e) => {
                    if attempt >= self.config.translation_retries {
                        return Err(e);
                    }
                    let backoff = self.config.backoff_base * 2u32.pow(attempt as u32);
                    warn!("translation attempt {} failed: {e}; retrying in {backoff:?}", attempt + 1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn execute_with_retry(&mut self, action: &Action) -> Result<StepOutcome, AgentError> {
        let mut attempt = 0;
        loop {
            match self.execute(action).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.config.action_retries => {
                    let backoff = self.config.backoff_base * 2u32.pow(attempt as u32);
                    warn!(
                        action = action.label(),
                        "transient failure ({e}); retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(&mut self, action: &Action) -> Result<StepOutcome, AgentError> {
        let page = match action {
            Action::Navigate { url } => self.browser.navigate(url).await?,
            Action::Click { selector } => self.browser.click(selector).await?,
            Action::Type { selector, text } => {
                let plan = self.humanizer.typing_plan(text);
                self.browser.type_text(selector, &plan).await?
            }
            Action::PressKey { key } => self.browser.press_key(key).await?,
            Action::Scroll {
                direction,
                selector,
            } => {
                self.browser
                    .scroll(*direction, selector.as_deref())
                    .await?
            }
            Action::Wait { duration_ms } => {
                let bounded = (*duration_ms).min(WAIT_CEILING_MS);
                tokio::time::sleep(Duration::from_millis(bounded)).await;
                self.browser.snapshot().await?
            }
            Action::Extract { query } => {
                let text = self.browser.extract(query).await?;
                let page = self.browser.snapshot().await?;
                return Ok(StepOutcome {
                    page,
                    extracted: Some(text),
                });
            }
            Action::Finish { .. } => unreachable!("finish is handled before execution"),
        };
        Ok(StepOutcome {
            page,
            extracted: None,
        })
    }

    fn finish(&self, mut task: TaskContext, status: TaskStatus, message: String) -> TaskContext {
        task.status = status;
        match status {
            TaskStatus::Completed => self.sink.report(Event::completed(&message)),
            TaskStatus::Failed => {
                warn!("task failed: {message}");
                self.sink.report(Event::failed(message));
            }
            TaskStatus::Aborted => {
                info!("task aborted: {message}");
                self.sink.report(Event::aborted(message));
            }
            TaskStatus::Running => {}
        }
        task
    }
}

/// Handle to a spawned task: abort it between steps, await its report.
pub struct TaskHandle {
    abort: CancellationToken,
    join: JoinHandle<TaskContext>,
}

impl TaskHandle {
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub async fn wait(self) -> anyhow::Result<TaskContext> {
        Ok(self.join.await?)
    }
}

/// Spawn one task onto the runtime. The executor (and its browser session)
/// moves into the task for the duration; one action in flight at a time.
pub fn start_task<B, M>(mut executor: TaskExecutor<B, M>, instruction: String) -> TaskHandle
where
    B: Browser + 'static,
    M: LanguageModel + 'static,
{
    let abort = CancellationToken::new();
    let token = abort.clone();
    let join = tokio::spawn(async move { executor.run(&instruction, token).await });
    TaskHandle { abort, join }
}
