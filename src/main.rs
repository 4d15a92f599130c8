use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browser_agent::config::AgentConfig;
use browser_agent::events::{BroadcastSink, EventSink};
use browser_agent::executor::{TaskExecutor, TaskHandle, start_task};
use browser_agent::face::{self, UiCommand};
use browser_agent::hands::ChromeSession;
use browser_agent::humanize::Humanizer;
use browser_agent::{OpenAiChat, Translator};

#[derive(Parser, Debug)]
#[command(name = "agent", about = "Natural-language browser automation agent")]
struct Args {
    /// Hard cap on steps per task.
    #[arg(long, default_value_t = 25)]
    max_steps: usize,

    /// Wall-clock ceiling per task, in seconds.
    #[arg(long, default_value_t = 300)]
    task_timeout: u64,

    /// Run Chrome without a visible window.
    #[arg(long)]
    headless: bool,

    /// Chat model to translate instructions with.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Chance per character of a simulated typo-and-correction.
    #[arg(long, default_value_t = 0.04)]
    typo_probability: f64,

    /// Seed the pacing randomness for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// End the task on the first unrecoverable action failure instead of
    /// letting the model see the error and try an alternative.
    #[arg(long)]
    fail_fast: bool,
}

impl Args {
    fn into_config(self) -> (AgentConfig, Option<u64>) {
        let mut config = AgentConfig::default();
        config.executor.max_steps = self.max_steps;
        config.executor.task_timeout = Duration::from_secs(self.task_timeout);
        config.executor.continue_on_error = !self.fail_fast;
        config.browser.headless = self.headless;
        config.model.model = self.model;
        config.humanize.typo_probability = self.typo_probability;
        (config, self.seed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,browser_agent=debug")),
        )
        .init();

    let (config, seed) = Args::parse().into_config();
    let api_key =
        std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set in environment")?;

    info!("launching Chrome...");
    let session = {
        let browser_config = config.browser.clone();
        tokio::task::spawn_blocking(move || ChromeSession::launch(browser_config))
            .await
            .map_err(|e| anyhow::anyhow!("browser launch panicked: {e}"))??
    };
    let session = Arc::new(session);

    let (mut cmd_rx, event_tx) = face::start_server(session.clone()).await?;
    let sink: Arc<dyn EventSink> = Arc::new(BroadcastSink::new(event_tx));
    let model = OpenAiChat::new(api_key, config.model.clone());

    info!("agent ready, waiting for commands");

    let mut active: Option<TaskHandle> = None;
    while let Some(command) = cmd_rx.recv().await {
        match command {
            UiCommand::Abort => {
                if let Some(handle) = &active {
                    info!("abort requested");
                    handle.abort();
                }
            }
            UiCommand::Execute(instruction) => {
                // One task at a time: the session is exclusively owned by
                // the running task, so wind down the previous one first.
                if let Some(handle) = active.take() {
                    handle.abort();
                    let _ = handle.wait().await;
                }
                if let Err(e) = session.new_tab() {
                    warn!("failed to open new tab for task: {e}");
                }

                let humanizer = match seed {
                    Some(s) => Humanizer::seeded(config.humanize.clone(), s),
                    None => Humanizer::new(config.humanize.clone()),
                };
                let translator = Translator::new(model.clone(), config.prompt.clone());
                let executor = TaskExecutor::new(
                    session.clone(),
                    translator,
                    humanizer,
                    sink.clone(),
                    config.executor.clone(),
                );
                info!("starting task: {instruction}");
                active = Some(start_task(executor, instruction));
            }
        }
    }

    Ok(())
}
