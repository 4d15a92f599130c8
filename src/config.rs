use std::time::Duration;

/// All tunables in one place. The numbers the upstream material left open
/// (truncation bounds, retry counts) live here as overridable defaults.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub executor: ExecutorConfig,
    pub prompt: PromptConfig,
    pub humanize: HumanizeConfig,
    pub browser: BrowserConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard cap on completed steps per task.
    pub max_steps: usize,
    /// Wall-clock ceiling per task.
    pub task_timeout: Duration,
    /// Retries after the first failed translation call.
    pub translation_retries: usize,
    /// Retries for transient execution failures on the same action.
    pub action_retries: usize,
    /// First backoff pause; doubles per attempt.
    pub backoff_base: Duration,
    /// Surface execution failures to the translator instead of ending the task.
    pub continue_on_error: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            task_timeout: Duration::from_secs(300),
            translation_retries: 2,
            action_retries: 2,
            backoff_base: Duration::from_millis(500),
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// History entries kept in the prompt; oldest dropped first beyond this.
    pub max_history: usize,
    /// Character budget for the page outline fed to the model.
    pub max_outline_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_history: 12,
            max_outline_chars: 4000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HumanizeConfig {
    /// Per-keystroke delay bounds, inclusive.
    pub min_key_delay_ms: u64,
    pub max_key_delay_ms: u64,
    /// Extra pause budget after whitespace and punctuation.
    pub pause_extra_ms: u64,
    /// Chance per character of typing a wrong key and correcting it.
    pub typo_probability: f64,
    /// Pause bounds between consecutive actions, inclusive.
    pub min_action_delay_ms: u64,
    pub max_action_delay_ms: u64,
}

impl Default for HumanizeConfig {
    fn default() -> Self {
        Self {
            min_key_delay_ms: 50,
            max_key_delay_ms: 200,
            pause_extra_ms: 250,
            typo_probability: 0.04,
            min_action_delay_ms: 300,
            max_action_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Bound on waiting for a selector to appear.
    pub element_timeout: Duration,
    /// Bound on waiting for a page body after navigation.
    pub nav_timeout: Duration,
    /// Grace period for the DOM to settle after a mutating action.
    pub settle_delay: Duration,
    /// Character cap on the sanitized HTML shipped to the viewer.
    pub max_html_chars: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            element_timeout: Duration::from_secs(5),
            nav_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(1500),
            max_html_chars: 60_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub api_base: String,
    /// Bound on a single model call.
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            api_base: "https://api.openai.com/v1".into(),
            timeout: Duration::from_secs(60),
            temperature: 0.2,
        }
    }
}
