use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser as Chrome, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::dom;
use crate::error::AgentError;
use crate::humanize::{KeyInput, Keystroke};
use crate::types::{PageState, ScrollDirection};

/// Browser capability consumed by the executor. One implementation drives a
/// real Chrome; tests substitute deterministic stubs.
///
/// Every mutating operation returns the freshest page state after the DOM
/// settles, so the next translation step never consumes a stale snapshot.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<PageState, AgentError>;
    async fn click(&self, selector: &str) -> Result<PageState, AgentError>;
    async fn type_text(&self, selector: &str, plan: &[Keystroke]) -> Result<PageState, AgentError>;
    async fn press_key(&self, key: &str) -> Result<PageState, AgentError>;
    async fn scroll(
        &self,
        direction: Option<ScrollDirection>,
        selector: Option<&str>,
    ) -> Result<PageState, AgentError>;
    async fn extract(&self, query: &str) -> Result<String, AgentError>;
    async fn snapshot(&self) -> Result<PageState, AgentError>;
    async fn screenshot(&self) -> Result<Vec<u8>, AgentError>;
}

/// Persistent Chrome session. Created once, reused for all tasks; each task
/// gets a fresh tab. All CDP calls are blocking and run under
/// `spawn_blocking` so they never stall the runtime.
pub struct ChromeSession {
    chrome: Chrome,
    tab: Mutex<Arc<Tab>>,
    config: BrowserConfig,
}

impl ChromeSession {
    /// Attach to an already-running Chrome on the debugging port first; fall
    /// back to launching our own with automation fingerprints dampened.
    pub fn launch(config: BrowserConfig) -> anyhow::Result<Self> {
        info!("attempting to attach to existing Chrome on port 9222");
        if let Ok(chrome) = Chrome::connect("http://127.0.0.1:9222".to_string()) {
            info!("attached to existing Chrome");
            let tab = {
                let tabs_lock = chrome.get_tabs();
                let tabs = tabs_lock.lock().unwrap();
                match tabs.first() {
                    Some(t) => t.clone(),
                    None => chrome.new_tab()?,
                }
            };
            return Ok(Self {
                chrome,
                tab: Mutex::new(tab),
                config,
            });
        }

        info!(headless = config.headless, "launching Chrome");
        let options = LaunchOptions {
            headless: config.headless,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            // The session outlives idle gaps between tasks.
            idle_browser_timeout: Duration::from_secs(86_400),
            ..Default::default()
        };

        let chrome = Chrome::new(options)
            .map_err(|e| anyhow::anyhow!("browser launch failed: {e}"))?;
        let tab = chrome.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            chrome,
            tab: Mutex::new(tab),
            config,
        })
    }

    /// Open a fresh tab and make it current. Called at task start.
    pub fn new_tab(&self) -> anyhow::Result<()> {
        let tab = self.chrome.new_tab()?;
        *self.tab.lock().unwrap() = tab;
        Ok(())
    }

    fn tab(&self) -> Arc<Tab> {
        self.tab.lock().unwrap().clone()
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>, BrowserConfig) -> Result<T, AgentError> + Send + 'static,
    {
        let tab = self.tab();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || op(tab, config))
            .await
            .map_err(|e| AgentError::Browser(format!("browser task panicked: {e}")))?
    }
}

#[async_trait]
impl Browser for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<PageState, AgentError> {
        let url = url.to_string();
        self.blocking(move |tab, config| {
            debug!(%url, "navigate");
            tab.navigate_to(&url)
                .map_err(|e| AgentError::Navigation(e.to_string()))?;
            tab.wait_for_element_with_custom_timeout("body", config.nav_timeout)
                .map_err(|_| AgentError::Timeout(format!("page body after navigating to {url}")))?;
            std::thread::sleep(config.settle_delay);
            dom::capture_page_state(&tab, &config)
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<PageState, AgentError> {
        let selector = selector.to_string();
        self.blocking(move |tab, config| {
            let element = tab
                .find_element(&selector)
                .map_err(|_| AgentError::ElementNotFound(selector.clone()))?;
            element.click().map_err(|e| AgentError::NotInteractable {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
            std::thread::sleep(config.settle_delay);
            dom::capture_page_state(&tab, &config)
        })
        .await
    }

    async fn type_text(&self, selector: &str, plan: &[Keystroke]) -> Result<PageState, AgentError> {
        let selector = selector.to_string();
        let plan = plan.to_vec();
        self.blocking(move |tab, config| {
            let element = tab
                .find_element(&selector)
                .map_err(|_| AgentError::ElementNotFound(selector.clone()))?;
            element.click().map_err(|e| AgentError::NotInteractable {
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
            // Clear any stale value before typing into it.
            let js = format!(
                "const el = document.querySelector('{}'); if (el) el.value = ''",
                dom::escape_selector(&selector)
            );
            tab.evaluate(&js, false)
                .map_err(|e| AgentError::Browser(e.to_string()))?;

            for stroke in &plan {
                std::thread::sleep(Duration::from_millis(stroke.delay_ms));
                let sent = match stroke.key {
                    KeyInput::Char(c) => tab.type_str(&c.to_string()).map(|_| ()),
                    KeyInput::Backspace => tab.press_key("Backspace").map(|_| ()),
                };
                sent.map_err(|e| AgentError::NotInteractable {
                    selector: selector.clone(),
                    reason: e.to_string(),
                })?;
            }
            std::thread::sleep(config.settle_delay);
            dom::capture_page_state(&tab, &config)
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<PageState, AgentError> {
        let key = key.to_string();
        self.blocking(move |tab, config| {
            tab.press_key(&key)
                .map_err(|e| AgentError::Browser(format!("press {key}: {e}")))?;
            std::thread::sleep(config.settle_delay);
            dom::capture_page_state(&tab, &config)
        })
        .await
    }

    async fn scroll(
        &self,
        direction: Option<ScrollDirection>,
        selector: Option<&str>,
    ) -> Result<PageState, AgentError> {
        let selector = selector.map(String::from);
        self.blocking(move |tab, config| {
            match selector {
                Some(sel) => {
                    let js = format!(
                        "const el = document.querySelector('{}'); if (el) el.scrollIntoView({{block: 'center'}})",
                        dom::escape_selector(&sel)
                    );
                    let found = tab
                        .evaluate(
                            &format!("!!document.querySelector('{}')", dom::escape_selector(&sel)),
                            false,
                        )
                        .map_err(|e| AgentError::Browser(e.to_string()))?
                        .value
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    if !found {
                        return Err(AgentError::ElementNotFound(sel));
                    }
                    tab.evaluate(&js, false)
                        .map_err(|e| AgentError::Browser(e.to_string()))?;
                }
                None => {
                    let dy = match direction.unwrap_or(ScrollDirection::Down) {
                        ScrollDirection::Down => 600,
                        ScrollDirection::Up => -600,
                    };
                    tab.evaluate(&format!("window.scrollBy(0, {dy})"), false)
                        .map_err(|e| AgentError::Browser(e.to_string()))?;
                }
            }
            std::thread::sleep(Duration::from_millis(300));
            dom::capture_page_state(&tab, &config)
        })
        .await
    }

    async fn extract(&self, query: &str) -> Result<String, AgentError> {
        let query = query.to_string();
        self.blocking(move |tab, _config| dom::extract_text(&tab, &query))
            .await
    }

    async fn snapshot(&self) -> Result<PageState, AgentError> {
        self.blocking(move |tab, config| dom::capture_page_state(&tab, &config))
            .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        self.blocking(move |tab, _config| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| {
                    warn!("screenshot failed: {e}");
                    AgentError::Browser(e.to_string())
                })
        })
        .await
    }
}
