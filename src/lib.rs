//! Natural-language browser automation agent.
//!
//! An instruction like "Search for cricket on Google" is turned into a
//! sequence of typed browser actions by a language model, executed against a
//! live Chrome session with human-like pacing, and streamed as structured
//! events to any subscriber.
//!
//! The capabilities at the edges (the browser, the language model, the event
//! transport) sit behind traits so the task loop is testable with
//! deterministic stand-ins.

pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod events;
pub mod executor;
pub mod face;
pub mod hands;
pub mod humanize;
pub mod types;

pub use brain::{LanguageModel, OpenAiChat, ScriptedModel, Translator};
pub use config::AgentConfig;
pub use error::{AgentError, ErrorKind};
pub use events::{BroadcastSink, Event, EventKind, EventSink, RecordingSink};
pub use executor::{TaskExecutor, TaskHandle, start_task};
pub use hands::{Browser, ChromeSession};
pub use humanize::{Humanizer, KeyInput, Keystroke};
pub use types::{Action, ActionResult, PageState, TaskContext, TaskStatus};
