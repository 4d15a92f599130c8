use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

/// A single atomic action the language model asks the agent to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    PressKey {
        key: String,
    },
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<ScrollDirection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Wait {
        duration_ms: u64,
    },
    Extract {
        query: String,
    },
    Finish {
        summary: String,
    },
}

impl Action {
    /// `Finish` is the only terminal action; everything else implies continuation.
    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }

    /// The wire tag, as it appears in the serialized `type` field.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "Navigate",
            Action::Click { .. } => "Click",
            Action::Type { .. } => "Type",
            Action::PressKey { .. } => "PressKey",
            Action::Scroll { .. } => "Scroll",
            Action::Wait { .. } => "Wait",
            Action::Extract { .. } => "Extract",
            Action::Finish { .. } => "Finish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// An interactive element surfaced by the DOM snapshot, addressable through
/// the `data-eid` selector the snapshot script stamped onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRef {
    pub selector: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// What the agent observes after executing an action. Captured fresh per
/// step and superseded, never mutated, by the next snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// Sanitized body HTML carrying the `data-eid` markers, for the viewer.
    pub html: String,
    /// Compact one-line-per-element digest, for the language model.
    pub outline: String,
    pub interactive_elements: Vec<ElementRef>,
}

/// One entry in a task's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Extracted text on a successful `Extract`, or the error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageState>,
    pub timestamp: DateTime<Utc>,
}

impl ActionResult {
    pub fn ok(action: Action, page: Option<PageState>) -> Self {
        Self {
            action,
            success: true,
            error: None,
            detail: None,
            page,
            timestamp: Utc::now(),
        }
    }

    pub fn extracted(action: Action, text: String, page: PageState) -> Self {
        Self {
            action,
            success: true,
            error: None,
            detail: Some(text),
            page: Some(page),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(action: Action, error: ErrorKind, message: String) -> Self {
        Self {
            action,
            success: false,
            error: Some(error),
            detail: Some(message),
            page: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Per-task state owned exclusively by the executor. Returned to the caller
/// as the task report once a terminal status is reached.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub instruction: String,
    pub history: Vec<ActionResult>,
    /// Completed non-`Finish` results; strictly one increment per appended one.
    pub step_count: usize,
    pub started_at: Instant,
    pub status: TaskStatus,
}

impl TaskContext {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            history: Vec::new(),
            step_count: 0,
            started_at: Instant::now(),
            status: TaskStatus::Running,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// A message in the conversation sent to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}
