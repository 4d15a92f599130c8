use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{Action, ElementRef, PageState, TaskStatus};

/// Outbound notification. Field names are frozen for viewer compatibility:
/// `type`, `action.type`, `data.url`, `data.html`,
/// `data.interactive_elements[].selector`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Action,
    Status,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageData {
    pub url: String,
    pub html: String,
    pub interactive_elements: Vec<ElementRef>,
}

impl From<&PageState> for PageData {
    fn from(page: &PageState) -> Self {
        Self {
            url: page.url.clone(),
            html: page.html.clone(),
            interactive_elements: page.interactive_elements.clone(),
        }
    }
}

impl Event {
    /// One executed action together with the page state it produced.
    pub fn action(action: &Action, page: &PageState) -> Self {
        Self {
            kind: EventKind::Action,
            action: Some(action.clone()),
            data: Some(PageData::from(page)),
            message: None,
            status: None,
        }
    }

    /// Terminal: the task finished on its own terms.
    pub fn completed(summary: &str) -> Self {
        Self {
            kind: EventKind::Status,
            action: None,
            data: None,
            message: Some(summary.to_string()),
            status: Some(TaskStatus::Completed),
        }
    }

    /// Terminal: unrecoverable failure.
    pub fn failed(message: String) -> Self {
        Self {
            kind: EventKind::Error,
            action: None,
            data: None,
            message: Some(message),
            status: Some(TaskStatus::Failed),
        }
    }

    /// Terminal: step/time budget exhausted or external abort.
    pub fn aborted(message: String) -> Self {
        Self {
            kind: EventKind::Status,
            action: None,
            data: None,
            message: Some(message),
            status: Some(TaskStatus::Aborted),
        }
    }

    /// Non-terminal step failure, surfaced while the task keeps running.
    pub fn step_error(message: String) -> Self {
        Self {
            kind: EventKind::Error,
            action: None,
            data: None,
            message: Some(message),
            status: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(|s| s.is_terminal())
    }
}

/// Ordered pass-through for executor events. The executor emits
/// synchronously per transition, which is what preserves ordering.
pub trait EventSink: Send + Sync {
    fn report(&self, event: Event);
}

/// Fan-out to any number of subscribers over a broadcast channel; lagging or
/// absent subscribers never block the task loop.
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for BroadcastSink {
    fn report(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Captures events in order; the reporter double used across the tests.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn report(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bounds, ElementRef};

    fn page() -> PageState {
        PageState {
            url: "https://example.com".into(),
            title: "Example".into(),
            html: "<body><a data-eid=\"e0\">link</a></body>".into(),
            outline: "[e0] link \"link\"".into(),
            interactive_elements: vec![ElementRef {
                selector: "[data-eid=\"e0\"]".into(),
                role: "a".into(),
                label: "link".into(),
                bounds: Some(Bounds {
                    x: 1.0,
                    y: 2.0,
                    width: 30.0,
                    height: 10.0,
                }),
            }],
        }
    }

    #[test]
    fn action_event_wire_shape_is_frozen() {
        let event = Event::action(
            &Action::Navigate {
                url: "https://example.com".into(),
            },
            &page(),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "action");
        assert_eq!(json["action"]["type"], "Navigate");
        assert_eq!(json["action"]["url"], "https://example.com");
        assert_eq!(json["data"]["url"], "https://example.com");
        assert!(json["data"]["html"].as_str().unwrap().contains("data-eid"));
        assert_eq!(
            json["data"]["interactive_elements"][0]["selector"],
            "[data-eid=\"e0\"]"
        );
    }

    #[test]
    fn terminal_events_carry_status_and_summary() {
        let done = serde_json::to_value(Event::completed("found it")).unwrap();
        assert_eq!(done["type"], "status");
        assert_eq!(done["status"], "completed");
        assert_eq!(done["message"], "found it");

        let failed = serde_json::to_value(Event::failed("boom".into())).unwrap();
        assert_eq!(failed["type"], "error");
        assert_eq!(failed["status"], "failed");

        assert!(Event::aborted("budget".into()).is_terminal());
        assert!(!Event::step_error("retry".into()).is_terminal());
    }

    #[test]
    fn absent_fields_are_omitted_from_the_wire() {
        let json = serde_json::to_value(Event::step_error("oops".into())).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("action"));
        assert!(!object.contains_key("data"));
        assert!(!object.contains_key("status"));
    }

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        sink.report(Event::step_error("first".into()));
        sink.report(Event::completed("second"));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message.as_deref(), Some("first"));
        assert_eq!(events[1].message.as_deref(), Some("second"));
    }
}
