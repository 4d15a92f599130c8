use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong between the executor, the browser and the
/// language model. Retry policy keys off `is_transient`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element matches selector {0}")]
    ElementNotFound(String),

    #[error("element {selector} is present but not interactable: {reason}")]
    NotInteractable { selector: String, reason: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("model returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("browser session error: {0}")]
    Browser(String),
}

impl AgentError {
    /// Transient failures are worth retrying with backoff; the rest are
    /// surfaced to the translator as observations or end the task.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Timeout(_) | AgentError::ModelUnavailable(_) | AgentError::Navigation(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Navigation(_) => ErrorKind::Navigation,
            AgentError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            AgentError::NotInteractable { .. } => ErrorKind::NotInteractable,
            AgentError::Timeout(_) => ErrorKind::Timeout,
            AgentError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            AgentError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            AgentError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            AgentError::Browser(_) => ErrorKind::Browser,
        }
    }
}

/// Discriminant-only mirror of `AgentError`, serializable into the audit
/// trail and outbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Navigation,
    ElementNotFound,
    NotInteractable,
    Timeout,
    MalformedResponse,
    ModelUnavailable,
    BudgetExceeded,
    Browser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(AgentError::Timeout("body".into()).is_transient());
        assert!(AgentError::ModelUnavailable("503".into()).is_transient());
        assert!(AgentError::Navigation("net::ERR_RESET".into()).is_transient());
        assert!(!AgentError::ElementNotFound("#q".into()).is_transient());
        assert!(!AgentError::MalformedResponse("not json".into()).is_transient());
        assert!(!AgentError::BudgetExceeded("25 steps".into()).is_transient());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ElementNotFound).unwrap();
        assert_eq!(json, "\"element_not_found\"");
    }
}
