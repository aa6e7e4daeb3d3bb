//! Event Stream: typed lifecycle events flowing Session → Manager → an
//! external sink over an explicit `tokio::mpsc` channel rather than a
//! callback-based emitter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionEvent {
    Created { session_id: String, at: DateTime<Utc> },
    Closed { session_id: String, at: DateTime<Utc> },
    Error { session_id: String, message: String, at: DateTime<Utc> },
    Timeout { session_id: String, at: DateTime<Utc> },
}

impl SessionEvent {
    pub fn created(session_id: String) -> Self {
        SessionEvent::Created { session_id, at: Utc::now() }
    }

    pub fn closed(session_id: String) -> Self {
        SessionEvent::Closed { session_id, at: Utc::now() }
    }

    pub fn error(session_id: String, message: String) -> Self {
        SessionEvent::Error { session_id, message, at: Utc::now() }
    }

    pub fn timeout(session_id: String) -> Self {
        SessionEvent::Timeout { session_id, at: Utc::now() }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { session_id, .. }
            | SessionEvent::Closed { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::Timeout { session_id, .. } => session_id,
        }
    }

    /// `Closed` and `Timeout` are the events the Manager reacts to by
    /// removing the session from its registry; reacting to either twice for
    /// the same id must be a no-op, since delivery is at-least-once.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Closed { .. } | SessionEvent::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_extracted_from_every_variant() {
        assert_eq!(SessionEvent::created("a".into()).session_id(), "a");
        assert_eq!(SessionEvent::closed("b".into()).session_id(), "b");
        assert_eq!(SessionEvent::error("c".into(), "boom".into()).session_id(), "c");
        assert_eq!(SessionEvent::timeout("d".into()).session_id(), "d");
    }

    #[test]
    fn closed_and_timeout_are_flagged_terminal() {
        assert!(SessionEvent::closed("a".into()).is_terminal());
        assert!(SessionEvent::timeout("a".into()).is_terminal());
        assert!(!SessionEvent::created("a".into()).is_terminal());
        assert!(!SessionEvent::error("a".into(), "boom".into()).is_terminal());
    }
}
