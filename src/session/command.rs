//! Command Request/Result types shared between a Session and its Manager.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// A command awaiting or currently in dispatch on a Session's queue.
///
/// Resolved exactly once: by framed completion, by timeout, or by session
/// termination. Never persisted beyond the session's own queue/slot.
pub struct CommandRequest {
    pub id: String,
    pub cmd: String,
    pub timeout: std::time::Duration,
    pub raw: bool,
    /// Fires exactly once with the final `CommandResult` or a terminal
    /// `EngineError`. `None` for background requests, whose synthetic
    /// result is produced immediately by the caller-facing API and never
    /// touches the queue's resolution path.
    pub outcome: Option<oneshot::Sender<Result<CommandResult, crate::error::EngineError>>>,
}

impl CommandRequest {
    pub fn new(
        cmd: String,
        timeout: std::time::Duration,
        raw: bool,
        outcome: Option<oneshot::Sender<Result<CommandResult, crate::error::EngineError>>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cmd,
            timeout,
            raw,
            outcome,
        }
    }
}

/// `(stdout, stderr, exitCode | null, signal | null)`.
///
/// `exit_code == None` is legal only for raw-mode success and abnormal
/// termination; the framer never distinguishes stderr from stdout on the
/// interactive channel, so `stderr` is always empty in normal mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(exit_code),
            signal: None,
        }
    }

    pub fn background_queued(cmd: &str, session_id: &str) -> Self {
        Self {
            stdout: format!("Command '{cmd}' queued in background session '{session_id}'"),
            stderr: String::new(),
            exit_code: Some(0),
            signal: None,
        }
    }
}
