//! Error taxonomy shared across the Pool, Session, and Manager.
//!
//! One flat enum rather than per-module errors: callers (the tool-dispatch
//! layer) need a single, stable set of kinds to map onto their own wire
//! errors regardless of which component raised them.

use std::time::Duration;
use thiserror::Error;

/// Structured failure carried across the connection/session engine.
///
/// Every variant is meant to be matched on by name, since the wire contract
/// names these kinds directly, rather than by inspecting message text.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("private key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("shell failed: {0}")]
    ShellFailure(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("session inactive: {0}")]
    SessionInactive(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn connection_failed<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::ConnectionFailed(Box::new(cause))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
