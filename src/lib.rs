//! Persistent interactive shell sessions over SSH.
//!
//! Owns and drives long-lived shells across heterogeneous remote shells
//! (`bash`/`sh`, PowerShell, `cmd`), giving callers stable session
//! identities, command-by-command output framing, and bounded background
//! capture. The tool-dispatch layer, configuration loading, CLI argument
//! parsing, and audit log persistence are external collaborators; this
//! crate exposes the typed surface they consume.

pub mod config;
pub mod error;
pub mod events;
pub mod formatter;
pub mod manager;
pub mod pool;
pub mod sanitizer;
pub mod session;
pub mod tool_types;

pub use error::{EngineError, EngineResult};
pub use events::SessionEvent;
pub use formatter::ShellKind;
pub use manager::{CreateSessionRequest, Manager};
pub use session::command::CommandResult;
pub use session::{Session, SessionInfo, SessionMode, SessionType};
