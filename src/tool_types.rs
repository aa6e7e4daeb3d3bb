//! Tool surface DTOs consumed by the external dispatch layer. Names are part
//! of the wire contract; fields derive `schemars::JsonSchema` since an
//! external JSON-RPC-style router serializes these directly.

use crate::formatter::ShellKind;
use crate::session::{SessionMode, SessionType};
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    22
}
fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SshExecuteRequest {
    pub host: String,
    pub username: String,
    pub private_key_path: String,
    pub command: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct SshExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SshSessionCreateRequest {
    pub session_id: String,
    pub host: String,
    pub username: String,
    pub private_key_path: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default, rename = "shellType")]
    pub shell_type: ShellKind,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SshSessionExecuteRequest {
    pub session_id: String,
    pub command: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SshSessionListRequest {}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SshSessionCloseRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct SshSessionCloseResponse {
    pub success: bool,
}

fn default_clear() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct SshSessionOutputRequest {
    pub session_id: String,
    pub lines: Option<i64>,
    #[serde(default = "default_clear")]
    pub clear: bool,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct SshSessionOutputResponse {
    pub output: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_execute_request_defaults_port_and_timeout() {
        let json = r#"{"host":"h","username":"u","private_key_path":"/k","command":"ls"}"#;
        let req: SshExecuteRequest = serde_json::from_str(json).unwrap_or_else(|_| unreachable!());
        assert_eq!(req.port, 22);
        assert_eq!(req.timeout, 30_000);
    }

    #[test]
    fn session_create_request_parses_shell_type_alias() {
        let json = r#"{
            "session_id":"s1","host":"h","username":"u","private_key_path":"/k",
            "type":"interactive","shellType":"powershell"
        }"#;
        let req: SshSessionCreateRequest = serde_json::from_str(json).unwrap_or_else(|_| unreachable!());
        assert_eq!(req.shell_type, ShellKind::PowerShell);
        assert_eq!(req.session_type, SessionType::Interactive);
    }

    #[test]
    fn session_output_request_defaults_clear_to_false() {
        let json = r#"{"session_id":"s1","lines":100}"#;
        let req: SshSessionOutputRequest = serde_json::from_str(json).unwrap_or_else(|_| unreachable!());
        assert!(!req.clear);
        assert_eq!(req.lines, Some(100));
    }
}
