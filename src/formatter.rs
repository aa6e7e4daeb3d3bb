//! Shell Formatter
//!
//! Wraps a user command with per-shell prologue/epilogue so its stdout and
//! exit code can be recovered from an otherwise unstructured byte stream,
//! and supplies the shell-specific keep-alive no-op.

use crate::error::EngineError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Remote shell dialects this engine knows how to frame commands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Bash,
    Sh,
    #[serde(rename = "powershell")]
    PowerShell,
    Cmd,
}

impl Default for ShellKind {
    fn default() -> Self {
        ShellKind::Bash
    }
}

impl ShellKind {
    /// Wrap `cmd` so the channel emits `start` before it runs and
    /// `end` concatenated with the shell's exit-status expression after.
    pub fn wrap(&self, cmd: &str, start: &str, end: &str) -> Result<String, EngineError> {
        if start.is_empty() || end.is_empty() {
            return Err(EngineError::InvalidArgument(
                "marker must not be empty".into(),
            ));
        }
        if cmd.is_empty() {
            return Err(EngineError::InvalidArgument(
                "command must not be empty".into(),
            ));
        }

        Ok(match self {
            ShellKind::Bash | ShellKind::Sh => {
                format!("echo \"{start}\"; {cmd}; echo \"{end}:$?\"")
            }
            ShellKind::PowerShell => {
                format!("Write-Output \"{start}\"; {cmd}; Write-Output \"{end}:$LASTEXITCODE\"")
            }
            ShellKind::Cmd => {
                format!(
                    "echo {start} & {cmd} & echo %ERRORLEVEL% > NUL & echo {end}:%ERRORLEVEL%"
                )
            }
        })
    }

    /// A no-op line that keeps an idle channel from being reaped by an
    /// intermediary, without interfering with command framing.
    pub fn keep_alive(&self) -> &'static str {
        match self {
            ShellKind::Bash | ShellKind::Sh => "\n",
            ShellKind::PowerShell => "Write-Output \"\"\n",
            ShellKind::Cmd => "echo.\n",
        }
    }
}

/// Apply `<end_marker>:(\d+)` to `accumulated` and return the first capture
/// as an integer, or `None` if the marker hasn't appeared yet.
pub fn extract_exit_code(accumulated: &str, end_marker: &str) -> Option<i32> {
    let pattern = format!(r"{}:(\d+)", regex::escape(end_marker));
    let re = Regex::new(&pattern).ok()?;
    let code = re.captures(accumulated)?.get(1)?.as_str();
    code.parse::<i32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_wrap_emits_echo_markers() {
        let wrapped = ShellKind::Bash.wrap("echo hi", "S", "E").unwrap();
        assert_eq!(wrapped, "echo \"S\"; echo hi; echo \"E:$?\"");
    }

    #[test]
    fn powershell_wrap_emits_write_output_markers() {
        let wrapped = ShellKind::PowerShell
            .wrap("Get-Item missing", "S", "E")
            .unwrap();
        assert_eq!(
            wrapped,
            "Write-Output \"S\"; Get-Item missing; Write-Output \"E:$LASTEXITCODE\""
        );
    }

    #[test]
    fn cmd_wrap_emits_errorlevel_markers() {
        let wrapped = ShellKind::Cmd.wrap("dir nosuch", "S", "E").unwrap();
        assert_eq!(
            wrapped,
            "echo S & dir nosuch & echo %ERRORLEVEL% > NUL & echo E:%ERRORLEVEL%"
        );
    }

    #[test]
    fn empty_marker_is_invalid_argument() {
        assert!(matches!(
            ShellKind::Bash.wrap("echo hi", "", "E"),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn empty_command_is_invalid_argument() {
        assert!(matches!(
            ShellKind::Bash.wrap("", "S", "E"),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn extracts_zero_exit_code() {
        let out = "S\nhi\nE:0\n";
        assert_eq!(extract_exit_code(out, "E"), Some(0));
    }

    #[test]
    fn extracts_nonzero_exit_code() {
        let out = "S\nE:1\n";
        assert_eq!(extract_exit_code(out, "E"), Some(1));
    }

    #[test]
    fn missing_marker_returns_none() {
        assert_eq!(extract_exit_code("no marker here", "E"), None);
    }

    #[test]
    fn keep_alive_strings_are_shell_specific_noops() {
        assert_eq!(ShellKind::Bash.keep_alive(), "\n");
        assert_eq!(ShellKind::PowerShell.keep_alive(), "Write-Output \"\"\n");
        assert_eq!(ShellKind::Cmd.keep_alive(), "echo.\n");
    }
}
