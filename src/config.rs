//! Configuration Types: the serde-deserializable surface an external loader
//! populates and hands to the core at construction. The core validates
//! bounds on these values; it never reads files or environment variables
//! itself.

use crate::error::{EngineError, EngineResult};
use crate::formatter::ShellKind;
use crate::session::SessionMode;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub private_key_path: String,
    #[serde(default)]
    pub passphrase: Option<SecretString>,
    #[serde(default)]
    pub shell: ShellKind,
}

fn default_port() -> u16 {
    22
}

impl TargetConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.host.is_empty() || self.username.is_empty() || self.private_key_path.is_empty() {
            return Err(EngineError::InvalidArgument(
                "host, username, and private_key_path must be non-empty".into(),
            ));
        }
        if self.port == 0 {
            return Err(EngineError::InvalidArgument("port must be in 1..=65535".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub command_ms: u64,
    pub session_ms: u64,
    pub connection_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub force_close_ms: u64,
    pub session_close_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_ms: 30_000,
            session_ms: 600_000,
            connection_ms: 30_000,
            keep_alive_interval_ms: 30_000,
            force_close_ms: 3_000,
            session_close_ms: 5_000,
        }
    }
}

const MAX_TIMEOUT_MS: u64 = 3_600_000;

impl TimeoutConfig {
    pub fn validate(&self) -> EngineResult<()> {
        for (name, ms) in [
            ("command_ms", self.command_ms),
            ("session_ms", self.session_ms),
            ("connection_ms", self.connection_ms),
            ("keep_alive_interval_ms", self.keep_alive_interval_ms),
            ("force_close_ms", self.force_close_ms),
            ("session_close_ms", self.session_close_ms),
        ] {
            if ms == 0 || ms > MAX_TIMEOUT_MS {
                return Err(EngineError::InvalidArgument(format!(
                    "{name} must be > 0 and <= {MAX_TIMEOUT_MS}ms, got {ms}"
                )));
            }
        }
        Ok(())
    }

    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    pub fn session(&self) -> Duration {
        Duration::from_millis(self.session_ms)
    }

    pub fn connection(&self) -> Duration {
        Duration::from_millis(self.connection_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn force_close(&self) -> Duration {
        Duration::from_millis(self.force_close_ms)
    }

    pub fn session_close(&self) -> Duration {
        Duration::from_millis(self.session_close_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_size: usize,
    pub trim_to: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { max_size: 10_000, trim_to: 5_000 }
    }
}

const MAX_BUFFER_SIZE: usize = 100_000;

impl BufferConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_size == 0 || self.max_size > MAX_BUFFER_SIZE {
            return Err(EngineError::InvalidArgument(format!(
                "buffer max_size must be in 1..={MAX_BUFFER_SIZE}"
            )));
        }
        if self.trim_to == 0 || self.trim_to > self.max_size {
            return Err(EngineError::InvalidArgument(
                "buffer trim_to must be in 1..=max_size".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub max_sessions: usize,
    pub session_timeout_ms: u64,
    pub max_connections_per_host: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
            max_sessions: 10,
            session_timeout_ms: 600_000,
            max_connections_per_host: 10,
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_sessions == 0 || self.max_sessions > 100 {
            return Err(EngineError::InvalidArgument(
                "max_sessions must be in 1..=100".into(),
            ));
        }
        if self.session_timeout_ms == 0 || self.session_timeout_ms > MAX_TIMEOUT_MS {
            return Err(EngineError::InvalidArgument(format!(
                "session_timeout_ms must be > 0 and <= {MAX_TIMEOUT_MS}ms"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub include_commands: bool,
    pub include_responses: bool,
    pub max_response_length: usize,
    pub audit: AuditConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            include_commands: true,
            include_responses: false,
            max_response_length: 4_000,
            audit: AuditConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    pub target: Option<TargetConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub default_mode: SessionMode,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(target) = &self.target {
            target.validate()?;
        }
        self.timeouts.validate()?;
        self.buffers.validate()?;
        self.security.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = TimeoutConfig::default();
        cfg.command_ms = 0;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn timeout_above_one_hour_is_rejected() {
        let mut cfg = TimeoutConfig::default();
        cfg.session_ms = MAX_TIMEOUT_MS + 1;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn buffer_above_cap_is_rejected() {
        let mut cfg = BufferConfig::default();
        cfg.max_size = MAX_BUFFER_SIZE + 1;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn trim_to_above_max_size_is_rejected() {
        let cfg = BufferConfig { max_size: 100, trim_to: 200 };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn max_sessions_out_of_bounds_is_rejected() {
        let mut cfg = SecurityConfig::default();
        cfg.max_sessions = 101;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
        cfg.max_sessions = 0;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn target_with_empty_host_is_rejected() {
        let cfg = TargetConfig {
            host: "".into(),
            port: 22,
            username: "u".into(),
            private_key_path: "/tmp/key".into(),
            passphrase: None,
            shell: ShellKind::Bash,
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn target_with_port_zero_is_rejected() {
        let cfg = TargetConfig {
            host: "h".into(),
            port: 0,
            username: "u".into(),
            private_key_path: "/tmp/key".into(),
            passphrase: None,
            shell: ShellKind::Bash,
        };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidArgument(_))));
    }
}
