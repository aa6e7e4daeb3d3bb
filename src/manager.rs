//! Session Manager: owns a Pool, the session registry, and the public API
//! surface. Applies configured policy (allow/deny lists, `maxSessions`) and
//! fans lifecycle events out to the event sink.

use crate::config::{BufferConfig, SecurityConfig, TimeoutConfig};
use crate::error::{EngineError, EngineResult};
use crate::events::SessionEvent;
use crate::pool::{Pool, PoolTimeouts};
use crate::session::command::CommandResult;
use crate::session::{Session, SessionInfo, SessionMode, SessionTimers, SessionType};
use crate::formatter::ShellKind;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

struct Policy {
    allowed: Vec<Regex>,
    blocked: Vec<Regex>,
}

impl Policy {
    fn from_config(config: &SecurityConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "skipping invalid policy pattern");
                        None
                    }
                })
                .collect()
        };
        Self {
            allowed: compile(&config.allowed_commands),
            blocked: compile(&config.blocked_commands),
        }
    }

    /// `allowedCommands` takes precedence when both apply.
    fn check(&self, cmd: &str) -> EngineResult<()> {
        if !self.allowed.is_empty() {
            if self.allowed.iter().any(|re| re.is_match(cmd)) {
                return Ok(());
            }
            return Err(EngineError::PolicyDenied(format!(
                "command does not match any allowed pattern: {cmd}"
            )));
        }
        if self.blocked.iter().any(|re| re.is_match(cmd)) {
            return Err(EngineError::PolicyDenied(format!(
                "command matches a blocked pattern: {cmd}"
            )));
        }
        Ok(())
    }
}

/// Parameters for `Manager::create_session`, grouped to avoid an
/// unreadable positional call.
pub struct CreateSessionRequest {
    pub id: String,
    pub host: String,
    pub username: String,
    pub key_path: String,
    pub session_type: SessionType,
    pub port: u16,
    pub mode: SessionMode,
    pub shell_kind: ShellKind,
    pub timeout: Option<Duration>,
}

pub struct Manager {
    pool: Arc<Pool>,
    registry: RwLock<HashMap<String, Session>>,
    insertion_order: RwLock<Vec<String>>,
    policy: Policy,
    security: SecurityConfig,
    timeouts: TimeoutConfig,
    buffers: BufferConfig,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Manager {
    /// Spawns the Manager behind an `Arc` so its internal event reactor can
    /// hold a handle back to the registry it prunes. Every lifecycle event a
    /// Session emits passes through that reactor first — which removes
    /// `Closed`/`Timeout` ids from the registry — before being teed out to
    /// the returned receiver for an external sink to observe.
    pub fn new(
        security: SecurityConfig,
        timeouts: TimeoutConfig,
        buffers: BufferConfig,
        pool_timeouts: PoolTimeouts,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
        let (external_tx, external_rx) = mpsc::unbounded_channel();
        let policy = Policy::from_config(&security);
        let pool = Arc::new(Pool::new(security.max_connections_per_host, pool_timeouts));
        let manager = Arc::new(Self {
            pool,
            registry: RwLock::new(HashMap::new()),
            insertion_order: RwLock::new(Vec::new()),
            policy,
            security,
            timeouts,
            buffers,
            event_tx: internal_tx,
        });

        let reactor = manager.clone();
        tokio::spawn(async move {
            while let Some(event) = internal_rx.recv().await {
                if event.is_terminal() {
                    reactor.remove_from_registry(event.session_id()).await;
                }
                if external_tx.send(event).is_err() {
                    break;
                }
            }
        });

        (manager, external_rx)
    }

    /// Idempotent: removing an id that is already absent (e.g. the session
    /// was closed via `close_session` before its `Closed` event arrived) is
    /// a no-op, since event delivery is at-least-once.
    async fn remove_from_registry(&self, id: &str) {
        self.registry.write().await.remove(id);
        self.insertion_order.write().await.retain(|x| x != id);
    }

    /// One-shot command execution over the SSH `exec` primitive: no
    /// delimiter framing, no queue, distinct from a shell Session.
    pub async fn execute_command(
        &self,
        host: &str,
        user: &str,
        key_path: &str,
        cmd: &str,
        port: u16,
        timeout: Duration,
    ) -> EngineResult<CommandResult> {
        if cmd.is_empty() {
            return Err(EngineError::InvalidArgument("command must not be empty".into()));
        }
        if timeout.is_zero() {
            return Err(EngineError::InvalidArgument("timeout must be > 0".into()));
        }
        self.policy.check(cmd)?;

        let transport = self.pool.acquire(host, user, key_path, port).await?;
        let mut channel = tokio::time::timeout(timeout, transport.exec(cmd))
            .await
            .map_err(|_| EngineError::CommandTimeout(timeout))??;

        let mut stdout = Vec::new();
        let mut exit_code = None;
        loop {
            match channel.wait().await {
                Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(russh::ChannelMsg::ExtendedData { data, .. }) => stdout.extend_from_slice(&data),
                Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status as i32);
                }
                Some(russh::ChannelMsg::Eof) | Some(russh::ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::new(),
            exit_code,
            signal: None,
        })
    }

    pub async fn create_session(&self, req: CreateSessionRequest) -> EngineResult<Session> {
        {
            let registry = self.registry.read().await;
            if registry.contains_key(&req.id) {
                return Err(EngineError::Duplicate(req.id));
            }
            if registry.len() >= self.security.max_sessions {
                return Err(EngineError::LimitExceeded(format!(
                    "max_sessions {} reached",
                    self.security.max_sessions
                )));
            }
        }

        let transport = self
            .pool
            .acquire(&req.host, &req.username, &req.key_path, req.port)
            .await?;
        let channel = transport.open_shell_channel(80, 24).await?;

        let timers = SessionTimers {
            default_command_timeout: req.timeout.unwrap_or_else(|| self.timeouts.command()),
            session_timeout: self.timeouts.session(),
            keep_alive_interval: self.timeouts.keep_alive_interval(),
            buffer_max_size: self.buffers.max_size,
            buffer_trim_to: self.buffers.trim_to,
        };

        let session = Session::open(
            req.id.clone(),
            req.host,
            req.username,
            req.port,
            req.session_type,
            req.mode,
            req.shell_kind,
            Box::new(channel),
            timers,
            self.event_tx.clone(),
            None,
        )
        .await?;

        self.registry.write().await.insert(req.id.clone(), session.clone());
        self.insertion_order.write().await.push(req.id.clone());
        let _ = self.event_tx.send(SessionEvent::created(req.id.clone()));
        info!(session_id = %req.id, "session registered");
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.registry.read().await.get(id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let order = self.insertion_order.read().await;
        let registry = self.registry.read().await;
        order
            .iter()
            .filter_map(|id| registry.get(id).map(Session::session_info))
            .collect()
    }

    pub async fn execute_in_session(
        &self,
        id: &str,
        cmd: &str,
        timeout: Option<Duration>,
        raw: bool,
    ) -> EngineResult<CommandResult> {
        self.policy.check(cmd)?;
        let session = self
            .registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        session.execute_command(cmd, timeout, raw).await
    }

    pub async fn get_session_output(
        &self,
        id: &str,
        lines: Option<i64>,
        clear: bool,
    ) -> EngineResult<Vec<String>> {
        let session = self
            .registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        session.get_buffered_output(lines, clear).await
    }

    pub async fn close_session(&self, id: &str) -> bool {
        let session = self.registry.write().await.remove(id);
        self.insertion_order.write().await.retain(|x| x != id);
        match session {
            Some(session) => {
                session.close();
                tokio::time::timeout(self.timeouts.force_close(), wait_inactive(&session))
                    .await
                    .ok();
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = self.insertion_order.read().await.clone();
        for id in ids {
            self.close_session(&id).await;
        }
        self.pool.disconnect_all().await;
    }

    pub async fn connection_count(&self) -> usize {
        self.pool.count().await
    }
}

async fn wait_inactive(session: &Session) {
    while session.is_active() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_wins_over_block_list_for_matching_command() {
        let mut security = SecurityConfig::default();
        security.allowed_commands = vec!["^ls".to_string()];
        security.blocked_commands = vec!["^ls".to_string()];
        let policy = Policy::from_config(&security);
        assert!(policy.check("ls -la").is_ok());
    }

    #[test]
    fn blocked_pattern_denies_when_no_allow_list() {
        let mut security = SecurityConfig::default();
        security.blocked_commands = vec!["rm -rf".to_string()];
        let policy = Policy::from_config(&security);
        assert!(matches!(policy.check("rm -rf /"), Err(EngineError::PolicyDenied(_))));
    }

    #[test]
    fn allow_list_rejects_nonmatching_command() {
        let mut security = SecurityConfig::default();
        security.allowed_commands = vec!["^ls".to_string()];
        let policy = Policy::from_config(&security);
        assert!(matches!(policy.check("rm -rf /"), Err(EngineError::PolicyDenied(_))));
    }

    #[test]
    fn no_policy_configured_allows_everything() {
        let policy = Policy::from_config(&SecurityConfig::default());
        assert!(policy.check("anything at all").is_ok());
    }

    #[tokio::test]
    async fn get_session_returns_none_for_unknown_id() {
        let (manager, _rx) = Manager::new(
            SecurityConfig::default(),
            TimeoutConfig::default(),
            BufferConfig::default(),
            PoolTimeouts::default(),
        );
        assert!(manager.get_session("nope").await.is_none());
    }

    #[tokio::test]
    async fn close_session_returns_false_for_unknown_id() {
        let (manager, _rx) = Manager::new(
            SecurityConfig::default(),
            TimeoutConfig::default(),
            BufferConfig::default(),
            PoolTimeouts::default(),
        );
        assert!(!manager.close_session("nope").await);
    }

    #[tokio::test]
    async fn fresh_manager_has_no_sessions() {
        let (manager, _rx) = Manager::new(
            SecurityConfig::default(),
            TimeoutConfig::default(),
            BufferConfig::default(),
            PoolTimeouts::default(),
        );
        assert!(manager.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn terminal_event_prunes_the_registry() {
        use crate::session::channel::fake::FakeChannel;
        use crate::session::{Session, SessionMode, SessionTimers, SessionType};

        let (manager, mut rx) = Manager::new(
            SecurityConfig::default(),
            TimeoutConfig::default(),
            BufferConfig::default(),
            PoolTimeouts::default(),
        );

        let (session_event_tx, _session_event_rx) = mpsc::unbounded_channel();
        let channel: Box<dyn crate::session::channel::SessionChannel> =
            Box::new(FakeChannel::new(Vec::new()));
        let session = Session::open(
            "s1".into(),
            "host".into(),
            "user".into(),
            22,
            SessionType::Interactive,
            SessionMode::Normal,
            ShellKind::Bash,
            channel,
            SessionTimers {
                default_command_timeout: Duration::from_millis(30_000),
                session_timeout: Duration::from_secs(600),
                keep_alive_interval: Duration::from_secs(30),
                buffer_max_size: 10_000,
                buffer_trim_to: 5_000,
            },
            session_event_tx,
            None,
        )
        .await
        .unwrap();

        manager.registry.write().await.insert("s1".into(), session);
        manager.insertion_order.write().await.push("s1".into());

        manager.event_tx.send(SessionEvent::timeout("s1".into())).unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.is_terminal());

        // the reactor processes the event before forwarding it, so by the
        // time it's observable on the external receiver the registry is
        // already pruned.
        assert!(manager.get_session("s1").await.is_none());
        assert!(manager.insertion_order.read().await.is_empty());
    }

    #[tokio::test]
    async fn removing_an_already_absent_id_is_a_no_op() {
        let (manager, _rx) = Manager::new(
            SecurityConfig::default(),
            TimeoutConfig::default(),
            BufferConfig::default(),
            PoolTimeouts::default(),
        );
        manager.remove_from_registry("never-existed").await;
        assert!(manager.list_sessions().await.is_empty());
    }
}
