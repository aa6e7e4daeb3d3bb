//! Connection Pool: keyed, reusable SSH transports with liveness tracking
//! and a per-pool cap. Requests sharing a `(username, host, port)` key reuse
//! a live transport instead of opening a fresh connection and handshake
//! per call.

use crate::error::{EngineError, EngineResult};
use crate::session::channel::RusshSessionChannel;
use russh::client::{self, Handler};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// `(username, host, port)` — two requests with the same key share a
/// transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub username: String,
    pub host: String,
    pub port: u16,
}

struct SshHandler;

impl Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Owned exclusively by the Pool; never shared with callers directly, only
/// channels derived from the handle are handed out.
struct TransportEntry {
    handle: Arc<client::Handle<SshHandler>>,
}

impl TransportEntry {
    /// Consults the live handle rather than a cached flag, so a transport
    /// that died (peer hangup, network drop) is detected on the next
    /// `acquire` instead of being handed back out forever.
    fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }
}

#[derive(Debug, Clone)]
pub struct PoolTimeouts {
    pub ready_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_count_max: usize,
    pub force_close: Duration,
}

impl Default for PoolTimeouts {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(30_000),
            keepalive_interval: Duration::from_millis(30_000),
            keepalive_count_max: 3,
            force_close: Duration::from_millis(3_000),
        }
    }
}

/// A shared SSH transport, handed out by `Pool::acquire`. Owns only what a
/// caller needs to open further channels on it; the transport itself stays
/// behind the Pool.
#[derive(Clone)]
pub struct Transport {
    handle: Arc<client::Handle<SshHandler>>,
}

impl Transport {
    pub async fn open_shell_channel(
        &self,
        cols: u32,
        rows: u32,
    ) -> EngineResult<RusshSessionChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(EngineError::connection_failed)?;
        channel
            .request_pty(true, "xterm-256color", cols, rows, 0, 0, &[])
            .await
            .map_err(|e| EngineError::ShellFailure(format!("request_pty failed: {e}")))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| EngineError::ShellFailure(format!("request_shell failed: {e}")))?;
        Ok(RusshSessionChannel { channel })
    }

    pub async fn exec(&self, cmd: &str) -> EngineResult<russh::Channel<russh::client::Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(EngineError::connection_failed)?;
        channel
            .exec(true, cmd)
            .await
            .map_err(|e| EngineError::ShellFailure(format!("exec failed: {e}")))?;
        Ok(channel)
    }
}

/// Hands out a ready SSH transport per `(username, host, port)`, reusing a
/// live entry or opening a new one subject to a per-pool cap. Concurrent
/// callers for distinct keys proceed independently; concurrent callers for
/// the same key coalesce on a per-key lock so only one handshake happens.
pub struct Pool {
    entries: Mutex<HashMap<ConnectionKey, TransportEntry>>,
    key_locks: Mutex<HashMap<ConnectionKey, Arc<Mutex<()>>>>,
    max_entries: usize,
    timeouts: PoolTimeouts,
}

impl Pool {
    pub fn new(max_entries: usize, timeouts: PoolTimeouts) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            max_entries,
            timeouts,
        }
    }

    async fn key_lock(&self, key: &ConnectionKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn acquire(
        &self,
        host: &str,
        user: &str,
        key_path: &str,
        port: u16,
    ) -> EngineResult<Transport> {
        if host.is_empty() || user.is_empty() || key_path.is_empty() {
            return Err(EngineError::InvalidArgument(
                "host, user, and key_path must be non-empty".into(),
            ));
        }
        if port == 0 {
            return Err(EngineError::InvalidArgument("port must be in 1..=65535".into()));
        }

        let key = ConnectionKey {
            username: user.to_string(),
            host: host.to_string(),
            port,
        };

        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                if entry.is_connected() {
                    return Ok(Transport { handle: entry.handle.clone() });
                }
                entries.remove(&key);
            }
        }

        {
            let entries = self.entries.lock().await;
            if entries.len() >= self.max_entries {
                return Err(EngineError::LimitExceeded(format!(
                    "pool capacity {} reached",
                    self.max_entries
                )));
            }
        }

        let resolved_key = resolve_key_path(key_path)?;
        let handle = tokio::time::timeout(
            self.timeouts.ready_timeout,
            connect_and_authenticate(host, port, user, &resolved_key),
        )
        .await
        .map_err(|_| EngineError::ConnectionTimeout(self.timeouts.ready_timeout))??;

        let handle = Arc::new(handle);
        let entry = TransportEntry { handle: handle.clone() };

        debug!(%host, %user, port, "ssh transport established");
        self.entries.lock().await.insert(key, entry);
        Ok(Transport { handle })
    }

    /// Initiates close on every live transport, bounded by `force_close` per
    /// entry, and clears the registry unconditionally regardless of how many
    /// closes succeeded.
    pub async fn disconnect_all(&self) {
        let mut entries = self.entries.lock().await;
        for (key, entry) in entries.drain() {
            let close = entry.handle.disconnect(
                russh::Disconnect::ByApplication,
                "pool shutdown",
                "en",
            );
            if tokio::time::timeout(self.timeouts.force_close, close).await.is_err() {
                warn!(host = %key.host, user = %key.username, "transport close timed out");
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

async fn connect_and_authenticate(
    host: &str,
    port: u16,
    user: &str,
    key_path: &Path,
) -> EngineResult<client::Handle<SshHandler>> {
    let config = client::Config::default();
    let mut session = client::connect(config.into(), (host, port), SshHandler)
        .await
        .map_err(EngineError::connection_failed)?;

    let keypair = russh::keys::load_secret_key(key_path, None)
        .map_err(|e| EngineError::KeyUnavailable(format!("{}: {e}", key_path.display())))?;

    let auth = session
        .authenticate_publickey(
            user,
            russh::keys::PrivateKeyWithHashAlg::new(Arc::new(keypair), Some(russh::keys::HashAlg::Sha256)),
        )
        .await
        .map_err(EngineError::connection_failed)?;

    match auth {
        russh::client::AuthResult::Success => Ok(session),
        _ => Err(EngineError::connection_failed(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "public key authentication rejected",
        ))),
    }
}

/// Resolves a private key path: absolute paths are canonicalized directly,
/// relative paths are tried against the current directory, then `~/.ssh/`,
/// then a literal `~/` expansion.
fn resolve_key_path(path: &str) -> EngineResult<PathBuf> {
    let path_buf = PathBuf::from(path);
    let not_found = |p: &str| EngineError::KeyUnavailable(format!("private key not found: {p}"));

    if path_buf.is_absolute() {
        return std::fs::canonicalize(&path_buf).map_err(|_| not_found(path));
    }
    if let Ok(canonical) = std::fs::canonicalize(&path_buf) {
        return Ok(canonical);
    }
    if let Some(home) = dirs::home_dir() {
        let in_ssh = home.join(".ssh").join(&path_buf);
        if in_ssh.exists() {
            return std::fs::canonicalize(in_ssh).map_err(|_| not_found(path));
        }
        if let Some(stripped) = path.strip_prefix("~/") {
            return std::fs::canonicalize(home.join(stripped)).map_err(|_| not_found(path));
        }
    }
    Err(not_found(path))
}
