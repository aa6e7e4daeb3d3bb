//! Persistent Session: one interactive shell channel, a command queue,
//! delimiter framing, keep-alive/inactivity timers, and a bounded output
//! buffer for background sessions.
//!
//! The single-writer/single-consumer contract is realized as an actor: a
//! dedicated tokio task owns the `SessionChannel`, the queue, the
//! accumulator, and every timer. The `Session` handle returned to callers
//! only ever talks to that task over channels, never touching the channel
//! or queue directly.

pub mod channel;
pub mod command;

use crate::error::{EngineError, EngineResult};
use crate::events::SessionEvent;
use crate::formatter::ShellKind;
use channel::{ChannelEvent, SessionChannel};
use chrono::{DateTime, Utc};
use command::{CommandRequest, CommandResult};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Interactive,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Normal,
    Raw,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Normal
    }
}

/// Timeout/buffer defaults. All configurable within documented bounds;
/// `Manager::create_session` is responsible for enforcing those bounds
/// before a `SessionTimers` value reaches here.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimers {
    pub default_command_timeout: Duration,
    pub session_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub buffer_max_size: usize,
    pub buffer_trim_to: usize,
}

impl Default for SessionTimers {
    fn default() -> Self {
        Self {
            default_command_timeout: Duration::from_millis(30_000),
            session_timeout: Duration::from_millis(600_000),
            keep_alive_interval: Duration::from_millis(30_000),
            buffer_max_size: 10_000,
            buffer_trim_to: 5_000,
        }
    }
}

/// Deep-copied, read-only export of Session state. Excludes
/// `environmentVars`, `commandHistory`, and `workingDirectory` — the tool
/// surface only ever needs the session's identity and liveness, not its
/// contents.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub host: String,
    pub username: String,
    pub port: u16,
    pub session_type: SessionType,
    pub mode: SessionMode,
    pub shell_kind: ShellKind,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

/// Caller-installed predicate rejecting commands before they reach the
/// channel or the history.
pub type CommandFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

struct SharedState {
    last_activity: std::sync::Mutex<DateTime<Utc>>,
    is_active: AtomicBool,
    command_history: std::sync::Mutex<Vec<String>>,
    output_buffer: std::sync::Mutex<VecDeque<String>>,
}

enum SessionMsg {
    Exec(CommandRequest),
    Close,
    GetBuffer {
        lines: Option<i64>,
        clear: bool,
        respond: oneshot::Sender<EngineResult<Vec<String>>>,
    },
}

/// Handle to a running Persistent Session. Cloning is cheap (an `Arc` plus
/// a channel sender); every clone talks to the same single actor task.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub host: String,
    pub username: String,
    pub port: u16,
    pub session_type: SessionType,
    pub mode: SessionMode,
    pub shell_kind: ShellKind,
    pub created_at: DateTime<Utc>,
    shared: Arc<SharedState>,
    msg_tx: mpsc::UnboundedSender<SessionMsg>,
    queue_depth: Arc<AtomicUsize>,
    filter: Option<CommandFilter>,
}

impl Session {
    /// Opens a shell channel and starts the actor task. Construction and
    /// initialization happen as one atomic async call: nothing can observe
    /// a Session handle whose actor is not yet running, so there is no
    /// distinct "double initialize" state to guard against.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        id: String,
        host: String,
        username: String,
        port: u16,
        session_type: SessionType,
        mode: SessionMode,
        shell_kind: ShellKind,
        mut channel: Box<dyn SessionChannel>,
        timers: SessionTimers,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        filter: Option<CommandFilter>,
    ) -> EngineResult<Session> {
        let now = Utc::now();
        let shared = Arc::new(SharedState {
            last_activity: std::sync::Mutex::new(now),
            is_active: AtomicBool::new(true),
            command_history: std::sync::Mutex::new(Vec::new()),
            output_buffer: std::sync::Mutex::new(VecDeque::new()),
        });
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let queue_depth = Arc::new(AtomicUsize::new(0));
        let delim_stem: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        // Short settle delay for the shell's own prompt/banner before we
        // report ready.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let actor = Actor {
            id: id.clone(),
            channel,
            msg_rx,
            shared: shared.clone(),
            queue_depth: queue_depth.clone(),
            event_tx,
            timers,
            delim_stem,
            shell_kind,
            is_background: matches!(session_type, SessionType::Background),
        };
        tokio::spawn(actor.run());

        debug!(session_id = %id, %host, %username, port, "session initialized");

        Ok(Session {
            id,
            host,
            username,
            port,
            session_type,
            mode,
            shell_kind,
            created_at: now,
            shared,
            msg_tx,
            queue_depth,
            filter,
        })
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active.load(Ordering::SeqCst)
    }

    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            host: self.host.clone(),
            username: self.username.clone(),
            port: self.port,
            session_type: self.session_type,
            mode: self.mode,
            shell_kind: self.shell_kind,
            created_at: self.created_at,
            last_activity: *self.shared.last_activity.lock().unwrap_or_else(|e| e.into_inner()),
            is_active: self.is_active(),
        }
    }

    pub async fn execute_command(
        &self,
        cmd: &str,
        timeout: Option<Duration>,
        raw: bool,
    ) -> EngineResult<CommandResult> {
        if cmd.is_empty() {
            return Err(EngineError::InvalidArgument("command must not be empty".into()));
        }
        let timeout = timeout.unwrap_or(Duration::from_millis(30_000));
        if timeout.is_zero() {
            return Err(EngineError::InvalidArgument("timeout must be > 0".into()));
        }
        if !self.is_active() {
            return Err(EngineError::SessionInactive(self.id.clone()));
        }
        if let Some(filter) = &self.filter {
            if !filter(cmd) {
                return Err(EngineError::PolicyDenied(format!(
                    "command rejected by session filter: {cmd}"
                )));
            }
        }

        self.shared.command_history.lock().unwrap_or_else(|e| e.into_inner()).push(cmd.to_string());
        *self.shared.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();

        let background = matches!(self.session_type, SessionType::Background);

        if background {
            let req = CommandRequest::new(cmd.to_string(), timeout, raw, None);
            self.queue_depth.fetch_add(1, Ordering::SeqCst);
            let _ = self.msg_tx.send(SessionMsg::Exec(req));
            return Ok(CommandResult::background_queued(cmd, &self.id));
        }

        let (tx, rx) = oneshot::channel();
        let req = CommandRequest::new(cmd.to_string(), timeout, raw, Some(tx));
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        self.msg_tx
            .send(SessionMsg::Exec(req))
            .map_err(|_| EngineError::SessionInactive(self.id.clone()))?;

        rx.await.map_err(|_| EngineError::SessionInactive(self.id.clone()))?
    }

    pub async fn get_buffered_output(&self, lines: Option<i64>, clear: bool) -> EngineResult<Vec<String>> {
        if let Some(n) = lines {
            if n <= 0 {
                return Err(EngineError::InvalidArgument("lines must be > 0".into()));
            }
        }
        let (tx, rx) = oneshot::channel();
        self.msg_tx
            .send(SessionMsg::GetBuffer { lines, clear, respond: tx })
            .map_err(|_| EngineError::SessionInactive(self.id.clone()))?;
        rx.await.map_err(|_| EngineError::SessionInactive(self.id.clone()))?
    }

    /// Cancels timers, drops the queue, and ends the channel. Does not wait
    /// for the actor to finish tearing down; the Manager bounds that wait.
    pub fn close(&self) {
        self.shared.is_active.store(false, Ordering::SeqCst);
        let _ = self.msg_tx.send(SessionMsg::Close);
    }
}

struct Actor {
    id: String,
    channel: Box<dyn SessionChannel>,
    msg_rx: mpsc::UnboundedReceiver<SessionMsg>,
    shared: Arc<SharedState>,
    queue_depth: Arc<AtomicUsize>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    timers: SessionTimers,
    delim_stem: String,
    shell_kind: ShellKind,
    is_background: bool,
}

struct InFlight {
    request: CommandRequest,
    accumulator: String,
    start_marker: String,
    end_marker: String,
}

impl Actor {
    async fn run(mut self) {
        let mut queue: VecDeque<CommandRequest> = VecDeque::new();
        let mut current: Option<InFlight> = None;

        let mut command_timer: Pin<Box<tokio::time::Sleep>> =
            Box::pin(tokio::time::sleep(Duration::from_secs(86_400 * 365)));
        let mut command_timer_active = false;

        let mut inactivity_timer: Pin<Box<tokio::time::Sleep>> =
            Box::pin(tokio::time::sleep(self.timers.session_timeout));

        let mut keep_alive = tokio::time::interval(self.timers.keep_alive_interval);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keep_alive.tick().await; // first tick fires immediately; discard it

        loop {
            tokio::select! {
                msg = self.msg_rx.recv() => {
                    match msg {
                        Some(SessionMsg::Exec(req)) => {
                            inactivity_timer.as_mut().reset(tokio::time::Instant::now() + self.timers.session_timeout);
                            queue.push_back(req);
                            if current.is_none() {
                                self.dispatch_next(&mut queue, &mut current, &mut command_timer, &mut command_timer_active).await;
                            }
                        }
                        Some(SessionMsg::GetBuffer { lines, clear, respond }) => {
                            let result = Self::read_buffer(&self.shared, lines, clear);
                            let _ = respond.send(result);
                        }
                        Some(SessionMsg::Close) | None => {
                            self.teardown(queue, current, "closed by caller").await;
                            return;
                        }
                    }
                }
                ev = self.channel.recv() => {
                    match ev {
                        Ok(ChannelEvent::Data(bytes)) | Ok(ChannelEvent::ExtendedData(bytes)) => {
                            self.on_bytes(bytes, &mut queue, &mut current, &mut command_timer, &mut command_timer_active).await;
                        }
                        Ok(ChannelEvent::Eof) => {
                            trace!(session_id = %self.id, "channel eof");
                        }
                        Ok(ChannelEvent::Close) | Err(_) => {
                            self.teardown(queue, current, "channel closed").await;
                            return;
                        }
                    }
                }
                _ = keep_alive.tick(), if queue.is_empty() && current.is_none() => {
                    if let Err(e) = self.channel.send(self.shell_kind.keep_alive().as_bytes()).await {
                        warn!(session_id = %self.id, error = %e, "keep-alive write failed");
                    }
                }
                () = &mut command_timer, if command_timer_active => {
                    command_timer_active = false;
                    self.on_command_timeout(&mut queue, &mut current, &mut command_timer, &mut command_timer_active).await;
                }
                () = &mut inactivity_timer => {
                    let _ = self.event_tx.send(SessionEvent::timeout(self.id.clone()));
                    self.teardown(queue, current, "inactivity timeout").await;
                    return;
                }
            }
        }
    }

    async fn dispatch_next(
        &mut self,
        queue: &mut VecDeque<CommandRequest>,
        current: &mut Option<InFlight>,
        command_timer: &mut Pin<Box<tokio::time::Sleep>>,
        command_timer_active: &mut bool,
    ) {
        let Some(req) = queue.pop_front() else { return };
        self.queue_depth.fetch_sub(1, Ordering::SeqCst);
        let timeout = req.timeout;

        let write_result = if req.raw {
            self.channel.send(format!("{}\n", req.cmd).as_bytes()).await
        } else {
            let start = format!("{}_START_{}", self.delim_stem, req.id);
            let end = format!("{}_END_{}", self.delim_stem, req.id);
            match self.shell_kind.wrap(&req.cmd, &start, &end) {
                Ok(wrapped) => self.channel.send(format!("{wrapped}\n").as_bytes()).await,
                Err(e) => Err(e),
            }
        };

        let (start_marker, end_marker) = if req.raw {
            (String::new(), String::new())
        } else {
            (
                format!("{}_START_{}", self.delim_stem, req.id),
                format!("{}_END_{}", self.delim_stem, req.id),
            )
        };

        if let Err(e) = write_result {
            warn!(session_id = %self.id, command_id = %req.id, error = %e, "failed to dispatch command");
            Self::resolve(req, Err(e));
            self.dispatch_next_boxed(queue, current, command_timer, command_timer_active)
                .await;
            return;
        }

        command_timer.as_mut().reset(tokio::time::Instant::now() + timeout);
        *command_timer_active = true;
        *current = Some(InFlight {
            request: req,
            accumulator: String::new(),
            start_marker,
            end_marker,
        });
    }

    // select! arms can't directly recurse into an async fn that takes &mut self
    // by value across an await point inside another async fn without boxing;
    // this indirection just names that recursive call.
    fn dispatch_next_boxed<'a>(
        &'a mut self,
        queue: &'a mut VecDeque<CommandRequest>,
        current: &'a mut Option<InFlight>,
        command_timer: &'a mut Pin<Box<tokio::time::Sleep>>,
        command_timer_active: &'a mut bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.dispatch_next(queue, current, command_timer, command_timer_active))
    }

    async fn on_bytes(
        &mut self,
        bytes: Vec<u8>,
        queue: &mut VecDeque<CommandRequest>,
        current: &mut Option<InFlight>,
        command_timer: &mut Pin<Box<tokio::time::Sleep>>,
        command_timer_active: &mut bool,
    ) {
        let text = String::from_utf8_lossy(&bytes);

        if self.is_background {
            let mut buf = self.shared.output_buffer.lock().unwrap_or_else(|e| e.into_inner());
            buf.push_back(text.to_string());
            if buf.len() > self.timers.buffer_max_size {
                let excess = buf.len() - self.timers.buffer_trim_to;
                for _ in 0..excess {
                    buf.pop_front();
                }
            }
        }

        let Some(inflight) = current.as_mut() else { return };
        inflight.accumulator.push_str(&text);

        if inflight.request.raw {
            // Raw mode never resolves on content; only the per-command timer does.
            return;
        }

        if let Some((stdout, code)) = Self::try_extract_frame(
            &inflight.accumulator,
            &inflight.start_marker,
            &inflight.end_marker,
        ) {
            let finished = current.take().unwrap_or_else(|| unreachable!());
            *command_timer_active = false;
            Self::resolve(finished.request, Ok(CommandResult::success(stdout, code)));
            self.dispatch_next_boxed(queue, current, command_timer, command_timer_active)
                .await;
        }
    }

    async fn on_command_timeout(
        &mut self,
        queue: &mut VecDeque<CommandRequest>,
        current: &mut Option<InFlight>,
        command_timer: &mut Pin<Box<tokio::time::Sleep>>,
        command_timer_active: &mut bool,
    ) {
        let Some(inflight) = current.take() else { return };
        if inflight.request.raw {
            Self::resolve(
                inflight.request,
                Ok(CommandResult::success(inflight.accumulator, 0)),
            );
        } else {
            let timeout = inflight.request.timeout;
            Self::resolve(inflight.request, Err(EngineError::CommandTimeout(timeout)));
        }
        self.dispatch_next_boxed(queue, current, command_timer, command_timer_active)
            .await;
    }

    /// Locates the last `start` occurrence and the first `end:<digits>` match
    /// strictly after it. Returns `None` (keep waiting) when an end marker
    /// has appeared without its start — the start may still be in flight
    /// behind a truncated echo.
    fn try_extract_frame(accumulated: &str, start: &str, end: &str) -> Option<(String, i32)> {
        let pattern = format!(r"{}:(\d+)", regex::escape(end));
        let re = regex::Regex::new(&pattern).ok()?;
        let m = re.find(accumulated)?;
        let code: i32 = re.captures(accumulated)?.get(1)?.as_str().parse().ok()?;
        let start_idx = accumulated.rfind(start)?;
        let start_end = start_idx + start.len();
        if start_end > m.start() {
            return None;
        }
        let raw = &accumulated[start_end..m.start()];
        Some((Self::strip_one_blank_line(raw), code))
    }

    fn strip_one_blank_line(s: &str) -> String {
        let s = s.strip_prefix("\r\n").or_else(|| s.strip_prefix('\n')).unwrap_or(s);
        let s = s.strip_suffix("\r\n").or_else(|| s.strip_suffix('\n')).unwrap_or(s);
        s.to_string()
    }

    fn resolve(req: CommandRequest, result: Result<CommandResult, EngineError>) {
        if let Some(outcome) = req.outcome {
            let _ = outcome.send(result);
        }
    }

    fn read_buffer(
        shared: &SharedState,
        lines: Option<i64>,
        clear: bool,
    ) -> EngineResult<Vec<String>> {
        let mut buf = shared.output_buffer.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot: Vec<String> = match lines {
            Some(n) => {
                let n = n as usize;
                let skip = buf.len().saturating_sub(n);
                buf.iter().skip(skip).cloned().collect()
            }
            None => buf.iter().cloned().collect(),
        };
        if clear {
            buf.clear();
        }
        Ok(snapshot)
    }

    async fn teardown(mut self, queue: VecDeque<CommandRequest>, current: Option<InFlight>, reason: &str) {
        self.shared.is_active.store(false, Ordering::SeqCst);
        if let Some(inflight) = current {
            Self::resolve(
                inflight.request,
                Err(EngineError::SessionInactive(self.id.clone())),
            );
        }
        for req in queue {
            Self::resolve(req, Err(EngineError::SessionInactive(self.id.clone())));
        }
        self.channel.close().await;
        let _ = self.event_tx.send(SessionEvent::closed(self.id.clone()));
        debug!(session_id = %self.id, %reason, "session actor stopped");
    }
}
