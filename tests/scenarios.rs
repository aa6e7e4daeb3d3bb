//! Integration coverage for persistent-session command framing, driven
//! against the scripted `SharedFakeChannel` so framing runs without a live
//! SSH server — the same substitution `session::mod`'s own unit tests make,
//! just exercised end-to-end through the public `Session` API.
//!
//! Pool transport reuse and allow/block policy precedence are covered as
//! unit tests colocated with `pool` and `manager` instead: both require
//! either a live SSH server or reach into manager-private policy state that
//! has no public seam here.

use regex::Regex;
use ssh_session_engine::error::EngineError;
use ssh_session_engine::formatter::ShellKind;
use ssh_session_engine::session::channel::fake::{FakeChannel, SharedFakeChannel};
use ssh_session_engine::session::channel::{ChannelEvent, SessionChannel};
use ssh_session_engine::session::{Session, SessionMode, SessionTimers, SessionType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn open_session(shell_kind: ShellKind, session_type: SessionType) -> (Session, Arc<FakeChannel>) {
    let fake = Arc::new(FakeChannel::new(Vec::new()));
    let channel: Box<dyn SessionChannel> = Box::new(SharedFakeChannel(fake.clone()));
    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let session = Session::open(
        "scenario-session".into(),
        "host".into(),
        "user".into(),
        22,
        session_type,
        SessionMode::Normal,
        shell_kind,
        channel,
        SessionTimers::default(),
        event_tx,
        None,
    )
    .await
    .unwrap_or_else(|_| unreachable!("fake channel construction cannot fail"));
    (session, fake)
}

/// Pulls the most recently written command out of the fake channel and
/// extracts its `<stem>_START_<id>` / `<stem>_END_<id>` markers, whatever
/// quoting the target shell wraps them in.
async fn latest_markers(fake: &FakeChannel) -> (String, String) {
    let start_re = Regex::new(r"[0-9A-Za-z]+_START_[0-9a-fA-F-]+").unwrap_or_else(|_| unreachable!());
    let end_re = Regex::new(r"[0-9A-Za-z]+_END_[0-9a-fA-F-]+").unwrap_or_else(|_| unreachable!());

    for _ in 0..200 {
        let outbound = fake.outbound_snapshot().await;
        if let Some(last) = outbound.last() {
            let text = String::from_utf8_lossy(last);
            if let (Some(s), Some(e)) = (start_re.find(&text), end_re.find(&text)) {
                return (s.as_str().to_string(), e.as_str().to_string());
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("command was never dispatched to the fake channel");
}

#[tokio::test]
async fn scenario_1_bash_framing() {
    let (session, fake) = open_session(ShellKind::Bash, SessionType::Interactive).await;
    let exec = tokio::spawn({
        let session = session.clone();
        async move { session.execute_command("echo hi", None, false).await }
    });

    let (start, end) = latest_markers(&fake).await;
    fake.push(ChannelEvent::Data(format!("{start}\nhi\n{end}:0\n").into_bytes())).await;

    let result = exec.await.unwrap_or_else(|_| unreachable!()).unwrap_or_else(|_| unreachable!());
    assert_eq!(result.stdout, "hi");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stderr, "");
}

#[tokio::test]
async fn scenario_2_nonzero_exit() {
    let (session, fake) = open_session(ShellKind::Bash, SessionType::Interactive).await;
    let exec = tokio::spawn({
        let session = session.clone();
        async move { session.execute_command("false", None, false).await }
    });

    let (start, end) = latest_markers(&fake).await;
    fake.push(ChannelEvent::Data(format!("{start}\n{end}:1\n").into_bytes())).await;

    let result = exec.await.unwrap_or_else(|_| unreachable!()).unwrap_or_else(|_| unreachable!());
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.stdout, "");
}

#[tokio::test]
async fn scenario_3_powershell_exit_code() {
    let (session, fake) = open_session(ShellKind::PowerShell, SessionType::Interactive).await;
    let exec = tokio::spawn({
        let session = session.clone();
        async move { session.execute_command("Get-Item missing", None, false).await }
    });

    let (start, end) = latest_markers(&fake).await;
    fake.push(ChannelEvent::Data(
        format!("{start}\r\nGet-Item : ...\r\n{end}:1\r\n").into_bytes(),
    ))
    .await;

    let result = exec.await.unwrap_or_else(|_| unreachable!()).unwrap_or_else(|_| unreachable!());
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stdout.contains("Get-Item : ..."));
}

#[tokio::test]
async fn scenario_4_cmd_exit_code() {
    let (session, fake) = open_session(ShellKind::Cmd, SessionType::Interactive).await;
    let exec = tokio::spawn({
        let session = session.clone();
        async move { session.execute_command("dir nosuch", None, false).await }
    });

    let (start, end) = latest_markers(&fake).await;
    fake.push(ChannelEvent::Data(
        format!("{start} \r\nFile Not Found\r\n{end}:1\r\n").into_bytes(),
    ))
    .await;

    let result = exec.await.unwrap_or_else(|_| unreachable!()).unwrap_or_else(|_| unreachable!());
    assert_eq!(result.exit_code, Some(1));
}

#[tokio::test]
async fn scenario_5_command_timeout_then_clean_resubmit() {
    let (session, fake) = open_session(ShellKind::Bash, SessionType::Interactive).await;

    let result = session
        .execute_command("sleep 999", Some(Duration::from_millis(50)), false)
        .await;
    assert!(matches!(result, Err(EngineError::CommandTimeout(_))));

    let exec = tokio::spawn({
        let session = session.clone();
        async move { session.execute_command("echo again", None, false).await }
    });
    let (start, end) = latest_markers(&fake).await;
    fake.push(ChannelEvent::Data(format!("{start}\nagain\n{end}:0\n").into_bytes())).await;
    let result = exec.await.unwrap_or_else(|_| unreachable!()).unwrap_or_else(|_| unreachable!());
    assert_eq!(result.stdout, "again");
}

#[tokio::test]
async fn scenario_6_background_buffer_overflow_keeps_newest() {
    let (session, fake) = open_session(ShellKind::Bash, SessionType::Background).await;

    for i in 0..12_000 {
        fake.push(ChannelEvent::Data(format!("chunk-{i}").into_bytes())).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let output = session.get_buffered_output(None, false).await.unwrap_or_else(|_| unreachable!());
    assert_eq!(output.len(), 5_000);
    assert_eq!(output.last().map(String::as_str), Some("chunk-11999"));
}
