//! The byte-transport seam a Persistent Session drives.
//!
//! Talking directly to a `russh::Channel` would make the marker-framing
//! state machine untestable without a live SSH server. The framing lives
//! against a small trait instead, implemented for the real SSH shell
//! channel and, under `#[cfg(test)]` (or the `test-support` feature), for a
//! scripted in-memory double.

use crate::error::EngineError;
use async_trait::async_trait;

/// One inbound event from the remote shell channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Bytes read from the channel's normal stream (stdout-equivalent).
    Data(Vec<u8>),
    /// Bytes read from the channel's extended stream (stderr-equivalent).
    ExtendedData(Vec<u8>),
    /// The peer sent EOF; no more data will arrive, channel may still close.
    Eof,
    /// The channel closed.
    Close,
}

/// Abstraction over a single open shell channel on an SSH transport.
///
/// A single writer, single reader: exactly the channel contract a
/// Persistent Session needs.
#[async_trait]
pub trait SessionChannel: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError>;

    /// Wait for the next event. Returns `Ok(ChannelEvent::Close)` (not an
    /// error) when the channel ends normally; transport-level failures are
    /// surfaced as `Err(EngineError::StreamError)`.
    async fn recv(&mut self) -> Result<ChannelEvent, EngineError>;

    /// Best-effort close; errors are not actionable once we're tearing down.
    async fn close(&mut self);
}

pub struct RusshSessionChannel {
    pub(crate) channel: russh::Channel<russh::client::Msg>,
}

#[async_trait]
impl SessionChannel for RusshSessionChannel {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.channel
            .data(bytes)
            .await
            .map_err(|e| EngineError::StreamError(e.to_string()))
    }

    async fn recv(&mut self) -> Result<ChannelEvent, EngineError> {
        match self.channel.wait().await {
            Some(russh::ChannelMsg::Data { data }) => Ok(ChannelEvent::Data(data.to_vec())),
            Some(russh::ChannelMsg::ExtendedData { data, .. }) => {
                Ok(ChannelEvent::ExtendedData(data.to_vec()))
            }
            Some(russh::ChannelMsg::Eof) => Ok(ChannelEvent::Eof),
            Some(russh::ChannelMsg::Close) => Ok(ChannelEvent::Close),
            Some(_) => Ok(ChannelEvent::Data(Vec::new())),
            None => Ok(ChannelEvent::Close),
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.close().await;
    }
}

/// Exposed outside `#[cfg(test)]` (behind the `test-support` feature) so
/// the crate's own `tests/` integration suite can script channel behavior
/// without a live SSH server, the same way unit tests do.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// A scripted channel double: `inbound` is drained as `recv()` calls,
    /// `outbound` records every `send()` so tests can assert on what the
    /// session wrote (e.g. the wrapped command).
    pub struct FakeChannel {
        inbound: Mutex<VecDeque<ChannelEvent>>,
        pub outbound: Mutex<Vec<Vec<u8>>>,
        closed: std::sync::atomic::AtomicBool,
    }

    impl FakeChannel {
        pub fn new(scripted: Vec<ChannelEvent>) -> Self {
            Self {
                inbound: Mutex::new(scripted.into()),
                outbound: Mutex::new(Vec::new()),
                closed: std::sync::atomic::AtomicBool::new(false),
            }
        }

        /// Queue more events to be returned by future `recv()` calls.
        pub async fn push(&self, event: ChannelEvent) {
            self.inbound.lock().await.push_back(event);
        }

        pub async fn outbound_snapshot(&self) -> Vec<Vec<u8>> {
            self.outbound.lock().await.clone()
        }

        async fn send_impl(&self, bytes: &[u8]) -> Result<(), EngineError> {
            self.outbound.lock().await.push(bytes.to_vec());
            Ok(())
        }

        async fn recv_impl(&self) -> Result<ChannelEvent, EngineError> {
            loop {
                if let Some(event) = self.inbound.lock().await.pop_front() {
                    return Ok(event);
                }
                if self.closed.load(std::sync::atomic::Ordering::Relaxed) {
                    return Ok(ChannelEvent::Close);
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }

        async fn close_impl(&self) {
            self.closed.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    }

    #[async_trait]
    impl SessionChannel for FakeChannel {
        async fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
            self.send_impl(bytes).await
        }

        async fn recv(&mut self) -> Result<ChannelEvent, EngineError> {
            self.recv_impl().await
        }

        async fn close(&mut self) {
            self.close_impl().await
        }
    }

    /// Wraps an `Arc<FakeChannel>` so a test driver can hold the same
    /// channel the Session actor is consuming, to read what was written and
    /// push scripted replies while the actor runs.
    pub struct SharedFakeChannel(pub std::sync::Arc<FakeChannel>);

    #[async_trait]
    impl SessionChannel for SharedFakeChannel {
        async fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
            self.0.send_impl(bytes).await
        }

        async fn recv(&mut self) -> Result<ChannelEvent, EngineError> {
            self.0.recv_impl().await
        }

        async fn close(&mut self) {
            self.0.close_impl().await
        }
    }
}
