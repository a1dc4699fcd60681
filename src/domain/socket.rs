// src/domain/socket.rs

//! Socket domain abstractions.
//!
//! This module defines the socket-style publish/subscribe contract the
//! channel layer is written against. It intentionally avoids any reference
//! to concrete protocols or client libraries.
//!
//! A transport offers two endpoint shapes:
//!
//! - a **publish socket**, obtained by binding an address, which accepts
//!   frames and hands them to every connected subscriber;
//! - a **subscribe socket**, obtained by connecting to an address, which
//!   exposes an inbox of frames.
//!
//! The transport layer treats frames as opaque bytes. Topic routing and
//! payload decoding happen above it.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{ChannelError, Result, RetryConfig};

/// Access pattern requested on an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Publishes only. Binds the address.
    Producer,

    /// Observes only. Connects to the address.
    Consumer,

    /// Publishes and observes on the same address (multicast channel).
    Both,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
            Role::Both => "multicast",
        };
        f.write_str(name)
    }
}

/// A physical endpoint plus the role requested on it.
///
/// The URI has the form `scheme://rest`, e.g. `tcp://127.0.0.1:5556` or
/// `inproc://sensors`. The registry keys its endpoints on this pair, with
/// scheme aliases already resolved. Addresses are immutable and cheap to
/// clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    // ---
    pub uri: Arc<str>,
    pub role: Role,
}

impl ChannelAddress {
    // ---
    pub fn new(uri: impl Into<Arc<str>>, role: Role) -> Self {
        Self {
            uri: uri.into(),
            role,
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.role)
    }
}

/// Split `scheme://rest`.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidAddress`] when the URI has no `://`
/// separator or an empty part on either side.
pub fn split_scheme(uri: &str) -> Result<(&str, &str)> {
    // ---
    match uri.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => Ok((scheme, rest)),
        _ => Err(ChannelError::InvalidAddress(format!(
            "{uri}: expected scheme://endpoint"
        ))),
    }
}

/// Transport-level socket options.
///
/// Options are applied by whichever channel first initializes an endpoint;
/// later channels sharing the endpoint reuse it as configured.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    /// Bound on frames queued per subscriber; further frames for that
    /// subscriber are dropped until it catches up.
    pub send_high_water_mark: usize,

    /// Time allowed for a single connect attempt, including the greeting.
    pub connect_timeout: Duration,

    /// Backoff policy for refused connections; `None` tries once.
    pub connect_retry: Option<RetryConfig>,

    /// Largest frame accepted from the wire.
    pub max_frame_length: usize,
}

impl Default for SocketOptions {
    /// - `send_high_water_mark`: 1000
    /// - `connect_timeout`: 5s
    /// - `connect_retry`: `RetryConfig::default()`
    /// - `max_frame_length`: 16 MiB
    fn default() -> Self {
        Self {
            send_high_water_mark: 1000,
            connect_timeout: Duration::from_secs(5),
            connect_retry: Some(RetryConfig::default()),
            max_frame_length: 16 * 1024 * 1024,
        }
    }
}

/// The sending half of a bound address.
///
/// `send` hands a frame to every subscriber connected at the time of the
/// call. Subscribers that connect later never see it, and a subscriber whose
/// queue is at the high-water mark misses it.
#[async_trait::async_trait]
pub trait PublishSocket: Send + Sync {
    // ---
    /// Queue one frame for all currently connected subscribers.
    ///
    /// Never waits on a slow subscriber.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Number of subscribers the next `send` would reach.
    fn subscriber_count(&self) -> usize;

    /// Stop accepting subscribers and drop existing connections.
    async fn close(&self) -> Result<()>;
}

/// Shared publish socket pointer.
pub type PublishSocketPtr = Arc<dyn PublishSocket>;

/// The receiving half of a connected address.
///
/// Frames arrive on `inbox`. The inbox closes when the connection ends or
/// the socket is dropped; dropping the socket also stops any background
/// reader the transport started for it.
pub struct SubscribeSocket {
    // ---
    /// Frames delivered to this subscriber, in send order per publisher.
    pub inbox: mpsc::Receiver<Bytes>,

    reader: Option<JoinHandle<()>>,
}

impl SubscribeSocket {
    // ---
    /// Socket whose inbox is fed directly by the transport.
    pub fn new(inbox: mpsc::Receiver<Bytes>) -> Self {
        Self {
            inbox,
            reader: None,
        }
    }

    /// Socket whose inbox is fed by a transport-owned reader task.
    pub fn with_reader(inbox: mpsc::Receiver<Bytes>, reader: JoinHandle<()>) -> Self {
        Self {
            inbox,
            reader: Some(reader),
        }
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `Ok(None)` on timeout and
    /// [`ChannelError::Transport`] when the inbox has closed.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        // ---
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(ChannelError::transport("subscribe socket", "inbox closed")),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for SubscribeSocket {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Socket factory for one URI scheme.
///
/// `endpoint` is the part of the URI after `scheme://`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Scheme handled by this transport (e.g. `"tcp"`).
    fn scheme(&self) -> &'static str;

    /// Bind `endpoint` and return its publish socket.
    async fn bind(&self, endpoint: &str, opts: &SocketOptions) -> Result<PublishSocketPtr>;

    /// Connect to `endpoint` and return a subscribe socket.
    ///
    /// Once this returns, frames sent afterwards on the bound side are
    /// deliverable to the returned inbox.
    async fn connect(&self, endpoint: &str, opts: &SocketOptions) -> Result<SubscribeSocket>;
}

/// Shared transport pointer.
pub type TransportPtr = Arc<dyn Transport>;
