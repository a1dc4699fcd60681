//! Channel configuration.
//!
//! Channels are configured through a fluent [`ChannelBuilder`] and validated
//! when a terminal method builds the channel:
//!
//! ```no_run
//! use mom_multicast::{ChannelBuilder, EndpointRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Reading {
//!     sensor: String,
//!     celsius: f64,
//! }
//!
//! # fn example() -> mom_multicast::Result<()> {
//! let registry = EndpointRegistry::new();
//! let channel = ChannelBuilder::new()
//!     .address("tcp://127.0.0.1:5556")
//!     .registry(registry)
//!     .diagnostics(|line| println!("[diag] {line}"))
//!     .send_high_water_mark(10_000)
//!     .multicast::<Reading>()?;
//! # drop(channel);
//! # Ok(())
//! # }
//! ```
//!
//! Construction never touches the network; endpoints are created by the
//! first operation that needs them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{Message, MulticastChannel, Publisher, Subscriber};
use crate::codec::{Codec, JsonCodec};
use crate::domain::{split_scheme, SocketOptions};
use crate::{ChannelError, EndpointRegistry, Result, RetryConfig, TopicId};

/// Optional sink for human-readable channel trace lines.
///
/// Lines are emitted for endpoint setup, route registration and dropped
/// frames, in addition to `tracing` output.
#[derive(Clone, Default)]
pub struct Diagnostics {
    // ---
    sink: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Diagnostics {
    /// Diagnostics forwarded to `sink`.
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Some(Arc::new(sink)),
        }
    }

    /// True when a sink is installed.
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Hand `line` to the sink, if any.
    pub fn emit(&self, line: &str) {
        if let Some(sink) = &self.sink {
            sink(line);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Lifecycle of a channel.
///
/// ```text
/// Uninitialized -> Initializing -> Active -> Completed | Faulted -> Disposed
/// ```
///
/// A failed initialization returns to `Uninitialized`; `Disposed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Initializing,
    Active,
    Completed,
    Faulted,
    Disposed,
}

impl ChannelState {
    /// True for `Completed`, `Faulted` and `Disposed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChannelState::Completed | ChannelState::Faulted | ChannelState::Disposed
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Initializing => "initializing",
            ChannelState::Active => "active",
            ChannelState::Completed => "completed",
            ChannelState::Faulted => "faulted",
            ChannelState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Validated channel configuration.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Physical address, `scheme://endpoint`.
    pub address: Arc<str>,

    /// Registry the channel acquires its endpoints from.
    pub registry: Arc<EndpointRegistry>,

    /// Explicit topic name; `None` keys the topic on the message type.
    pub topic_name: Option<Arc<str>>,

    /// Options used if this channel creates an endpoint.
    pub socket: SocketOptions,

    /// Diagnostic sink.
    pub diagnostics: Diagnostics,
}

impl ChannelConfig {
    /// Topic for message type `T` under this configuration.
    pub fn topic_for<T>(&self) -> TopicId {
        match &self.topic_name {
            Some(name) => TopicId::from_name(name),
            None => TopicId::of::<T>(),
        }
    }
}

/// Builder for typed channels.
///
/// `address` and `registry` are required. Every other setting has a
/// default:
///
/// | Setting | Default |
/// |---|---|
/// | `send_high_water_mark` | 1000 |
/// | `connect_timeout` | 5s |
/// | `connect_retry` | [`RetryConfig::default()`] |
/// | `max_frame_length` | 16 MiB |
/// | `topic_name` | type name of the message |
/// | `codec` | [`JsonCodec`] |
pub struct ChannelBuilder<C = JsonCodec> {
    // ---
    address: Option<String>,
    registry: Option<Arc<EndpointRegistry>>,
    topic_name: Option<String>,
    diagnostics: Diagnostics,
    codec: C,

    // Socket options (all optional)
    send_high_water_mark: Option<usize>,
    connect_timeout: Option<Duration>,
    connect_retry: Option<Option<RetryConfig>>,
    max_frame_length: Option<usize>,
}

impl ChannelBuilder<JsonCodec> {
    /// Builder with the JSON codec.
    pub fn new() -> Self {
        // ---
        Self {
            address: None,
            registry: None,
            topic_name: None,
            diagnostics: Diagnostics::default(),
            codec: JsonCodec,
            send_high_water_mark: None,
            connect_timeout: None,
            connect_retry: None,
            max_frame_length: None,
        }
    }
}

impl Default for ChannelBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> ChannelBuilder<C> {
    /// Set the address (`tcp://host:port` or `inproc://name`).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the endpoint registry.
    pub fn registry(mut self, registry: Arc<EndpointRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Install a diagnostic sink.
    pub fn diagnostics(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.diagnostics = Diagnostics::new(sink);
        self
    }

    /// Frames queued per subscriber before further frames for that
    /// subscriber are dropped.
    ///
    /// Default: 1000. Raise it for producers that push in large bursts.
    pub fn send_high_water_mark(mut self, frames: usize) -> Self {
        self.send_high_water_mark = Some(frames);
        self
    }

    /// Key the topic on `name` instead of the message type name.
    ///
    /// Producers and consumers built from different binaries should agree on
    /// an explicit name.
    pub fn topic_name(mut self, name: impl Into<String>) -> Self {
        self.topic_name = Some(name.into());
        self
    }

    /// Time allowed for one connect attempt.
    ///
    /// Default: 5s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Retry policy for refused connections.
    ///
    /// Default: [`RetryConfig::default()`].
    pub fn connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = Some(Some(retry));
        self
    }

    /// Try each connect once.
    pub fn no_connect_retry(mut self) -> Self {
        self.connect_retry = Some(None);
        self
    }

    /// Largest frame accepted from the wire.
    ///
    /// Default: 16 MiB.
    pub fn max_frame_length(mut self, bytes: usize) -> Self {
        self.max_frame_length = Some(bytes);
        self
    }

    /// Replace the payload codec.
    pub fn codec<C2: Codec>(self, codec: C2) -> ChannelBuilder<C2> {
        // ---
        ChannelBuilder {
            address: self.address,
            registry: self.registry,
            topic_name: self.topic_name,
            diagnostics: self.diagnostics,
            codec,
            send_high_water_mark: self.send_high_water_mark,
            connect_timeout: self.connect_timeout,
            connect_retry: self.connect_retry,
            max_frame_length: self.max_frame_length,
        }
    }

    /// Validate and split into configuration and codec.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::MissingConfig`] without an address or registry
    /// - [`ChannelError::InvalidAddress`] / [`ChannelError::UnsupportedScheme`]
    ///   for an unusable address
    /// - [`ChannelError::MissingConfig`] for a zero high-water mark or
    ///   frame length
    pub fn build_config(self) -> Result<(ChannelConfig, C)> {
        // ---
        let address = self
            .address
            .ok_or_else(|| ChannelError::MissingConfig("address is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| ChannelError::MissingConfig("registry is required".into()))?;

        split_scheme(&address)?;
        registry.check_address(&address)?;

        let defaults = SocketOptions::default();
        let socket = SocketOptions {
            send_high_water_mark: self
                .send_high_water_mark
                .unwrap_or(defaults.send_high_water_mark),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            connect_retry: self.connect_retry.unwrap_or(defaults.connect_retry),
            max_frame_length: self.max_frame_length.unwrap_or(defaults.max_frame_length),
        };

        if socket.send_high_water_mark == 0 {
            return Err(ChannelError::MissingConfig(
                "send_high_water_mark must be at least 1".into(),
            ));
        }
        if socket.max_frame_length == 0 {
            return Err(ChannelError::MissingConfig(
                "max_frame_length must be at least 1".into(),
            ));
        }

        let config = ChannelConfig {
            address: Arc::from(address),
            registry,
            topic_name: self.topic_name.map(Arc::from),
            socket,
            diagnostics: self.diagnostics,
        };

        Ok((config, self.codec))
    }

    /// Build a channel that both publishes and observes on the address.
    pub fn multicast<T: Message>(self) -> Result<MulticastChannel<T, C>> {
        let (config, codec) = self.build_config()?;
        Ok(MulticastChannel::from_config(config, codec))
    }

    /// Build a publish-only channel.
    pub fn publisher<T: Message>(self) -> Result<Publisher<T, C>> {
        let (config, codec) = self.build_config()?;
        Ok(Publisher::from_config(config, codec))
    }

    /// Build an observe-only channel.
    pub fn subscriber<T: Message>(self) -> Result<Subscriber<T, C>> {
        let (config, codec) = self.build_config()?;
        Ok(Subscriber::from_config(config, codec))
    }
}
