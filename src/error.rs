use thiserror::Error;

/// Errors that can occur on a multicast channel.
///
/// Failures fall into two groups:
/// - errors returned to the caller of the operation that triggered them
///   (`Serialization`, `Transport`, address/config errors), and
/// - errors that stay on the receive side (`Deserialization`, `Framing`,
///   `Observer`), which are logged or routed to a single observer and never
///   interrupt delivery to the rest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The payload could not be encoded by the codec.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An incoming payload could not be decoded into the channel's type.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Bind, connect or send failed on a transport endpoint.
    #[error("transport error on {address}: {reason}")]
    Transport { address: String, reason: String },

    /// Transient transport failure; eligible for retry with backoff.
    #[error("transport retryable: {0}")]
    TransportRetryable(String),

    /// A received frame was malformed or truncated.
    #[error("framing error: {0}")]
    Framing(String),

    /// An observer's own handler panicked.
    #[error("observer error: {0}")]
    Observer(String),

    /// Error signalled by the application through `error()`.
    #[error("{0}")]
    Faulted(String),

    /// The address is not of the form `scheme://rest`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// No transport is registered for the address scheme.
    #[error("unsupported transport scheme: {0}")]
    UnsupportedScheme(String),

    /// A required builder field was not set.
    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

impl ChannelError {
    // ---
    /// Build a transport error for `address`.
    pub fn transport(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for ChannelError {
    fn from(message: &str) -> Self {
        Self::Faulted(message.to_string())
    }
}

impl From<String> for ChannelError {
    fn from(message: String) -> Self {
        Self::Faulted(message)
    }
}

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;
