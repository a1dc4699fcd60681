//! Typed multicast notification channels over socket-style pub/sub transports
//!
//! Many logical, strongly-typed channels share a small number of physical
//! transport endpoints. Each message is framed with a fixed-width topic id
//! derived from its type, routed by that id on the consumer side, and fanned
//! out to every observer subscribed at the time it arrives.
//!
//! - [`MulticastChannel`]: publish and observe on one address
//! - [`Publisher`] / [`Subscriber`]: the two halves, usable across processes
//! - [`EndpointRegistry`]: owns the shared sockets; inject one per
//!   application (or per test)
//!
//! Addresses are `tcp://host:port` or `inproc://name`.
//!
//! ```no_run
//! use mom_multicast::{ChannelBuilder, EndpointRegistry};
//!
//! # async fn example() -> mom_multicast::Result<()> {
//! let registry = EndpointRegistry::new();
//! let channel = ChannelBuilder::new()
//!     .address("tcp://127.0.0.1:5556")
//!     .registry(registry)
//!     .multicast::<String>()?;
//!
//! let (_subscription, mut stream) = channel.subscribe_stream().await?;
//! channel.push(&"hello".to_string()).await?;
//! println!("{:?}", stream.recv().await);
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod channel;
mod config;
mod domain;
mod error;
mod registry;
mod retry;
mod subscription;
mod topic;
mod transport;

pub mod codec;
pub mod wire;

pub(crate) use macros::{diag, log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use channel::{Message, MulticastChannel, Publisher, Subscriber};
pub use config::{ChannelBuilder, ChannelConfig, ChannelState, Diagnostics};
pub use registry::{EndpointHandle, EndpointRegistry};
pub use subscription::{Notification, NotificationStream, Observer, Subscription, SubscriptionSet};

pub use codec::{Codec, JsonCodec};

#[cfg(feature = "codec-bincode")]
pub use codec::BincodeCodec;

pub use error::{ChannelError, Result};
pub use retry::RetryConfig;
pub use topic::{TopicId, TOPIC_LEN};
pub use transport::MemoryHub;
pub use wire::Envelope;

// --- public re-exports
pub use domain::{
    //
    ChannelAddress,
    PublishSocket,
    PublishSocketPtr,
    Role,
    SocketOptions,
    SubscribeSocket,
    Transport,
    TransportPtr,
};
