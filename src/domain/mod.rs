//! Domain layer public interface.
//!
//! This module defines the socket abstractions the channel layer is written
//! against. They are independent of any concrete transport.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod socket;

// --- Socket domain re-exports ---

pub use socket::{
    //
    split_scheme,
    ChannelAddress,
    PublishSocket,
    PublishSocketPtr,
    Role,
    SocketOptions,
    SubscribeSocket,
    Transport,
    TransportPtr,
};
