// src/codec.rs

//! Payload codecs.
//!
//! A [`Codec`] turns a message value into payload bytes and back. Channels
//! are generic over the codec; [`JsonCodec`] is the default.
//!
//! Encoding failures are reported as [`ChannelError::Serialization`] and are
//! returned straight to the producer. Decoding failures happen on the
//! receive path and are reported as [`ChannelError::Deserialization`].

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ChannelError, Result};

/// Encodes and decodes message payloads.
pub trait Codec: Send + Sync + std::fmt::Debug + 'static {
    /// Encode a value into payload bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes>;

    /// Decode payload bytes into a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// MIME-style name of the payload format, for diagnostics.
    fn content_type(&self) -> &'static str;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| ChannelError::Serialization(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|err| ChannelError::Deserialization(err.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Compact binary codec backed by `bincode`.
#[cfg(feature = "codec-bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "codec-bincode")]
impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|err| ChannelError::Serialization(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|err| ChannelError::Deserialization(err.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/x-bincode"
    }
}
