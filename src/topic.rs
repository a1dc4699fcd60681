// src/topic.rs

//! Topic identifiers.
//!
//! Every typed channel stamps its frames with a [`TopicId`] derived from the
//! message type. Channels of different types may share one physical
//! endpoint; the consumer side routes frames by comparing topic ids, so two
//! distinct types must never map to the same id.
//!
//! Ids are the first [`TOPIC_LEN`] bytes of a SHA-256 digest over the
//! fully-qualified type name. Hashing (rather than truncating the name)
//! keeps long names with a shared prefix apart.

use sha2::{Digest, Sha256};
use std::fmt;

/// Width of a topic identifier on the wire, in bytes.
pub const TOPIC_LEN: usize = 16;

/// Fixed-width identifier used to route frames by message type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId([u8; TOPIC_LEN]);

impl TopicId {
    /// Topic for message type `T`, keyed on `std::any::type_name::<T>()`.
    ///
    /// `type_name` is stable for a given build. Producers and consumers
    /// compiled separately should agree on an explicit name instead
    /// (see [`TopicId::from_name`]).
    pub fn of<T: ?Sized>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }

    /// Topic for an explicit name.
    pub fn from_name(name: &str) -> Self {
        // ---
        let digest = Sha256::digest(name.as_bytes());
        let mut id = [0u8; TOPIC_LEN];
        id.copy_from_slice(&digest[..TOPIC_LEN]);
        Self(id)
    }

    /// Rebuild a topic from raw wire bytes.
    pub fn from_bytes(bytes: [u8; TOPIC_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes as placed on the wire.
    pub fn as_bytes(&self) -> &[u8; TOPIC_LEN] {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({self})")
    }
}
