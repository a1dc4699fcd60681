// src/wire.rs

//! Wire framing.
//!
//! A frame is the unit handed to the transport:
//!
//! ```text
//! +----------------------+---------------------------+
//! | topic (16 bytes)     | payload (variable length) |
//! +----------------------+---------------------------+
//! ```
//!
//! The payload is opaque here; only the channel's codec interprets it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::topic::{TopicId, TOPIC_LEN};
use crate::{ChannelError, Result};

/// A topic-stamped payload, as carried by one transport frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Routing key for the consumer side.
    pub topic: TopicId,

    /// Serialized message bytes.
    pub payload: Bytes,
}

impl Envelope {
    // ---
    pub fn new(topic: TopicId, payload: Bytes) -> Self {
        Self { topic, payload }
    }

    /// Encode into a single wire frame.
    pub fn to_frame(&self) -> Bytes {
        frame(self.topic, &self.payload)
    }
}

/// Pack `topic ‖ payload` into one frame.
pub fn frame(topic: TopicId, payload: &[u8]) -> Bytes {
    // ---
    let mut buf = BytesMut::with_capacity(TOPIC_LEN + payload.len());
    buf.put_slice(topic.as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a frame back into topic and payload.
///
/// Frames shorter than the topic width are rejected with
/// [`ChannelError::Framing`]. The payload is a zero-copy slice of `frame`.
pub fn unframe(frame: Bytes) -> Result<Envelope> {
    // ---
    if frame.len() < TOPIC_LEN {
        return Err(ChannelError::Framing(format!(
            "frame of {} bytes is shorter than the {TOPIC_LEN}-byte topic",
            frame.len()
        )));
    }

    let mut topic = [0u8; TOPIC_LEN];
    topic.copy_from_slice(&frame[..TOPIC_LEN]);

    Ok(Envelope {
        topic: TopicId::from_bytes(topic),
        payload: frame.slice(TOPIC_LEN..),
    })
}
