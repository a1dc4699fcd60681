//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! [`Transport`](crate::domain::Transport) trait and the scheme dispatch used
//! by the endpoint registry.
//!
//! | Scheme | Transport |
//! |---|---|
//! | `inproc://name`, `memory://name` | in-process hub ([`MemoryHub`]) |
//! | `tcp://host:port` | TCP publish/subscribe |
//!
//! Channel code must not depend on transport-specific types.

mod memory;
mod tcp;

use std::collections::HashMap;
use std::sync::Arc;

pub use memory::MemoryHub;

use crate::domain::{split_scheme, TransportPtr};
use crate::{ChannelError, Result};

/// Scheme → transport lookup.
pub(crate) struct TransportSet {
    // ---
    by_scheme: HashMap<&'static str, TransportPtr>,
}

impl TransportSet {
    /// Built-in transports, with `inproc://` routed through `hub`.
    pub(crate) fn builtin(hub: Arc<MemoryHub>) -> Self {
        // ---
        let memory: TransportPtr = Arc::new(memory::MemoryTransport::new(hub));
        let tcp: TransportPtr = Arc::new(tcp::TcpTransport);

        let mut by_scheme = HashMap::new();
        by_scheme.insert("inproc", memory.clone());
        by_scheme.insert("memory", memory);
        by_scheme.insert("tcp", tcp);

        Self { by_scheme }
    }

    /// Resolve `uri` to its transport and the endpoint part after `://`.
    pub(crate) fn resolve<'a>(&self, uri: &'a str) -> Result<(TransportPtr, &'a str)> {
        // ---
        let (scheme, endpoint) = split_scheme(uri)?;
        let transport = self
            .by_scheme
            .get(scheme)
            .cloned()
            .ok_or_else(|| ChannelError::UnsupportedScheme(scheme.to_string()))?;
        Ok((transport, endpoint))
    }
}
