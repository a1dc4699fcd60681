//! In-process transport (`inproc://name`).
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`Transport`] trait. It is the reference for socket semantics and is what
//! most tests run against.
//!
//! ## Reference Semantics
//!
//! - `bind` claims a name on the hub; binding a name twice fails until the
//!   first publish socket is closed or dropped.
//! - `connect` does not require a prior `bind`. Once it returns, frames sent
//!   afterwards on that name are deliverable to the returned inbox.
//! - Frames sent while nobody is connected are discarded (no replay).
//! - Delivery order per publish socket matches send order.
//! - `send` never waits. A subscriber whose inbox is full misses the frame;
//!   a closed inbox is pruned.
//!
//! ## Non-Goals
//!
//! Network behavior, failure injection and persistence are not simulated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::{PublishSocket, PublishSocketPtr, SocketOptions, SubscribeSocket, Transport};
use crate::{log_debug, log_warn, ChannelError, Result};

struct Inbox {
    tx: mpsc::Sender<Bytes>,
    lagging: bool,
}

#[derive(Default)]
struct HubSlot {
    bound: bool,
    subscribers: Vec<Inbox>,
}

/// Shared message bus for `inproc://` addresses.
///
/// Every [`EndpointRegistry`](crate::EndpointRegistry) owns a hub. Registries
/// that should see each other's `inproc://` traffic can be built around the
/// same hub with
/// [`EndpointRegistry::with_memory_hub`](crate::EndpointRegistry::with_memory_hub).
#[derive(Default)]
pub struct MemoryHub {
    // ---
    slots: RwLock<HashMap<Arc<str>, HubSlot>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn claim(&self, name: &Arc<str>) -> Result<()> {
        // ---
        let mut slots = self.slots.write();
        let slot = slots.entry(name.clone()).or_default();
        if slot.bound {
            return Err(ChannelError::transport(
                format!("inproc://{name}"),
                "address already bound",
            ));
        }
        slot.bound = true;
        Ok(())
    }

    fn unclaim(&self, name: &str) {
        // ---
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(name) {
            slot.bound = false;
            if slot.subscribers.is_empty() {
                slots.remove(name);
            }
        }
    }

    fn attach(&self, name: &str, tx: mpsc::Sender<Bytes>) {
        self.slots
            .write()
            .entry(Arc::from(name))
            .or_default()
            .subscribers
            .push(Inbox { tx, lagging: false });
    }

    /// Offer `frame` to every inbox on `name` without waiting.
    fn publish(&self, name: &str, frame: &Bytes) {
        // ---
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(name) else {
            return;
        };
        slot.subscribers
            .retain_mut(|inbox| match inbox.tx.try_send(frame.clone()) {
                Ok(()) => {
                    inbox.lagging = false;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    if !inbox.lagging {
                        log_warn!("inproc://{name}: subscriber inbox full, dropping frames");
                        inbox.lagging = true;
                    }
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    log_debug!("inproc://{name}: pruning closed subscriber");
                    false
                }
            });
    }

    /// Number of live subscribers attached to `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.slots
            .read()
            .get(name)
            .map(|slot| {
                slot.subscribers
                    .iter()
                    .filter(|inbox| !inbox.tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// True while a publish socket holds `name`.
    pub fn is_bound(&self, name: &str) -> bool {
        self.slots.read().get(name).is_some_and(|slot| slot.bound)
    }
}

/// Publish socket bound to one hub name.
struct MemoryPublishSocket {
    // ---
    hub: Arc<MemoryHub>,
    name: Arc<str>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl PublishSocket for MemoryPublishSocket {
    // ---
    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::transport(
                format!("inproc://{}", self.name),
                "publish socket closed",
            ));
        }

        self.hub.publish(&self.name, &frame);
        Ok(())
    }

    fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count(&self.name)
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.closed.swap(true, Ordering::AcqRel) {
            log_debug!("inproc://{}: unbinding", self.name);
            self.hub.unclaim(&self.name);
        }
        Ok(())
    }
}

impl Drop for MemoryPublishSocket {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.unclaim(&self.name);
        }
    }
}

/// Transport for `inproc://` addresses backed by a [`MemoryHub`].
pub(crate) struct MemoryTransport {
    // ---
    hub: Arc<MemoryHub>,
}

impl MemoryTransport {
    pub(crate) fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn scheme(&self) -> &'static str {
        "inproc"
    }

    async fn bind(&self, endpoint: &str, _opts: &SocketOptions) -> Result<PublishSocketPtr> {
        // ---
        let name: Arc<str> = Arc::from(endpoint);
        self.hub.claim(&name)?;

        log_debug!("inproc://{name}: bound");

        Ok(Arc::new(MemoryPublishSocket {
            hub: self.hub.clone(),
            name,
            closed: AtomicBool::new(false),
        }))
    }

    async fn connect(&self, endpoint: &str, opts: &SocketOptions) -> Result<SubscribeSocket> {
        // ---
        let (tx, rx) = mpsc::channel(opts.send_high_water_mark.max(1));
        self.hub.attach(endpoint, tx);

        log_debug!("inproc://{endpoint}: subscriber attached");

        Ok(SubscribeSocket::new(rx))
    }
}
