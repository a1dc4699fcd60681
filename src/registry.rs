//! Shared endpoint registry.
//!
//! Many typed channels share a small number of physical sockets. The
//! registry owns one socket per [`ChannelAddress`] (`uri` plus role) and
//! hands out reference-counted [`EndpointHandle`]s to it:
//!
//! - a **producer** endpoint wraps a bound [`PublishSocket`](crate::domain::PublishSocket);
//! - a **consumer** endpoint wraps a connected subscribe socket plus a
//!   receive worker that routes each inbound frame to the channels
//!   registered for its [`TopicId`].
//!
//! ## Lifecycle
//!
//! Scheme aliases are resolved before lookup, so `memory://bus` and
//! `inproc://bus` name the same endpoint.
//!
//! The first `acquire` for an address creates the socket; concurrent callers wait
//! on the same initialization. A failed initialization is reported to the
//! caller that attempted it and leaves the slot uninitialized, so the next
//! caller tries again. When the last handle is released the slot is removed
//! and the socket closed (producer) or the worker cancelled (consumer).
//!
//! ## Threading
//!
//! The slot map is guarded by a `parking_lot::Mutex` that is never held
//! across an `.await`. Route tables use a `RwLock` and are only read long
//! enough to copy the matching sinks; sinks run with no lock held, so an
//! observer may dispose its own channel from inside a callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{ChannelAddress, PublishSocketPtr, Role, SocketOptions, SubscribeSocket};
use crate::transport::{MemoryHub, TransportSet};
use crate::wire;
use crate::{log_debug, log_error, log_info, log_warn, ChannelError, Result, TopicId};

struct Slot {
    // ---
    cell: OnceCell<Arc<Endpoint>>,
    refs: AtomicUsize,
}

/// Receiver of frame payloads routed to one topic.
pub(crate) trait FrameSink: Send + Sync {
    /// Handle the payload of a frame whose topic matched this route.
    fn deliver(&self, payload: Bytes);
}

/// Topic → sinks table shared between a consumer endpoint and its worker.
#[derive(Default)]
struct Router {
    // ---
    routes: RwLock<HashMap<TopicId, Vec<(u64, Arc<dyn FrameSink>)>>>,
    next_id: AtomicU64,
}

impl Router {
    fn register(&self, topic: TopicId, sink: Arc<dyn FrameSink>) -> u64 {
        // ---
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes.write().entry(topic).or_default().push((id, sink));
        id
    }

    fn unregister(&self, topic: &TopicId, id: u64) {
        // ---
        let mut routes = self.routes.write();
        if let Some(sinks) = routes.get_mut(topic) {
            sinks.retain(|(route_id, _)| *route_id != id);
            if sinks.is_empty() {
                routes.remove(topic);
            }
        }
    }

    fn sinks_for(&self, topic: &TopicId) -> Vec<Arc<dyn FrameSink>> {
        self.routes
            .read()
            .get(topic)
            .map(|sinks| sinks.iter().map(|(_, sink)| sink.clone()).collect())
            .unwrap_or_default()
    }

    fn route_count(&self) -> usize {
        self.routes.read().values().map(Vec::len).sum()
    }

    /// Unframe `frame` and hand its payload to every matching sink.
    fn dispatch(&self, uri: &str, frame: Bytes) {
        // ---
        let envelope = match wire::unframe(frame) {
            Ok(envelope) => envelope,
            Err(_err) => {
                log_warn!("{uri}: dropping malformed frame: {_err}");
                return;
            }
        };

        let sinks = self.sinks_for(&envelope.topic);
        if sinks.is_empty() {
            log_debug!("{uri}: no route for topic {}", envelope.topic);
            return;
        }

        for sink in sinks {
            sink.deliver(envelope.payload.clone());
        }
    }
}

/// Removes its route from the consumer endpoint when dropped.
pub(crate) struct RouteGuard {
    // ---
    router: Arc<Router>,
    topic: TopicId,
    id: u64,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        self.router.unregister(&self.topic, self.id);
    }
}

struct ConsumerEndpoint {
    // ---
    router: Arc<Router>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl ConsumerEndpoint {
    fn start(uri: Arc<str>, socket: SubscribeSocket) -> Self {
        // ---
        let router = Arc::new(Router::default());
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(receive_loop(
            uri,
            socket,
            router.clone(),
            cancel.clone(),
        ));

        Self {
            router,
            cancel,
            worker,
        }
    }
}

impl Drop for ConsumerEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.worker.abort();
    }
}

/// Receive-and-dispatch loop for one consumer socket.
async fn receive_loop(
    uri: Arc<str>,
    mut socket: SubscribeSocket,
    router: Arc<Router>,
    cancel: CancellationToken,
) {
    // ---
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_debug!("{uri}: receive worker cancelled");
                break;
            }
            frame = socket.inbox.recv() => match frame {
                Some(frame) => router.dispatch(&uri, frame),
                None => {
                    log_error!("{uri}: subscribe socket closed; no further frames will arrive");
                    break;
                }
            },
        }
    }
}

enum Endpoint {
    Producer(PublishSocketPtr),
    Consumer(ConsumerEndpoint),
}

/// Reference-counted share of one registry endpoint.
///
/// Dropping the handle (or passing it to [`EndpointRegistry::release`])
/// gives the reference back.
pub struct EndpointHandle {
    // ---
    registry: Arc<EndpointRegistry>,
    key: ChannelAddress,
    endpoint: Arc<Endpoint>,
}

impl EndpointHandle {
    /// Address this handle refers to, with any scheme alias resolved.
    pub fn uri(&self) -> &str {
        &self.key.uri
    }

    /// Role this handle was acquired for.
    pub fn role(&self) -> Role {
        self.key.role
    }

    /// Send a framed message on a producer endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transport`] when the handle is a consumer or
    /// the socket fails.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        match self.endpoint.as_ref() {
            Endpoint::Producer(socket) => socket.send(frame).await,
            Endpoint::Consumer(_) => Err(ChannelError::transport(
                self.uri(),
                "send on a consumer endpoint",
            )),
        }
    }

    /// Subscribers reached by the next send (producer endpoints only).
    pub fn subscriber_count(&self) -> usize {
        match self.endpoint.as_ref() {
            Endpoint::Producer(socket) => socket.subscriber_count(),
            Endpoint::Consumer(_) => 0,
        }
    }

    /// Routes currently registered on a consumer endpoint.
    pub fn route_count(&self) -> usize {
        match self.endpoint.as_ref() {
            Endpoint::Producer(_) => 0,
            Endpoint::Consumer(consumer) => consumer.router.route_count(),
        }
    }

    /// Route frames for `topic` on a consumer endpoint to `sink`.
    pub(crate) fn register_route(
        &self,
        topic: TopicId,
        sink: Arc<dyn FrameSink>,
    ) -> Result<RouteGuard> {
        // ---
        match self.endpoint.as_ref() {
            Endpoint::Consumer(consumer) => {
                let router = consumer.router.clone();
                let id = router.register(topic, sink);
                Ok(RouteGuard { router, topic, id })
            }
            Endpoint::Producer(_) => Err(ChannelError::transport(
                self.uri(),
                "route on a producer endpoint",
            )),
        }
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("uri", &self.key.uri)
            .field("role", &self.key.role)
            .finish()
    }
}

impl Drop for EndpointHandle {
    fn drop(&mut self) {
        self.registry.release_key(&self.key);
    }
}

/// Registry of shared transport endpoints.
///
/// Registries are explicit: every channel is built against one, and two
/// registries never share sockets (they may share a [`MemoryHub`] so their
/// `inproc://` traffic meets).
///
/// # Example
///
/// ```no_run
/// use mom_multicast::EndpointRegistry;
///
/// let registry = EndpointRegistry::new();
/// assert_eq!(registry.endpoint_count(), 0);
/// ```
pub struct EndpointRegistry {
    // ---
    transports: TransportSet,
    hub: Arc<MemoryHub>,
    slots: Mutex<HashMap<ChannelAddress, Arc<Slot>>>,
}

impl EndpointRegistry {
    /// Registry with its own in-process hub.
    pub fn new() -> Arc<Self> {
        Self::with_memory_hub(MemoryHub::new())
    }

    /// Registry whose `inproc://` addresses live on `hub`.
    pub fn with_memory_hub(hub: Arc<MemoryHub>) -> Arc<Self> {
        // ---
        Arc::new(Self {
            transports: TransportSet::builtin(hub.clone()),
            hub,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// The hub backing `inproc://` addresses.
    pub fn memory_hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }

    /// Acquire a share of the `uri` endpoint for `role`, creating it if needed.
    ///
    /// `opts` apply only when this call creates the socket.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidAddress`] / [`ChannelError::UnsupportedScheme`]
    ///   for a bad URI, or when `role` is [`Role::Both`]
    /// - [`ChannelError::Transport`] when bind or connect fails
    pub async fn acquire(
        self: &Arc<Self>,
        uri: &str,
        role: Role,
        opts: &SocketOptions,
    ) -> Result<EndpointHandle> {
        // ---
        if role == Role::Both {
            return Err(ChannelError::InvalidAddress(format!(
                "{uri}: acquire producer and consumer endpoints separately"
            )));
        }

        let (transport, endpoint) = self.transports.resolve(uri)?;
        let key = ChannelAddress::new(format!("{}://{endpoint}", transport.scheme()), role);
        let uri = &*key.uri;

        let slot = {
            let mut slots = self.slots.lock();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        cell: OnceCell::new(),
                        refs: AtomicUsize::new(0),
                    })
                })
                .clone();
            slot.refs.fetch_add(1, Ordering::AcqRel);
            slot
        };

        let init = slot
            .cell
            .get_or_try_init(|| async {
                // ---
                let created = match role {
                    Role::Producer => {
                        let socket = transport.bind(endpoint, opts).await?;
                        log_info!("{uri}: producer endpoint bound");
                        Endpoint::Producer(socket)
                    }
                    _ => {
                        let socket = transport.connect(endpoint, opts).await?;
                        log_info!("{uri}: consumer endpoint connected");
                        Endpoint::Consumer(ConsumerEndpoint::start(key.uri.clone(), socket))
                    }
                };
                Ok::<_, ChannelError>(Arc::new(created))
            })
            .await;

        match init {
            Ok(endpoint) => Ok(EndpointHandle {
                registry: self.clone(),
                endpoint: endpoint.clone(),
                key,
            }),
            Err(err) => {
                log_warn!("{uri}: {role} endpoint init failed: {err}");
                self.release_key(&key);
                Err(into_transport_error(uri, err))
            }
        }
    }

    /// Check that `uri` parses and has a registered transport.
    pub fn check_address(&self, uri: &str) -> Result<()> {
        self.transports.resolve(uri).map(|_| ())
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release(&self, handle: EndpointHandle) {
        drop(handle);
    }

    /// Number of live endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Outstanding handles on `uri` for `role`; 0 when absent or unparsable.
    pub fn ref_count(&self, uri: &str, role: Role) -> usize {
        let Ok((transport, endpoint)) = self.transports.resolve(uri) else {
            return 0;
        };
        let key = ChannelAddress::new(format!("{}://{endpoint}", transport.scheme()), role);
        self.slots
            .lock()
            .get(&key)
            .map(|slot| slot.refs.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn release_key(&self, key: &ChannelAddress) {
        // ---
        let removed = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get(key) else {
                return;
            };
            if slot.refs.fetch_sub(1, Ordering::AcqRel) > 1 {
                return;
            }
            slots.remove(key)
        };

        // The socket closes when the last Arc<Endpoint> drops, outside the lock.
        if removed.is_some() {
            log_debug!("{key}: last handle released");
        }
        drop(removed);
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoint_count())
            .finish()
    }
}

/// Init failures reach the caller as transport errors; address errors pass through.
fn into_transport_error(uri: &str, err: ChannelError) -> ChannelError {
    match err {
        ChannelError::TransportRetryable(reason) => ChannelError::transport(uri, reason),
        other => other,
    }
}
