//! Typed channels.
//!
//! - [`MulticastChannel`] publishes and observes on one address.
//! - [`Publisher`] / [`Subscriber`] split the two sides, possibly across
//!   registries or processes.
//!
//! All three are assembled from the same parts defined here: a lifecycle
//! state, an [`Outlet`] that lazily acquires the producer endpoint and sends
//! encoded frames, and an [`Inlet`] that lazily registers a decode route on
//! the consumer endpoint and fans values out through a
//! [`SubscriptionSet`].

mod multicast;
mod split;

pub use multicast::MulticastChannel;
pub use split::{Publisher, Subscriber};

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::config::{ChannelConfig, ChannelState, Diagnostics};
use crate::domain::Role;
use crate::registry::{EndpointHandle, FrameSink, RouteGuard};
use crate::subscription::{Observer, Subscription, SubscriptionSet};
use crate::{diag, log_debug, wire, ChannelError, Result, TopicId};

/// Types that can travel over a channel.
///
/// Implemented for every `Serialize + DeserializeOwned + Clone + Send + Sync`
/// type; there is nothing to implement by hand.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Value created on first use, at most once at a time, and droppable.
///
/// Initializers run under an async lock so concurrent first callers share
/// one attempt; a failed attempt leaves the slot empty for the next caller.
/// After [`close`](Self::close) the slot stays empty.
pub(crate) struct LazySlot<V> {
    // ---
    init: tokio::sync::Mutex<()>,
    value: Mutex<Option<Arc<V>>>,
    closed: AtomicBool,
}

impl<V> LazySlot<V> {
    pub(crate) fn new() -> Self {
        Self {
            init: tokio::sync::Mutex::new(()),
            value: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Current value, if initialized.
    pub(crate) fn get(&self) -> Option<Arc<V>> {
        self.value.lock().clone()
    }

    /// Current value, initializing it with `create` if needed.
    ///
    /// Returns `Ok(None)` once the slot has been closed.
    pub(crate) async fn get_or_try_init<F, Fut>(&self, create: F) -> Result<Option<Arc<V>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // ---
        if let Some(value) = self.get() {
            return Ok(Some(value));
        }

        let _init = self.init.lock().await;
        if let Some(value) = self.get() {
            return Ok(Some(value));
        }
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }

        let value = Arc::new(create().await?);

        let mut slot = self.value.lock();
        if self.closed.load(Ordering::Acquire) {
            // Closed while initializing; the new value is dropped here.
            return Ok(None);
        }
        *slot = Some(value.clone());
        Ok(Some(value))
    }

    /// Drop the value and refuse further initialization.
    pub(crate) fn close(&self) -> Option<Arc<V>> {
        // ---
        let mut slot = self.value.lock();
        self.closed.store(true, Ordering::Release);
        slot.take()
    }
}

/// Channel lifecycle shared by all channel kinds.
pub(crate) struct Lifecycle {
    state: Mutex<ChannelState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Uninitialized),
        }
    }

    pub(crate) fn get(&self) -> ChannelState {
        *self.state.lock()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.get().is_terminal()
    }

    /// Mark an initialization attempt as started.
    pub(crate) fn begin_init(&self) {
        let mut state = self.state.lock();
        if *state == ChannelState::Uninitialized {
            *state = ChannelState::Initializing;
        }
    }

    /// Record the outcome of an initialization attempt.
    pub(crate) fn finish_init(&self, ok: bool) {
        // ---
        let mut state = self.state.lock();
        if matches!(
            *state,
            ChannelState::Uninitialized | ChannelState::Initializing
        ) {
            *state = if ok {
                ChannelState::Active
            } else {
                ChannelState::Uninitialized
            };
        }
    }

    /// Move to `next` unless already terminal. Returns whether it moved.
    pub(crate) fn terminate(&self, next: ChannelState) -> bool {
        // ---
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    /// Move to `Disposed`. Returns false if already disposed.
    pub(crate) fn dispose(&self) -> bool {
        let mut state = self.state.lock();
        let was = std::mem::replace(&mut *state, ChannelState::Disposed);
        was != ChannelState::Disposed
    }
}

/// Producer side of a channel: encode, frame and send.
pub(crate) struct Outlet<T, C> {
    // ---
    config: Arc<ChannelConfig>,
    codec: Arc<C>,
    topic: TopicId,
    producer: LazySlot<EndpointHandle>,
    _message: PhantomData<fn(T)>,
}

impl<T: Message, C: Codec> Outlet<T, C> {
    pub(crate) fn new(config: Arc<ChannelConfig>, codec: Arc<C>, topic: TopicId) -> Self {
        Self {
            config,
            codec,
            topic,
            producer: LazySlot::new(),
            _message: PhantomData,
        }
    }

    /// Bind the producer endpoint if it is not bound yet.
    pub(crate) async fn ensure(&self) -> Result<Option<Arc<EndpointHandle>>> {
        // ---
        let config = &self.config;
        let content_type = self.codec.content_type();
        self.producer
            .get_or_try_init(|| async {
                let handle = config
                    .registry
                    .acquire(&config.address, Role::Producer, &config.socket)
                    .await?;
                diag!(
                    config.diagnostics,
                    "{}: producer endpoint ready ({content_type})",
                    config.address
                );
                Ok(handle)
            })
            .await
    }

    /// Encode `value` and send it. `Ok(false)` when the outlet is closed.
    pub(crate) async fn send(&self, value: &T) -> Result<bool> {
        // ---
        // Encode first so serialization errors surface without touching sockets.
        let payload = self.codec.encode(value)?;
        let frame = wire::frame(self.topic, &payload);

        match self.ensure().await? {
            Some(producer) => {
                producer.send(frame).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.producer.get().is_some()
    }

    pub(crate) fn close(&self) {
        drop(self.producer.close());
    }
}

/// Decodes routed payloads and fans them out to a subscription set.
struct DecodeSink<T, C> {
    // ---
    set: Arc<SubscriptionSet<T>>,
    codec: Arc<C>,
    diagnostics: Diagnostics,
    address: Arc<str>,
}

impl<T: Message, C: Codec> FrameSink for DecodeSink<T, C> {
    fn deliver(&self, payload: Bytes) {
        // ---
        match self.codec.decode::<T>(&payload) {
            Ok(value) => self.set.deliver_next(value),
            Err(err) => {
                diag!(
                    self.diagnostics,
                    "{}: dropping undecodable {} frame: {err}",
                    self.address,
                    self.codec.content_type()
                );
            }
        }
    }
}

/// A registered route plus the consumer handle it lives on.
///
/// Field order matters: the route is removed before the handle is released.
pub(crate) struct Attachment {
    _route: RouteGuard,
    _consumer: EndpointHandle,
}

/// Consumer side of a channel: observers plus a lazily registered route.
pub(crate) struct Inlet<T, C> {
    // ---
    config: Arc<ChannelConfig>,
    codec: Arc<C>,
    topic: TopicId,
    set: Arc<SubscriptionSet<T>>,
    attachment: LazySlot<Attachment>,
}

impl<T: Message, C: Codec> Inlet<T, C> {
    pub(crate) fn new(config: Arc<ChannelConfig>, codec: Arc<C>, topic: TopicId) -> Self {
        Self {
            config,
            codec,
            topic,
            set: SubscriptionSet::new(),
            attachment: LazySlot::new(),
        }
    }

    /// Connect and register this channel's route, exactly once.
    ///
    /// `Ok(false)` when the inlet is closed.
    pub(crate) async fn attach(&self) -> Result<bool> {
        // ---
        let config = &self.config;
        let attached = self
            .attachment
            .get_or_try_init(|| async {
                let consumer = config
                    .registry
                    .acquire(&config.address, Role::Consumer, &config.socket)
                    .await?;
                diag!(config.diagnostics, "{}: consumer endpoint ready", config.address);

                let sink = Arc::new(DecodeSink {
                    set: self.set.clone(),
                    codec: self.codec.clone(),
                    diagnostics: config.diagnostics.clone(),
                    address: config.address.clone(),
                });
                let route = consumer.register_route(self.topic, sink)?;
                diag!(
                    config.diagnostics,
                    "{}: route registered for topic {}",
                    config.address,
                    self.topic
                );

                Ok(Attachment {
                    _route: route,
                    _consumer: consumer,
                })
            })
            .await?;

        Ok(attached.is_some())
    }

    pub(crate) fn add(&self, observer: Observer<T>) -> Subscription {
        self.set.add(observer)
    }

    pub(crate) fn complete(&self) {
        self.set.deliver_complete();
    }

    pub(crate) fn error(&self, err: &ChannelError) {
        self.set.deliver_error(err);
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.set.len()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attachment.get().is_some()
    }

    pub(crate) fn close(&self) {
        drop(self.attachment.close());
    }
}

/// First-use initialization of an inlet, recorded on `lifecycle`.
///
/// `prepare` runs before the inlet attaches; multicast channels use it to
/// bind their producer first. `Ok(false)` when the inlet is closed.
pub(crate) async fn attach_via<T, C, P, Fut>(
    lifecycle: &Lifecycle,
    inlet: &Inlet<T, C>,
    prepare: P,
) -> Result<bool>
where
    T: Message,
    C: Codec,
    P: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // ---
    if inlet.is_attached() {
        return Ok(true);
    }

    lifecycle.begin_init();
    let attached = match prepare().await {
        Ok(()) => inlet.attach().await,
        Err(err) => Err(err),
    };
    match attached {
        Ok(true) => {
            lifecycle.finish_init(true);
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(err) => {
            lifecycle.finish_init(false);
            Err(err)
        }
    }
}

/// Subscribe operations shared by [`MulticastChannel`] and [`Subscriber`].
pub(crate) async fn subscribe_via<T, C, P, Fut>(
    lifecycle: &Lifecycle,
    inlet: &Inlet<T, C>,
    observer: Observer<T>,
    prepare: P,
) -> Result<Subscription>
where
    T: Message,
    C: Codec,
    P: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // ---
    match lifecycle.get() {
        ChannelState::Disposed => {
            log_debug!("subscribe on a disposed channel ignored");
            return Ok(Subscription::inert());
        }
        // Terminal sets replay their signal without touching endpoints.
        ChannelState::Completed | ChannelState::Faulted => return Ok(inlet.add(observer)),
        _ => {}
    }

    if !attach_via(lifecycle, inlet, prepare).await? {
        return Ok(Subscription::inert());
    }
    Ok(inlet.add(observer))
}

/// Local terminal signal shared by [`MulticastChannel`] and [`Subscriber`].
///
/// The first call initializes endpoints like a first subscribe would. The
/// signal reaches the observers even when that fails; the initialization
/// error is returned afterwards. No-op on a terminal channel.
pub(crate) async fn terminate_via<T, C, P, Fut>(
    lifecycle: &Lifecycle,
    inlet: &Inlet<T, C>,
    prepare: P,
    terminal: Terminal,
) -> Result<()>
where
    T: Message,
    C: Codec,
    P: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    // ---
    let address = &inlet.config.address;
    if lifecycle.is_terminal() {
        log_debug!("{address}: {terminal:?} on {} channel ignored", lifecycle.get());
        return Ok(());
    }

    let initialized = attach_via(lifecycle, inlet, prepare).await.map(|_| ());

    let next = match &terminal {
        Terminal::Completed => ChannelState::Completed,
        Terminal::Faulted(_) => ChannelState::Faulted,
    };
    // A concurrent terminal call or dispose may have won during init.
    if !lifecycle.terminate(next) {
        return initialized;
    }

    match terminal {
        Terminal::Completed => {
            diag!(inlet.config.diagnostics, "{address}: completed");
            inlet.complete();
        }
        Terminal::Faulted(err) => {
            diag!(inlet.config.diagnostics, "{address}: faulted: {err}");
            inlet.error(&err);
        }
    }
    initialized
}

/// Local terminal signal requested by a caller.
#[derive(Debug)]
pub(crate) enum Terminal {
    Completed,
    Faulted(ChannelError),
}
