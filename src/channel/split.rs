//! Publish-only and observe-only channels.
//!
//! A [`Publisher`] binds the address; a [`Subscriber`] connects to it. The
//! two halves may be built from different registries, or run in different
//! processes over `tcp://`. Topic filtering is the same as for
//! [`MulticastChannel`](crate::MulticastChannel): both halves must agree on
//! the message type or on an explicit topic name.

use std::fmt;
use std::sync::Arc;

use crate::channel::{subscribe_via, terminate_via, Inlet, Lifecycle, Message, Outlet, Terminal};
use crate::codec::{Codec, JsonCodec};
use crate::config::{ChannelConfig, ChannelState};
use crate::subscription::{stream_observer, NotificationStream, Observer, Subscription};
use crate::{diag, log_debug, ChannelError, Result, TopicId};

/// Producer half of a split channel.
///
/// # Example
///
/// ```no_run
/// use mom_multicast::{ChannelBuilder, EndpointRegistry};
///
/// # async fn example() -> mom_multicast::Result<()> {
/// let publisher = ChannelBuilder::new()
///     .address("tcp://*:5556")
///     .registry(EndpointRegistry::new())
///     .publisher::<String>()?;
///
/// publisher.bind().await?;
/// publisher.push(&"hello".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Publisher<T, C = JsonCodec> {
    // ---
    config: Arc<ChannelConfig>,
    topic: TopicId,
    lifecycle: Lifecycle,
    outlet: Outlet<T, C>,
}

impl<T: Message, C: Codec> Publisher<T, C> {
    pub(crate) fn from_config(config: ChannelConfig, codec: C) -> Self {
        // ---
        let topic = config.topic_for::<T>();
        let config = Arc::new(config);

        Self {
            outlet: Outlet::new(config.clone(), Arc::new(codec), topic),
            lifecycle: Lifecycle::new(),
            config,
            topic,
        }
    }

    /// Bind the address now instead of on the first push.
    ///
    /// Subscribers only receive values pushed after they connect, so a
    /// publisher that must be reachable before its first value binds early.
    pub async fn bind(&self) -> Result<()> {
        // ---
        if self.lifecycle.is_terminal() {
            return Ok(());
        }
        self.lifecycle.begin_init();
        let bound = self.outlet.ensure().await;
        self.lifecycle.finish_init(bound.is_ok());
        bound.map(|_| ())
    }

    /// Publish `value` to every connected subscriber.
    ///
    /// A no-op on a disposed publisher.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Serialization`] when the codec cannot encode `value`
    /// - [`ChannelError::Transport`] when binding or sending fails
    pub async fn push(&self, value: &T) -> Result<()> {
        // ---
        if self.lifecycle.is_terminal() {
            log_debug!("{}: push on {} publisher ignored", self.config.address, self.state());
            return Ok(());
        }

        if !self.outlet.is_ready() {
            self.bind().await?;
        }
        self.outlet.send(value).await.map(|_| ())
    }

    /// Release the producer endpoint. Later pushes are no-ops.
    pub fn dispose(&self) {
        // ---
        if !self.lifecycle.dispose() {
            return;
        }
        self.outlet.close();
        diag!(self.config.diagnostics, "{}: publisher disposed", self.config.address);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.lifecycle.get()
    }

    /// Topic stamped on this publisher's frames.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Address the publisher was built for.
    pub fn address(&self) -> &str {
        &self.config.address
    }
}

impl<T, C> fmt::Debug for Publisher<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("address", &self.config.address)
            .field("topic", &self.topic)
            .field("state", &self.lifecycle.get())
            .finish()
    }
}

/// Consumer half of a split channel.
pub struct Subscriber<T, C = JsonCodec> {
    // ---
    config: Arc<ChannelConfig>,
    topic: TopicId,
    lifecycle: Lifecycle,
    inlet: Inlet<T, C>,
}

impl<T: Message, C: Codec> Subscriber<T, C> {
    pub(crate) fn from_config(config: ChannelConfig, codec: C) -> Self {
        // ---
        let topic = config.topic_for::<T>();
        let config = Arc::new(config);

        Self {
            inlet: Inlet::new(config.clone(), Arc::new(codec), topic),
            lifecycle: Lifecycle::new(),
            config,
            topic,
        }
    }

    /// Connect and register the route now instead of on the first subscribe.
    pub async fn connect(&self) -> Result<()> {
        // ---
        if self.lifecycle.is_terminal() {
            return Ok(());
        }
        self.lifecycle.begin_init();
        let attached = self.inlet.attach().await;
        self.lifecycle.finish_init(attached.is_ok());
        attached.map(|_| ())
    }

    /// Register `observer`.
    ///
    /// On a completed or faulted subscriber the terminal signal is replayed
    /// to `observer` immediately.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Transport`] when the address cannot be connected.
    pub async fn subscribe(&self, observer: Observer<T>) -> Result<Subscription> {
        subscribe_via(&self.lifecycle, &self.inlet, observer, || async { Ok(()) }).await
    }

    /// Register a value-only observer.
    pub async fn subscribe_next(
        &self,
        on_next: impl Fn(T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.subscribe(Observer::new(on_next)).await
    }

    /// Register an observer with all three callbacks.
    pub async fn subscribe_with(
        &self,
        on_next: impl Fn(T) + Send + Sync + 'static,
        on_error: impl Fn(ChannelError) + Send + Sync + 'static,
        on_completed: impl Fn() + Send + Sync + 'static,
    ) -> Result<Subscription> {
        // ---
        let observer = Observer::new(on_next)
            .on_error(on_error)
            .on_completed(on_completed);
        self.subscribe(observer).await
    }

    /// Register an observer whose notifications can be awaited.
    pub async fn subscribe_stream(&self) -> Result<(Subscription, NotificationStream<T>)> {
        let (observer, stream) = stream_observer();
        let subscription = self.subscribe(observer).await?;
        Ok((subscription, stream))
    }

    /// Fail the subscriber locally: every observer's `on_error` sees `err` once.
    ///
    /// On first use this connects like [`connect`](Self::connect); a connect
    /// failure is returned after the subscriber has been faulted.
    pub async fn error(&self, err: impl Into<ChannelError>) -> Result<()> {
        let terminal = Terminal::Faulted(err.into());
        terminate_via(&self.lifecycle, &self.inlet, || async { Ok(()) }, terminal).await
    }

    /// Complete the subscriber locally: every observer's `on_completed` runs once.
    ///
    /// On first use this connects like [`connect`](Self::connect); a connect
    /// failure is returned after the subscriber has been completed.
    pub async fn complete(&self) -> Result<()> {
        let terminal = Terminal::Completed;
        terminate_via(&self.lifecycle, &self.inlet, || async { Ok(()) }, terminal).await
    }

    /// Unregister the route and release the consumer endpoint.
    pub fn dispose(&self) {
        // ---
        if !self.lifecycle.dispose() {
            return;
        }
        self.inlet.close();
        diag!(self.config.diagnostics, "{}: subscriber disposed", self.config.address);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.lifecycle.get()
    }

    /// Topic this subscriber routes on.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Address the subscriber was built for.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Observers currently registered.
    pub fn observer_count(&self) -> usize {
        self.inlet.observer_count()
    }
}

impl<T, C> fmt::Debug for Subscriber<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("address", &self.config.address)
            .field("topic", &self.topic)
            .field("state", &self.lifecycle.get())
            .finish()
    }
}
