//! Publish and observe on one address.

use std::fmt;
use std::sync::Arc;

use crate::channel::{subscribe_via, terminate_via, Inlet, Lifecycle, Message, Outlet, Terminal};
use crate::codec::{Codec, JsonCodec};
use crate::config::{ChannelConfig, ChannelState};
use crate::subscription::{stream_observer, NotificationStream, Observer, Subscription};
use crate::{diag, log_debug, ChannelError, Result, TopicId};

/// A typed channel that is both producer and consumer on one address.
///
/// Values pushed on the channel travel through the transport and come back
/// to every observer subscribed at the time they arrive, along with values
/// pushed by any other producer on the same address and topic.
///
/// Construction stores configuration only. The first `push` binds the
/// producer endpoint; the first `subscribe`, `complete` or `error` binds it
/// (if needed) and then connects the consumer endpoint and registers the
/// channel's route.
///
/// # Example
///
/// ```no_run
/// use mom_multicast::{ChannelBuilder, EndpointRegistry};
///
/// # async fn example() -> mom_multicast::Result<()> {
/// let channel = ChannelBuilder::new()
///     .address("inproc://numbers")
///     .registry(EndpointRegistry::new())
///     .multicast::<u32>()?;
///
/// let subscription = channel.subscribe_next(|n| println!("got {n}")).await?;
/// channel.push(&42).await?;
/// subscription.dispose();
/// # Ok(())
/// # }
/// ```
pub struct MulticastChannel<T, C = JsonCodec> {
    // ---
    config: Arc<ChannelConfig>,
    topic: TopicId,
    lifecycle: Lifecycle,
    outlet: Outlet<T, C>,
    inlet: Inlet<T, C>,
}

impl<T: Message, C: Codec> MulticastChannel<T, C> {
    pub(crate) fn from_config(config: ChannelConfig, codec: C) -> Self {
        // ---
        let topic = config.topic_for::<T>();
        let config = Arc::new(config);
        let codec = Arc::new(codec);

        Self {
            outlet: Outlet::new(config.clone(), codec.clone(), topic),
            inlet: Inlet::new(config.clone(), codec, topic),
            lifecycle: Lifecycle::new(),
            config,
            topic,
        }
    }

    /// Publish `value` to every observer on the address.
    ///
    /// A no-op on a completed, faulted or disposed channel.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Serialization`] when the codec cannot encode `value`;
    ///   the channel remains usable
    /// - [`ChannelError::Transport`] when the producer endpoint cannot be
    ///   bound or the send fails
    pub async fn push(&self, value: &T) -> Result<()> {
        // ---
        if self.lifecycle.is_terminal() {
            log_debug!("{}: push on {} channel ignored", self.config.address, self.state());
            return Ok(());
        }

        if self.outlet.is_ready() {
            self.outlet.send(value).await?;
            return Ok(());
        }

        self.lifecycle.begin_init();
        let sent = self.outlet.send(value).await;
        // A serialization failure says nothing about the endpoint.
        let bound = self.outlet.is_ready();
        self.lifecycle.finish_init(bound);
        sent.map(|_| ())
    }

    /// Register `observer`.
    ///
    /// On a completed or faulted channel the terminal signal is replayed to
    /// `observer` immediately. On a disposed channel nothing is registered.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Transport`] when an endpoint cannot be set up.
    pub async fn subscribe(&self, observer: Observer<T>) -> Result<Subscription> {
        subscribe_via(&self.lifecycle, &self.inlet, observer, || self.bind_producer()).await
    }

    // Bind before connect so the consumer never races its own producer.
    async fn bind_producer(&self) -> Result<()> {
        self.outlet.ensure().await.map(|_| ())
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

    /// Fail the channel locally: every observer's `on_error` sees `err` once.
    ///
    /// The error is not sent over the transport. A no-op on a terminal
    /// channel.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Transport`] when this is the channel's first use and
    /// its endpoints cannot be set up. The channel is faulted regardless.
    pub async fn error(&self, err: impl Into<ChannelError>) -> Result<()> {
        let terminal = Terminal::Faulted(err.into());
        terminate_via(&self.lifecycle, &self.inlet, || self.bind_producer(), terminal).await
    }

    /// Complete the channel locally: every observer's `on_completed` runs once.
    ///
    /// Completion is not sent over the transport. A no-op on a terminal
    /// channel.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Transport`] when this is the channel's first use and
    /// its endpoints cannot be set up. The channel is completed regardless.
    pub async fn complete(&self) -> Result<()> {
        let terminal = Terminal::Completed;
        terminate_via(&self.lifecycle, &self.inlet, || self.bind_producer(), terminal).await
    }

    /// Unregister the route and release both endpoints.
    ///
    /// Later operations are no-ops. Dropping the channel has the same effect.
    pub fn dispose(&self) {
        // ---
        if !self.lifecycle.dispose() {
            return;
        }
        self.inlet.close();
        self.outlet.close();
        diag!(self.config.diagnostics, "{}: disposed", self.config.address);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.lifecycle.get()
    }

    /// Topic stamped on this channel's frames.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Address the channel was built for.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Observers currently registered.
    pub fn observer_count(&self) -> usize {
        self.inlet.observer_count()
    }
}

impl<T, C> fmt::Debug for MulticastChannel<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastChannel")
            .field("address", &self.config.address)
            .field("topic", &self.topic)
            .field("state", &self.lifecycle.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::subscription::Notification;
    use crate::{ChannelBuilder, EndpointRegistry};
    use std::time::Duration;

    fn channel(registry: &Arc<EndpointRegistry>, name: &str) -> MulticastChannel<u32> {
        ChannelBuilder::new()
            .address(format!("inproc://{name}"))
            .registry(registry.clone())
            .multicast::<u32>()
            .expect("valid config")
    }

    async fn next(stream: &mut NotificationStream<u32>) -> Option<Notification<u32>> {
        tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn construction_is_lazy() {
        // ---
        let registry = EndpointRegistry::new();
        let channel = channel(&registry, "lazy");

        assert_eq!(channel.state(), ChannelState::Uninitialized);
        assert_eq!(registry.endpoint_count(), 0);
        assert_eq!(channel.topic(), TopicId::of::<u32>());
    }

    #[tokio::test]
    async fn subscribe_binds_then_connects() {
        // ---
        let registry = EndpointRegistry::new();
        let channel = channel(&registry, "order");

        let (_subscription, mut stream) = channel.subscribe_stream().await.expect("subscribe");
        channel.push(&5).await.expect("push");

        assert_eq!(channel.state(), ChannelState::Active);
        assert_eq!(registry.endpoint_count(), 2);
        assert_eq!(next(&mut stream).await, Some(Notification::Next(5)));
    }

    #[tokio::test]
    async fn first_complete_initializes_endpoints() {
        // ---
        let registry = EndpointRegistry::new();
        let channel = channel(&registry, "complete");

        channel.complete().await.expect("complete");
        channel.complete().await.expect("second complete is a no-op");
        channel.push(&1).await.expect("push is a no-op");

        assert_eq!(channel.state(), ChannelState::Completed);
        assert_eq!(registry.endpoint_count(), 2);
        assert!(registry.memory_hub().is_bound("complete"));

        let (subscription, mut stream) = channel.subscribe_stream().await.expect("replay");
        assert!(subscription.is_disposed());
        assert_eq!(next(&mut stream).await, Some(Notification::Completed));

        channel.dispose();
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[tokio::test]
    async fn first_error_faults_even_when_init_fails() {
        // ---
        // Arrange
        let registry = EndpointRegistry::new();
        let squatter = channel(&registry, "taken");
        squatter.push(&0).await.expect("bind");

        let other = EndpointRegistry::with_memory_hub(registry.memory_hub().clone());
        let channel = channel(&other, "taken");

        // Act
        let failed = channel.error("stop").await;

        // Assert
        assert!(matches!(failed, Err(ChannelError::Transport { .. })), "{failed:?}");
        assert_eq!(channel.state(), ChannelState::Faulted);
        assert_eq!(other.endpoint_count(), 0);

        let (_subscription, mut stream) = channel.subscribe_stream().await.expect("replay");
        assert_eq!(
            next(&mut stream).await,
            Some(Notification::Error(ChannelError::Faulted("stop".into())))
        );
    }

    #[tokio::test]
    async fn dispose_releases_endpoints() {
        // ---
        let registry = EndpointRegistry::new();
        let channel = channel(&registry, "dispose");
        let _subscription = channel.subscribe_next(|_| {}).await.expect("subscribe");
        assert_eq!(registry.endpoint_count(), 2);

        channel.dispose();
        channel.dispose();

        assert_eq!(channel.state(), ChannelState::Disposed);
        assert_eq!(registry.endpoint_count(), 0);
        channel.push(&1).await.expect("no-op");
        assert!(channel
            .subscribe_next(|_| {})
            .await
            .expect("no-op")
            .is_disposed());
        assert_eq!(registry.endpoint_count(), 0);
    }
}
