//! Connect retry for subscribers that start before their publisher.
//!
//! A `tcp://` subscriber may run before the publisher has bound its port.
//! [`connect_with_retry`] repeats the connect while it fails with
//! [`ChannelError::TransportRetryable`], sleeping between attempts. The
//! sleeps come from a [`Backoff`] schedule:
//!
//! - the first sleep is `initial_delay`;
//! - each later sleep is the previous one times `multiplier`, capped at
//!   `max_delay`;
//! - every sleep is spread by ±25% so subscribers restarted together do not
//!   reconnect in lockstep.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;

use crate::{log_debug, ChannelError, Result};

/// How a subscriber retries a refused connect.
///
/// # Example
///
/// ```
/// use mom_multicast::RetryConfig;
/// use std::time::Duration;
///
/// // Wait up to ~10 attempts for a slow publisher.
/// let retry = RetryConfig {
///     max_attempts: 10,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(50),
///     max_delay: Duration::from_secs(2),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Connects attempted after the first one fails; 0 connects once.
    pub max_attempts: u32,

    /// Growth factor between consecutive sleeps.
    pub multiplier: f32,

    /// Sleep after the first refused connect.
    pub initial_delay: Duration,

    /// Longest single sleep.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// Three retries, 100ms doubling to at most 5s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Sleeps between connect attempts, before jitter.
///
/// Yields exactly `max_attempts` delays.
struct Backoff {
    // ---
    next: Duration,
    multiplier: f64,
    cap: Duration,
    remaining: u32,
}

impl Backoff {
    fn new(policy: &RetryConfig) -> Self {
        Self {
            next: policy.initial_delay.min(policy.max_delay),
            multiplier: f64::from(policy.multiplier).max(1.0),
            cap: policy.max_delay,
            remaining: policy.max_attempts,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        // ---
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.next;
        self.next = Duration::from_secs_f64(delay.as_secs_f64() * self.multiplier).min(self.cap);
        Some(delay)
    }
}

/// Run `connect` until it succeeds, fails hard, or `policy` runs out.
///
/// With no policy `connect` runs once. Errors other than
/// [`ChannelError::TransportRetryable`] are returned as they are. A
/// retryable error that outlives the policy becomes a
/// [`ChannelError::Transport`] naming `address`.
pub(crate) async fn connect_with_retry<F, Fut, T>(
    policy: Option<&RetryConfig>,
    address: &str,
    mut connect: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // ---
    let mut backoff = policy.map(Backoff::new);
    let mut attempt = 0u32;

    loop {
        let reason = match connect().await {
            Ok(connected) => return Ok(connected),
            Err(ChannelError::TransportRetryable(reason)) => reason,
            Err(err) => return Err(err),
        };
        attempt += 1;

        let Some(delay) = backoff.as_mut().and_then(Iterator::next) else {
            log_debug!("{address}: connect failed after {attempt} attempt(s): {reason}");
            return Err(ChannelError::transport(address, reason));
        };

        let delay = spread(delay);
        log_debug!("{address}: connect attempt {attempt} refused ({reason}), next in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

/// `delay` scaled by a random factor in `0.75..=1.25`.
fn spread(delay: Duration) -> Duration {
    // ---
    // Each RandomState is keyed at random.
    let roll = RandomState::new().hash_one(delay) % 1001;
    let factor = 0.75 + roll as f64 / 2000.0;

    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
