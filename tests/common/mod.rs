#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use mom_multicast::{Notification, NotificationStream};

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Install a tracing subscriber once per test binary (`RUST_LOG` controls it).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `tcp://127.0.0.1:<port>` on a port that was free a moment ago.
pub fn free_tcp_address() -> String {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port");
    format!("tcp://127.0.0.1:{port}")
}

/// One in-process and one TCP address, so each behavior is checked on both.
pub fn addresses(name: &str) -> Vec<String> {
    vec![format!("inproc://{name}"), free_tcp_address()]
}

/// Next notification, failing the test if none arrives in time.
pub async fn next<T>(stream: &mut NotificationStream<T>) -> Notification<T> {
    tokio::time::timeout(DELIVERY_TIMEOUT, stream.recv())
        .await
        .expect("notification before timeout")
        .expect("stream still open")
}

/// The next `count` values, failing on any non-value notification.
pub async fn next_values<T: std::fmt::Debug>(
    stream: &mut NotificationStream<T>,
    count: usize,
) -> Vec<T> {
    let mut values = Vec::with_capacity(count);
    while values.len() < count {
        match next(stream).await {
            Notification::Next(value) => values.push(value),
            other => panic!("expected a value, got {other:?}"),
        }
    }
    values
}

/// True when nothing shows up on `stream` for a short while.
pub async fn stays_quiet<T>(stream: &mut NotificationStream<T>) -> bool {
    tokio::time::timeout(QUIET_PERIOD, stream.recv()).await.is_err()
}

/// Poll `condition` until it holds or the delivery timeout expires.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + DELIVERY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
