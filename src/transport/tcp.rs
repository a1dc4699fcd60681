//! TCP transport (`tcp://host:port`).
//!
//! Publish/subscribe over plain TCP, following the usual socket topology:
//! the producer binds, consumers connect.
//!
//! ## Connection model
//!
//! - The bound side runs an **accept task**. Each accepted subscriber gets
//!   its own **writer task** fed by a bounded queue
//!   (`send_high_water_mark`). `send` copies a frame into every queue
//!   without waiting. A subscriber whose queue is full misses that frame;
//!   the others are unaffected.
//! - The connecting side runs a **reader task** that decodes frames and
//!   forwards them to the subscribe socket's inbox.
//! - Frames are length-delimited (`LengthDelimitedCodec`, 4-byte big-endian
//!   length prefix).
//!
//! ## Join handshake
//!
//! On accept, the publisher registers the connection and enqueues a greeting
//! frame ahead of any data, under the same lock `send` uses to snapshot its
//! connections. `connect` returns only after reading the greeting, so every
//! frame sent after `connect` returns reaches the new subscriber. Frames sent
//! before that are not replayed.
//!
//! ## Connect retry
//!
//! Refused or reset connections are retryable; with a
//! [`RetryConfig`](crate::RetryConfig) a subscriber may start before its
//! publisher has bound the address.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::domain::{PublishSocket, PublishSocketPtr, SocketOptions, SubscribeSocket, Transport};
use crate::retry::connect_with_retry;
use crate::{log_debug, log_info, log_warn, ChannelError, Result};

/// First frame written to every accepted subscriber.
const GREETING: &[u8] = b"MOMC\x01";

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

struct Connection {
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    // Set while frames are being dropped, so each stall is logged once.
    lagging: bool,
}

type ConnectionList = Arc<Mutex<Vec<Connection>>>;

fn frame_codec(opts: &SocketOptions) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(opts.max_frame_length)
        .new_codec()
}

/// `*` binds all interfaces.
fn bind_target(endpoint: &str) -> String {
    match endpoint.strip_prefix("*:") {
        Some(port) => format!("0.0.0.0:{port}"),
        None => endpoint.to_string(),
    }
}

/// `*` connects over loopback.
fn connect_target(endpoint: &str) -> String {
    match endpoint.strip_prefix("*:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => endpoint.to_string(),
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::TimedOut
    )
}

/// Bound side of a TCP address.
struct TcpPublishSocket {
    // ---
    address: String,
    max_frame_length: usize,
    connections: ConnectionList,
    acceptor: JoinHandle<()>,
    closed: AtomicBool,
}

impl TcpPublishSocket {
    // ---
    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.acceptor.abort();
            // Dropping the queues ends every writer task.
            self.connections.lock().clear();
            log_debug!("{}: publish socket closed", self.address);
        }
    }
}

#[async_trait::async_trait]
impl PublishSocket for TcpPublishSocket {
    // ---
    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::transport(&self.address, "publish socket closed"));
        }

        if frame.len() > self.max_frame_length {
            return Err(ChannelError::transport(
                &self.address,
                format!(
                    "frame of {} bytes exceeds max_frame_length {}",
                    frame.len(),
                    self.max_frame_length
                ),
            ));
        }

        let _address = &self.address;
        self.connections
            .lock()
            .retain_mut(|conn| match conn.tx.try_send(frame.clone()) {
                Ok(()) => {
                    conn.lagging = false;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    if !conn.lagging {
                        log_warn!("{_address}: subscriber {} is full, dropping frames", conn.peer);
                        conn.lagging = true;
                    }
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    log_debug!("{_address}: dropping subscriber {}", conn.peer);
                    false
                }
            });

        Ok(())
    }

    fn subscriber_count(&self) -> usize {
        self.connections.lock().len()
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for TcpPublishSocket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    connections: ConnectionList,
    opts: SocketOptions,
    address: String,
) {
    // ---
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(_err) => {
                log_warn!("{address}: accept failed: {_err}");
                tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                continue;
            }
        };

        if let Err(_err) = stream.set_nodelay(true) {
            log_debug!("{address}: set_nodelay failed for {peer}: {_err}");
        }

        // One extra slot so the greeting never competes with data.
        let (tx, rx) = mpsc::channel(opts.send_high_water_mark.max(1) + 1);
        {
            let mut connections = connections.lock();
            let _ = tx.try_send(Bytes::from_static(GREETING));
            connections.push(Connection {
                peer,
                tx,
                lagging: false,
            });
        }

        log_debug!("{address}: subscriber {peer} joined");

        tokio::spawn(write_loop(stream, rx, frame_codec(&opts), peer));
    }
}

async fn write_loop(
    stream: TcpStream,
    mut rx: mpsc::Receiver<Bytes>,
    codec: LengthDelimitedCodec,
    _peer: SocketAddr,
) {
    // ---
    let mut sink = FramedWrite::new(stream, codec);

    'conn: while let Some(frame) = rx.recv().await {
        if sink.feed(frame).await.is_err() {
            break;
        }
        // Batch whatever is already queued into one flush.
        while let Ok(frame) = rx.try_recv() {
            if sink.feed(frame).await.is_err() {
                break 'conn;
            }
        }
        if let Err(_err) = SinkExt::<Bytes>::flush(&mut sink).await {
            log_debug!("write to {_peer} failed: {_err}");
            break;
        }
    }

    log_debug!("writer for {_peer} stopped");
}

async fn read_loop(
    mut frames: FramedRead<TcpStream, LengthDelimitedCodec>,
    tx: mpsc::Sender<Bytes>,
    _address: String,
) {
    // ---
    while let Some(item) = frames.next().await {
        match item {
            Ok(frame) => {
                if tx.send(frame.freeze()).await.is_err() {
                    // Subscribe socket dropped.
                    break;
                }
            }
            Err(_err) => {
                log_warn!("{_address}: read failed: {_err}");
                break;
            }
        }
    }

    log_debug!("{_address}: reader stopped");
}

async fn attempt_connect(
    target: &str,
    address: &str,
    opts: &SocketOptions,
) -> Result<FramedRead<TcpStream, LengthDelimitedCodec>> {
    // ---
    let stream = match tokio::time::timeout(opts.connect_timeout, TcpStream::connect(target)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) if is_transient(&err) => {
            return Err(ChannelError::TransportRetryable(format!("{address}: {err}")));
        }
        Ok(Err(err)) => return Err(ChannelError::transport(address, err)),
        Err(_) => {
            return Err(ChannelError::TransportRetryable(format!(
                "{address}: connect timed out"
            )));
        }
    };

    if let Err(_err) = stream.set_nodelay(true) {
        log_debug!("{address}: set_nodelay failed: {_err}");
    }

    let mut frames = FramedRead::new(stream, frame_codec(opts));

    match tokio::time::timeout(opts.connect_timeout, frames.next()).await {
        Ok(Some(Ok(frame))) if &frame[..] == GREETING => Ok(frames),
        Ok(Some(Ok(_))) => Err(ChannelError::transport(
            address,
            "peer did not send a publisher greeting",
        )),
        Ok(Some(Err(err))) => Err(ChannelError::TransportRetryable(format!(
            "{address}: {err}"
        ))),
        Ok(None) => Err(ChannelError::TransportRetryable(format!(
            "{address}: closed before greeting"
        ))),
        Err(_) => Err(ChannelError::TransportRetryable(format!(
            "{address}: timed out waiting for greeting"
        ))),
    }
}

/// Transport for `tcp://` addresses.
pub(crate) struct TcpTransport;

#[async_trait::async_trait]
impl Transport for TcpTransport {
    // ---
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    async fn bind(&self, endpoint: &str, opts: &SocketOptions) -> Result<PublishSocketPtr> {
        // ---
        let address = format!("tcp://{endpoint}");

        let listener = TcpListener::bind(bind_target(endpoint))
            .await
            .map_err(|err| ChannelError::transport(&address, err))?;

        let _local = listener
            .local_addr()
            .map_err(|err| ChannelError::transport(&address, err))?;

        log_info!("{address}: bound on {_local}");

        let connections: ConnectionList = Arc::new(Mutex::new(Vec::new()));
        let acceptor = tokio::spawn(accept_loop(
            listener,
            connections.clone(),
            opts.clone(),
            address.clone(),
        ));

        Ok(Arc::new(TcpPublishSocket {
            address,
            max_frame_length: opts.max_frame_length,
            connections,
            acceptor,
            closed: AtomicBool::new(false),
        }))
    }

    async fn connect(&self, endpoint: &str, opts: &SocketOptions) -> Result<SubscribeSocket> {
        // ---
        let address = format!("tcp://{endpoint}");
        let target = connect_target(endpoint);

        let frames = connect_with_retry(opts.connect_retry.as_ref(), &address, || {
            attempt_connect(&target, &address, opts)
        })
        .await?;

        log_info!("{address}: connected");

        let (tx, rx) = mpsc::channel(opts.send_high_water_mark.max(1));
        let reader = tokio::spawn(read_loop(frames, tx, address));

        Ok(SubscribeSocket::with_reader(rx, reader))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("free port")
    }

    fn no_retry() -> SocketOptions {
        SocketOptions {
            connect_retry: None,
            ..SocketOptions::default()
        }
    }

    #[test]
    fn wildcard_host_maps_per_direction() {
        // ---
        assert_eq!(bind_target("*:5556"), "0.0.0.0:5556");
        assert_eq!(connect_target("*:5556"), "127.0.0.1:5556");
        assert_eq!(connect_target("10.0.0.1:5556"), "10.0.0.1:5556");
    }

    #[tokio::test]
    async fn connect_waits_for_greeting_then_receives_in_order() {
        // ---
        // Arrange
        let endpoint = format!("127.0.0.1:{}", free_port());
        let opts = SocketOptions::default();
        let publisher = TcpTransport.bind(&endpoint, &opts).await.expect("bind");
        let mut subscriber = TcpTransport.connect(&endpoint, &opts).await.expect("connect");
        assert_eq!(publisher.subscriber_count(), 1);

        // Act
        for i in 0..10u8 {
            publisher.send(Bytes::from(vec![i])).await.expect("send");
        }

        // Assert
        for i in 0..10u8 {
            let frame = subscriber
                .recv_timeout(Duration::from_secs(5))
                .await
                .expect("inbox open")
                .expect("frame before timeout");
            assert_eq!(frame, Bytes::from(vec![i]));
        }
    }

    #[tokio::test]
    async fn bind_on_occupied_port_is_a_transport_error() {
        // ---
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = occupied.local_addr().expect("addr").port();

        let result = TcpTransport
            .bind(&format!("127.0.0.1:{port}"), &SocketOptions::default())
            .await;

        assert!(matches!(result, Err(ChannelError::Transport { .. })));
    }

    #[tokio::test]
    async fn connect_without_publisher_fails_after_retries() {
        // ---
        let endpoint = format!("127.0.0.1:{}", free_port());

        let result = TcpTransport.connect(&endpoint, &no_retry()).await;

        assert!(matches!(result, Err(ChannelError::Transport { .. })));
    }

    #[tokio::test]
    async fn subscriber_may_start_before_publisher() {
        // ---
        let endpoint = format!("127.0.0.1:{}", free_port());
        let opts = SocketOptions::default();

        let connecting = {
            let endpoint = endpoint.clone();
            let opts = opts.clone();
            tokio::spawn(async move { TcpTransport.connect(&endpoint, &opts).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        let publisher = TcpTransport.bind(&endpoint, &opts).await.expect("bind");

        let mut subscriber = connecting.await.expect("join").expect("connect");
        publisher
            .send(Bytes::from_static(b"late bind"))
            .await
            .expect("send");

        let frame = subscriber
            .recv_timeout(Duration::from_secs(5))
            .await
            .expect("inbox open");
        assert_eq!(frame, Some(Bytes::from_static(b"late bind")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_subscriber_does_not_block_sends() {
        // ---
        // Arrange
        let endpoint = format!("127.0.0.1:{}", free_port());
        let opts = SocketOptions {
            send_high_water_mark: 4,
            ..SocketOptions::default()
        };
        let publisher = TcpTransport.bind(&endpoint, &opts).await.expect("bind");
        // Never reads, not even the greeting.
        let _stalled = TcpStream::connect(&endpoint).await.expect("raw connect");
        let mut healthy = TcpTransport.connect(&endpoint, &opts).await.expect("connect");
        assert_eq!(publisher.subscriber_count(), 2);

        // Act
        let payload = Bytes::from(vec![7u8; 64 * 1024]);
        let burst = async {
            for _ in 0..500 {
                publisher.send(payload.clone()).await?;
            }
            Ok::<_, ChannelError>(())
        };
        tokio::time::timeout(Duration::from_secs(5), burst)
            .await
            .expect("sends never wait on a full queue")
            .expect("send");

        // Assert
        while healthy
            .recv_timeout(Duration::from_millis(200))
            .await
            .expect("inbox open")
            .is_some()
        {}
        publisher
            .send(Bytes::from_static(b"after the burst"))
            .await
            .expect("send");
        let frame = healthy
            .recv_timeout(Duration::from_secs(5))
            .await
            .expect("inbox open");
        assert_eq!(frame, Some(Bytes::from_static(b"after the burst")));
        assert_eq!(publisher.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_on_send() {
        // ---
        let endpoint = format!("127.0.0.1:{}", free_port());
        let opts = SocketOptions {
            max_frame_length: 8,
            ..SocketOptions::default()
        };
        let publisher = TcpTransport.bind(&endpoint, &opts).await.expect("bind");

        let result = publisher.send(Bytes::from(vec![0u8; 9])).await;

        assert!(matches!(result, Err(ChannelError::Transport { .. })));
    }
}
