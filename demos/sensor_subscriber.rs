//! Sensor subscriber over TCP.
//!
//! Connects to `sensor_publisher`, retrying until it is up, and prints each
//! reading as it arrives.
//!
//! Run with: cargo run --example sensor_subscriber
//!
//! Environment:
//! - `SENSOR_ADDRESS` (default `tcp://127.0.0.1:5556`)

mod common;

use std::time::Duration;

use common::{SensorReading, READINGS_TOPIC};
use futures::StreamExt;
use mom_multicast::{ChannelBuilder, EndpointRegistry, Notification, Result, RetryConfig};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let address =
        std::env::var("SENSOR_ADDRESS").unwrap_or_else(|_| "tcp://127.0.0.1:5556".to_string());

    let subscriber = ChannelBuilder::new()
        .address(&address)
        .registry(EndpointRegistry::new())
        .topic_name(READINGS_TOPIC)
        .connect_retry(RetryConfig {
            max_attempts: 30,
            multiplier: 1.5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        })
        .diagnostics(|line| eprintln!("[diag] {line}"))
        .subscriber::<SensorReading>()?;

    let (_subscription, mut stream) = subscriber.subscribe_stream().await?;
    println!("listening on {address} (ctrl-c to stop)");

    loop {
        tokio::select! {
            notification = stream.next() => match notification {
                Some(Notification::Next(reading)) => println!(
                    "[{}] {} {:?}: {:.1} {}",
                    reading.timestamp_ms, reading.sensor, reading.kind, reading.value, reading.unit
                ),
                Some(Notification::Error(err)) => {
                    eprintln!("channel failed: {err}");
                    break;
                }
                Some(Notification::Completed) | None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    subscriber.dispose();
    Ok(())
}
