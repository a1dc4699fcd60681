//! Sensor publisher over TCP.
//!
//! Binds the address and publishes a reading every 500ms. Pair it with
//! `sensor_subscriber`, started before or after this binary.
//!
//! Run with: cargo run --example sensor_publisher
//!
//! Environment:
//! - `SENSOR_ADDRESS` (default `tcp://*:5556`)

mod common;

use std::time::Duration;

use common::{ReadingKind, SensorReading, READINGS_TOPIC};
use mom_multicast::{ChannelBuilder, EndpointRegistry, Result};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let address = std::env::var("SENSOR_ADDRESS").unwrap_or_else(|_| "tcp://*:5556".to_string());

    let publisher = ChannelBuilder::new()
        .address(&address)
        .registry(EndpointRegistry::new())
        .topic_name(READINGS_TOPIC)
        .send_high_water_mark(10_000)
        .publisher::<SensorReading>()?;

    publisher.bind().await?;
    println!("publishing on {address} (ctrl-c to stop)");

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut step = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let value = 20.0 + (step % 10) as f32 * 0.5;
                publisher
                    .push(&SensorReading::new("env-sensor-42", ReadingKind::Temperature, value))
                    .await?;
                step += 1;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    publisher.dispose();
    println!("published {step} readings");
    Ok(())
}
