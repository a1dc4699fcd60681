//! Sensor readings and alerts multiplexed over one in-process address.
//!
//! Two typed channels share a single producer and consumer socket. Each
//! channel's observers only see their own type.
//!
//! Run with: cargo run --example sensor_multicast
//! Use `RUST_LOG=mom_multicast=debug` to watch endpoint setup.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

mod common;

use common::{Alert, ReadingKind, SensorReading};
use mom_multicast::{ChannelBuilder, EndpointRegistry, Notification, Result};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let registry = EndpointRegistry::new();

    let readings = ChannelBuilder::new()
        .address("inproc://env-sensor")
        .registry(registry.clone())
        .diagnostics(|line| println!("[diag] {line}"))
        .multicast::<SensorReading>()?;

    let alerts = ChannelBuilder::new()
        .address("inproc://env-sensor")
        .registry(registry.clone())
        .multicast::<Alert>()?;

    let _printer = readings
        .subscribe_next(|reading| {
            println!(
                "{} {:?}: {:.1} {}",
                reading.sensor, reading.kind, reading.value, reading.unit
            );
        })
        .await?;
    let (_alert_subscription, mut alert_stream) = alerts.subscribe_stream().await?;

    println!(
        "registry holds {} endpoints for two channels",
        registry.endpoint_count()
    );

    for (kind, value) in [
        (ReadingKind::Temperature, 21.5),
        (ReadingKind::Humidity, 55.0),
        (ReadingKind::Pressure, 101.3),
        (ReadingKind::Temperature, 31.0),
    ] {
        let reading = SensorReading::new("env-sensor-42", kind, value);
        if matches!(kind, ReadingKind::Temperature) && value > 30.0 {
            alerts
                .push(&Alert {
                    sensor: reading.sensor.clone(),
                    message: format!("temperature {value:.1} C above limit"),
                })
                .await?;
        }
        readings.push(&reading).await?;
    }

    if let Some(Notification::Next(alert)) = alert_stream.recv().await {
        println!("ALERT from {}: {}", alert.sensor, alert.message);
    }

    // Give the receive worker a moment to print the last reading.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    readings.complete().await?;
    alerts.dispose();
    readings.dispose();

    println!("endpoints after dispose: {}", registry.endpoint_count());
    Ok(())
}
