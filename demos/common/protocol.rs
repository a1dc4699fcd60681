use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Topic names shared by the publisher and subscriber binaries.
pub const READINGS_TOPIC: &str = "env-sensor.readings";
pub const ALERTS_TOPIC: &str = "env-sensor.alerts";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    // ---
    pub sensor: String,
    pub kind: ReadingKind,
    pub value: f32,
    pub unit: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ReadingKind {
    Temperature,
    Humidity,
    Pressure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub sensor: String,
    pub message: String,
}

impl SensorReading {
    pub fn new(sensor: &str, kind: ReadingKind, value: f32) -> Self {
        // ---
        let unit = match kind {
            ReadingKind::Temperature => "C",
            ReadingKind::Humidity => "%",
            ReadingKind::Pressure => "kPa",
        };
        Self {
            sensor: sensor.to_string(),
            kind,
            value,
            unit: unit.to_string(),
            timestamp_ms: current_time_ms(),
        }
    }
}

pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
