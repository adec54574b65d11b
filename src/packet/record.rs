//! # Record Types
//!
//! [`SensorRecord`] is what a node builds each cycle; [`WireRecord`] is what the
//! gateway reads back from a forwarded line (including the relay's `rssi_dbm`).

use serde::{Deserialize, Serialize};

/// Readings from one measurement cycle.
///
/// Every field is optional: a failed or absent sensor degrades to `None`
/// instead of aborting the cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    /// Battery voltage in volts
    pub battery_v: Option<f32>,
    /// Air temperature in °C
    pub temperature_c: Option<f32>,
    /// Relative humidity in percent
    pub humidity_pct: Option<f32>,
    /// Raw capacitive soil-moisture count
    pub capacitance_val: Option<u32>,
}

/// Fixed GPS position of a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Record produced by a sensor node for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub net: u8,
    pub sensor_id: u8,
    pub name: Option<String>,
    pub sequence: u32,
    /// Milliseconds since boot; the node has no wall clock
    pub uptime_ms: u64,
    pub measurement: Measurement,
    pub gps: Option<GpsFix>,
}

/// Record as parsed from a forwarded line.
///
/// Unknown fields are ignored so older and newer firmware can share a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub net: u32,
    pub sensor_id: u32,
    pub name: Option<String>,
    pub sensor_type: Option<String>,
    pub sequence: Option<u32>,
    pub uptime_ms: Option<u64>,
    pub battery_v: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub capacitance_val: Option<i64>,
    pub gps_lat: Option<f64>,
    pub gps_long: Option<f64>,
    pub rssi_dbm: Option<i32>,
    pub error: Option<String>,
}

impl WireRecord {
    /// Display name of the transmitter, falling back to `tx-<sensor_id>`
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("tx-{}", self.sensor_id),
        }
    }
}
