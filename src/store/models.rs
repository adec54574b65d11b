//! Row types exchanged with the telemetry store.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A sensor identity to create or refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpsert {
    pub hardware_id: i64,
    pub name: String,
    pub sensor_type: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub metadata: Value,
}

/// A stored sensor identity
pub type SensorRow = SensorUpsert;

/// A reading to insert; `ts` is the derived wall-clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    pub sensor_id: i64,
    pub ts: DateTime<Utc>,
    pub sequence: Option<i64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub capacitance_val: Option<i64>,
    pub battery_v: Option<f64>,
    pub rssi_dbm: Option<i32>,
}

/// A reading as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    #[serde(flatten)]
    pub reading: NewReading,
}

/// Outcome of one batch write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Distinct sensors created or refreshed
    pub sensors: usize,
    /// Readings newly stored
    pub inserted: usize,
    /// Readings ignored because (sensor, ts) already existed
    pub duplicates: usize,
}

impl FlushReport {
    pub fn merge(&mut self, other: FlushReport) {
        self.sensors += other.sensors;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
    }
}

/// Timestamp column value (unix milliseconds)
pub(crate) fn ts_to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn ts_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
