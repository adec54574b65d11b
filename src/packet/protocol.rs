//! # Wire Protocol Constants
//!
//! Field names, buffer bounds and addressing helpers shared by every stage.

/// Largest payload one LoRa frame carries after the 4-byte link header
pub const RADIO_MAX_PAYLOAD: usize = 251;

/// Size of the node's record buffer
pub const RECORD_BUFFER_SIZE: usize = 240;

/// Network id used by the reference deployment
pub const DEFAULT_NETWORK_ID: u8 = 165;

/// Wire field names, in emission order
pub const FIELD_NET: &str = "net";
pub const FIELD_SENSOR_ID: &str = "sensor_id";
pub const FIELD_NAME: &str = "name";
pub const FIELD_SEQUENCE: &str = "sequence";
pub const FIELD_UPTIME_MS: &str = "uptime_ms";
pub const FIELD_BATTERY_V: &str = "battery_v";
pub const FIELD_TEMPERATURE_C: &str = "temperature_c";
pub const FIELD_HUMIDITY_PCT: &str = "humidity_pct";
pub const FIELD_CAPACITANCE_VAL: &str = "capacitance_val";
pub const FIELD_GPS_LAT: &str = "gps_lat";
pub const FIELD_GPS_LONG: &str = "gps_long";

/// Field appended by the relay
pub const FIELD_RSSI_DBM: &str = "rssi_dbm";

/// Field and value marking an encode-overflow fallback record
pub const FIELD_ERROR: &str = "error";
pub const OVERFLOW_ERROR: &str = "overflow";

/// Literal written for unavailable values
pub const NULL_TOKEN: &str = "null";

/// Correlation id carried in the link header.
///
/// Deliberately wraps: it only has to disambiguate packets within a short
/// debugging window.
pub fn correlation_id(sequence: u32) -> u8 {
    (sequence % 256) as u8
}
