//! # Record Encoder
//!
//! Serializes a [`SensorRecord`] into the fixed-schema textual wire format.
//!
//! Every field is always present; unavailable values are written as `null`.
//! Numeric precision is fixed per field:
//!
//! | Field | Format |
//! |-------|--------|
//! | `battery_v` | 3 decimals |
//! | `temperature_c`, `humidity_pct` | 2 decimals |
//! | `capacitance_val` | integer |
//! | `gps_lat`, `gps_long` | 7 decimals |
//!
//! The record is written into a bounded buffer. If it does not fit, a minimal
//! fallback record flagged `"error":"overflow"` is produced instead; a
//! truncated record could still parse, with the wrong values.

use std::fmt::{self, Write};

use tracing::warn;

use super::protocol::*;
use super::record::SensorRecord;
use crate::error::{Result, TelemetryError};

/// Fixed-capacity text buffer; writes past the capacity fail
struct BoundedBuffer {
    text: String,
    capacity: usize,
}

impl BoundedBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity),
            capacity,
        }
    }
}

impl Write for BoundedBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.text.len() + s.len() > self.capacity {
            return Err(fmt::Error);
        }
        self.text.push_str(s);
        Ok(())
    }
}

/// Bytes ready for the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub bytes: Vec<u8>,
    /// The record did not fit and `bytes` hold the overflow fallback
    pub overflowed: bool,
}

/// Encode a record for transmission, substituting the overflow fallback when
/// the record does not fit in [`RECORD_BUFFER_SIZE`].
///
/// # Examples
///
/// ```
/// use lora_telemetry::packet::encoder::encode_record;
/// use lora_telemetry::packet::record::{Measurement, SensorRecord};
///
/// let record = SensorRecord {
///     net: 165,
///     sensor_id: 1,
///     name: None,
///     sequence: 5,
///     uptime_ms: 1000,
///     measurement: Measurement { battery_v: Some(4.271), ..Default::default() },
///     gps: None,
/// };
/// let encoded = encode_record(&record);
/// assert!(!encoded.overflowed);
/// assert!(encoded.bytes.starts_with(br#"{"net":165,"sensor_id":1,"#));
/// ```
pub fn encode_record(record: &SensorRecord) -> EncodedRecord {
    match encode_record_bounded(record, RECORD_BUFFER_SIZE) {
        Ok(text) => EncodedRecord {
            bytes: text.into_bytes(),
            overflowed: false,
        },
        Err(e) => {
            warn!(
                "Record for sensor {} seq {} overflowed: {}; sending fallback",
                record.sensor_id, record.sequence, e
            );
            EncodedRecord {
                bytes: encode_overflow_record(record).into_bytes(),
                overflowed: true,
            }
        }
    }
}

/// Encode a record into a buffer of `capacity` bytes
///
/// # Errors
///
/// Returns `TelemetryError::Encode` if the record does not fit
pub fn encode_record_bounded(record: &SensorRecord, capacity: usize) -> Result<String> {
    let mut buf = BoundedBuffer::with_capacity(capacity);
    write_record(&mut buf, record).map_err(|_| {
        TelemetryError::Encode(format!("record exceeds {} byte buffer", capacity))
    })?;
    Ok(buf.text)
}

/// Minimal record sent in place of one that overflowed the buffer
pub fn encode_overflow_record(record: &SensorRecord) -> String {
    format!(
        "{{\"{}\":{},\"{}\":{},\"{}\":{},\"{}\":\"{}\"}}",
        FIELD_NET,
        record.net,
        FIELD_SENSOR_ID,
        record.sensor_id,
        FIELD_SEQUENCE,
        record.sequence,
        FIELD_ERROR,
        OVERFLOW_ERROR
    )
}

fn write_record(buf: &mut impl Write, record: &SensorRecord) -> fmt::Result {
    let m = &record.measurement;

    write!(buf, "{{\"{}\":{}", FIELD_NET, record.net)?;
    write!(buf, ",\"{}\":{}", FIELD_SENSOR_ID, record.sensor_id)?;
    write!(buf, ",\"{}\":", FIELD_NAME)?;
    match &record.name {
        Some(name) => {
            let quoted = serde_json::to_string(name).map_err(|_| fmt::Error)?;
            buf.write_str(&quoted)?;
        }
        None => buf.write_str(NULL_TOKEN)?,
    }
    write!(buf, ",\"{}\":{}", FIELD_SEQUENCE, record.sequence)?;
    write!(buf, ",\"{}\":{}", FIELD_UPTIME_MS, record.uptime_ms)?;
    write_decimal(buf, FIELD_BATTERY_V, m.battery_v.map(f64::from), 3)?;
    write_decimal(buf, FIELD_TEMPERATURE_C, m.temperature_c.map(f64::from), 2)?;
    write_decimal(buf, FIELD_HUMIDITY_PCT, m.humidity_pct.map(f64::from), 2)?;
    write!(buf, ",\"{}\":", FIELD_CAPACITANCE_VAL)?;
    match m.capacitance_val {
        Some(value) => write!(buf, "{}", value)?,
        None => buf.write_str(NULL_TOKEN)?,
    }
    write_decimal(buf, FIELD_GPS_LAT, record.gps.map(|g| g.latitude), 7)?;
    write_decimal(buf, FIELD_GPS_LONG, record.gps.map(|g| g.longitude), 7)?;
    buf.write_char('}')
}

/// Write `,"key":<value with fixed decimals>` or `,"key":null`.
///
/// Non-finite values have no JSON representation and are written as null.
fn write_decimal(buf: &mut impl Write, key: &str, value: Option<f64>, decimals: usize) -> fmt::Result {
    write!(buf, ",\"{}\":", key)?;
    match value {
        Some(v) if v.is_finite() => write!(buf, "{:.*}", decimals, v),
        _ => buf.write_str(NULL_TOKEN),
    }
}
