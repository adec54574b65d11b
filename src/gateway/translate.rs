//! Record to store-row translation.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::identity::stable_hardware_id;
use crate::config::{GatewayConfig, SensorKind};
use crate::packet::record::WireRecord;
use crate::store::models::{NewReading, SensorUpsert};

/// Sensor identity for a record.
///
/// Coordinates come from the record when it carries both, otherwise from
/// the configured defaults.
pub fn sensor_for(record: &WireRecord, defaults: &GatewayConfig) -> SensorUpsert {
    let name = record.display_name();
    let (gps_latitude, gps_longitude) = match (record.gps_lat, record.gps_long) {
        (Some(lat), Some(long)) => (Some(lat), Some(long)),
        _ => (defaults.default_latitude, defaults.default_longitude),
    };

    SensorUpsert {
        hardware_id: stable_hardware_id(&name),
        name,
        sensor_type: sensor_type_of(record),
        gps_latitude,
        gps_longitude,
        metadata: json!({ "source": "radio", "net": record.net }),
    }
}

/// Type tag: the record's own, else inferred from the measurement family it
/// carries. `None` when a record has neither.
fn sensor_type_of(record: &WireRecord) -> Option<String> {
    if let Some(tag) = record.sensor_type.as_deref().filter(|t| !t.is_empty()) {
        return Some(tag.to_string());
    }
    let kind = if record.capacitance_val.is_some() {
        SensorKind::SoilMoisture
    } else if record.temperature_c.is_some() || record.humidity_pct.is_some() {
        SensorKind::TempHumidity
    } else {
        return None;
    };
    Some(kind.as_str().to_string())
}

/// Reading row for a record stamped at `ts`
pub fn reading_for(record: &WireRecord, hardware_id: i64, ts: DateTime<Utc>) -> NewReading {
    NewReading {
        sensor_id: hardware_id,
        ts,
        sequence: record.sequence.map(i64::from),
        temperature_c: record.temperature_c,
        humidity_pct: record.humidity_pct,
        capacitance_val: record.capacitance_val,
        battery_v: record.battery_v,
        rssi_dbm: record.rssi_dbm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(json: &str) -> WireRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_unnamed_sensor_identity() {
        let r = record(r#"{"net":165,"sensor_id":1,"uptime_ms":0}"#);
        let sensor = sensor_for(&r, &GatewayConfig::default());

        assert_eq!(sensor.name, "tx-1");
        assert_eq!(sensor.hardware_id, stable_hardware_id("tx-1"));
        assert_eq!(sensor.sensor_type, None);
        assert_eq!(sensor.metadata, json!({"source": "radio", "net": 165}));
        assert_eq!(sensor.gps_latitude, None);
    }

    #[test]
    fn test_named_sensor_with_type() {
        let r = record(r#"{"net":165,"sensor_id":4,"name":"greenhouse","sensor_type":"temp_humidity","uptime_ms":0}"#);
        let sensor = sensor_for(&r, &GatewayConfig::default());
        assert_eq!(sensor.name, "greenhouse");
        assert_eq!(sensor.hardware_id, stable_hardware_id("greenhouse"));
        assert_eq!(sensor.sensor_type.as_deref(), Some("temp_humidity"));
    }

    #[test]
    fn test_sensor_type_inferred_from_measurements() {
        let soil = record(r#"{"net":165,"sensor_id":1,"uptime_ms":0,"temperature_c":null,"capacitance_val":3016}"#);
        assert_eq!(sensor_for(&soil, &GatewayConfig::default()).sensor_type.as_deref(), Some("soil_moisture"));

        let air = record(r#"{"net":165,"sensor_id":2,"uptime_ms":0,"temperature_c":21.5,"humidity_pct":null}"#);
        assert_eq!(sensor_for(&air, &GatewayConfig::default()).sensor_type.as_deref(), Some("temp_humidity"));
    }

    #[test]
    fn test_gps_falls_back_to_defaults() {
        let defaults = GatewayConfig {
            default_latitude: Some(45.0),
            default_longitude: Some(-122.0),
            ..GatewayConfig::default()
        };
        let without = record(r#"{"net":165,"sensor_id":1,"gps_lat":null,"gps_long":null}"#);
        let sensor = sensor_for(&without, &defaults);
        assert_eq!((sensor.gps_latitude, sensor.gps_longitude), (Some(45.0), Some(-122.0)));

        let with = record(r#"{"net":165,"sensor_id":1,"gps_lat":47.1,"gps_long":-121.9}"#);
        let sensor = sensor_for(&with, &defaults);
        assert_eq!((sensor.gps_latitude, sensor.gps_longitude), (Some(47.1), Some(-121.9)));
    }

    #[test]
    fn test_reading_copies_measurements() {
        let r = record(
            r#"{"net":165,"sensor_id":1,"sequence":5,"uptime_ms":1,"battery_v":4.271,"temperature_c":null,"capacitance_val":3016,"rssi_dbm":-57}"#,
        );
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reading = reading_for(&r, 1234, ts);

        assert_eq!(reading.sensor_id, 1234);
        assert_eq!(reading.ts, ts);
        assert_eq!(reading.sequence, Some(5));
        assert_eq!(reading.battery_v, Some(4.271));
        assert_eq!(reading.temperature_c, None);
        assert_eq!(reading.capacitance_val, Some(3016));
        assert_eq!(reading.rssi_dbm, Some(-57));
    }
}
