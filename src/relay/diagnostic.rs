//! # Diagnostic Summary
//!
//! Human-readable one-line view of a forwarded record. Each field is pulled
//! out independently, so a missing or oddly typed field only blanks that
//! field. The summary is written as a `#` line, which ingestion ignores.

use std::fmt;

use serde_json::Value;

use crate::hal::LinkHeader;
use crate::packet::protocol::{
    FIELD_BATTERY_V, FIELD_HUMIDITY_PCT, FIELD_SEQUENCE, FIELD_TEMPERATURE_C,
};

/// Known numeric fields of interest; `None` when missing or unparseable
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiagnosticFields {
    pub sequence: Option<u64>,
    pub battery_v: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

impl DiagnosticFields {
    /// Extract fields from a raw payload. Never fails: an unparseable payload
    /// yields all-`None`.
    pub fn extract(payload: &[u8]) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(payload) else {
            return Self::default();
        };
        Self {
            sequence: map.get(FIELD_SEQUENCE).and_then(Value::as_u64),
            battery_v: map.get(FIELD_BATTERY_V).and_then(Value::as_f64),
            temperature_c: map.get(FIELD_TEMPERATURE_C).and_then(Value::as_f64),
            humidity_pct: map.get(FIELD_HUMIDITY_PCT).and_then(Value::as_f64),
        }
    }
}

struct Field<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("-"),
        }
    }
}

/// Summary line for a forwarded frame, without trailing newline
pub fn summary_line(header: &LinkHeader, rssi_dbm: i16, fields: &DiagnosticFields) -> String {
    format!(
        "# from={} id={} rssi={} seq={} vbat={} temp={} hum={}",
        header.from,
        header.id,
        rssi_dbm,
        Field(fields.sequence),
        Field(fields.battery_v),
        Field(fields.temperature_c),
        Field(fields.humidity_pct),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: LinkHeader = LinkHeader { network_id: 165, to: 2, from: 1, id: 5 };

    #[test]
    fn test_extract_known_fields() {
        let payload = br#"{"net":165,"sequence":5,"battery_v":4.271,"temperature_c":21.5,"humidity_pct":null,"extra":[1,2]}"#;
        let fields = DiagnosticFields::extract(payload);
        assert_eq!(fields.sequence, Some(5));
        assert_eq!(fields.battery_v, Some(4.271));
        assert_eq!(fields.temperature_c, Some(21.5));
        assert_eq!(fields.humidity_pct, None);
    }

    #[test]
    fn test_wrongly_typed_field_only_blanks_itself() {
        let fields = DiagnosticFields::extract(br#"{"sequence":"five","battery_v":3.9}"#);
        assert_eq!(fields.sequence, None);
        assert_eq!(fields.battery_v, Some(3.9));
    }

    #[test]
    fn test_truncated_payload_yields_defaults() {
        let fields = DiagnosticFields::extract(br#"{"sequence":5,"batt"#);
        assert_eq!(fields, DiagnosticFields::default());
    }

    #[test]
    fn test_summary_line_format() {
        let fields = DiagnosticFields {
            sequence: Some(5),
            battery_v: Some(4.271),
            temperature_c: None,
            humidity_pct: None,
        };
        assert_eq!(
            summary_line(&HEADER, -57, &fields),
            "# from=1 id=5 rssi=-57 seq=5 vbat=4.271 temp=- hum=-"
        );
    }
}
