//! # Forwarded Line Parser
//!
//! Turns one line of relay output into a [`WireRecord`], or explains why the
//! line was skipped. Nothing here is an error: the link is lossy and noisy,
//! so unusable lines are simply classified and dropped by the caller.

use super::protocol::OVERFLOW_ERROR;
use super::record::WireRecord;

/// Why a line produced no record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty or whitespace-only line
    Blank,
    /// Relay debug output (`#` prefix)
    Comment,
    /// No `{...}` object on the line
    NotJson,
    /// Object failed to parse as a record
    Malformed(String),
    /// Node reported an encode overflow instead of readings
    Overflow { sensor_id: u32 },
    /// Record lacks the relative timestamp
    Incomplete { sensor_id: u32 },
}

/// Result of parsing one forwarded line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Record(WireRecord),
    Skipped(SkipReason),
}

/// Extract the JSON object text from a forwarded line.
///
/// Accepts a bare `{...}` line and the legacy `<summary> | {...}` form.
pub fn extract_json_text(line: &str) -> Result<&str, SkipReason> {
    let text = line.trim();
    if text.is_empty() {
        return Err(SkipReason::Blank);
    }
    if text.starts_with('#') {
        return Err(SkipReason::Comment);
    }

    let is_object = |t: &str| t.starts_with('{') && t.ends_with('}');
    if is_object(text) {
        return Ok(text);
    }
    if let Some((_, rest)) = text.split_once('|') {
        let rest = rest.trim();
        if is_object(rest) {
            return Ok(rest);
        }
    }
    Err(SkipReason::NotJson)
}

/// Parse one forwarded line
///
/// # Examples
///
/// ```
/// use lora_telemetry::packet::parser::{parse_line, ParsedLine, SkipReason};
///
/// let line = r#"{"net":165,"sensor_id":1,"uptime_ms":5,"rssi_dbm":-57}"#;
/// assert!(matches!(parse_line(line), ParsedLine::Record(_)));
/// assert_eq!(parse_line("# relay up"), ParsedLine::Skipped(SkipReason::Comment));
/// ```
pub fn parse_line(line: &str) -> ParsedLine {
    let text = match extract_json_text(line) {
        Ok(text) => text,
        Err(reason) => return ParsedLine::Skipped(reason),
    };

    let record: WireRecord = match serde_json::from_str(text) {
        Ok(record) => record,
        Err(e) => return ParsedLine::Skipped(SkipReason::Malformed(e.to_string())),
    };

    if record.error.as_deref() == Some(OVERFLOW_ERROR) {
        return ParsedLine::Skipped(SkipReason::Overflow {
            sensor_id: record.sensor_id,
        });
    }
    if record.uptime_ms.is_none() {
        return ParsedLine::Skipped(SkipReason::Incomplete {
            sensor_id: record.sensor_id,
        });
    }

    ParsedLine::Record(record)
}
