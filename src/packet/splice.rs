//! # Link-Quality Splice
//!
//! The relay's only modification of a payload: inject `"rssi_dbm":<n>` just
//! before the final closing brace. The payload is treated as opaque bytes and
//! is never parsed here.

use bytes::{BufMut, Bytes, BytesMut};

use super::protocol::FIELD_RSSI_DBM;

/// Outcome of a splice attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spliced {
    /// Link quality injected before the closing brace
    Augmented(Bytes),
    /// No closing brace found; payload returned unchanged
    Unchanged(Bytes),
}

impl Spliced {
    pub fn bytes(&self) -> &Bytes {
        match self {
            Spliced::Augmented(b) | Spliced::Unchanged(b) => b,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Spliced::Augmented(b) | Spliced::Unchanged(b) => b,
        }
    }
}

/// Append the link-quality field to a record payload.
///
/// The last non-whitespace byte must be `}`; trailing whitespace after it is
/// kept. A comma is inserted when the object already has members. Anything
/// else (for example a frame truncated mid-transmission) is returned
/// byte-for-byte unchanged.
///
/// # Examples
///
/// ```
/// use lora_telemetry::packet::splice::append_link_quality;
///
/// let out = append_link_quality(br#"{"net":165}"#, -42);
/// assert_eq!(out.bytes().as_ref(), br#"{"net":165,"rssi_dbm":-42}"#);
/// ```
pub fn append_link_quality(payload: &[u8], rssi_dbm: i16) -> Spliced {
    let Some(close) = closing_brace(payload) else {
        return Spliced::Unchanged(Bytes::copy_from_slice(payload));
    };

    let field = format!("\"{}\":{}", FIELD_RSSI_DBM, rssi_dbm);
    let needs_comma = payload[..close]
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b != b'{');

    let mut out = BytesMut::with_capacity(payload.len() + field.len() + 1);
    out.put_slice(&payload[..close]);
    if needs_comma {
        out.put_u8(b',');
    }
    out.put_slice(field.as_bytes());
    out.put_slice(&payload[close..]);
    Spliced::Augmented(out.freeze())
}

/// Index of the final `}`, provided only whitespace follows it
fn closing_brace(payload: &[u8]) -> Option<usize> {
    let last = payload.iter().rposition(|b| !b.is_ascii_whitespace())?;
    (payload[last] == b'}').then_some(last)
}
