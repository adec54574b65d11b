//! # Stable Hardware Identity
//!
//! Maps a transmitter name to the store's hardware id:
//! `1000 + (crc32(name) & 0x7FFF_FFFF)`.
//!
//! **CRC**: CRC-32/IEEE, reflected polynomial 0xEDB88320, init and final XOR
//! 0xFFFFFFFF.

/// Reflected CRC-32 polynomial
const CRC32_POLY: u32 = 0xEDB8_8320;

/// Precomputed CRC-32 lookup table
const CRC32_TABLE: [u32; 256] = generate_crc32_table();

/// Smallest hardware id handed out
pub const HARDWARE_ID_BASE: i64 = 1000;

const fn generate_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;

        while j < 8 {
            if (crc & 1) != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// CRC-32/IEEE of `data`
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;

    for &byte in data {
        crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize];
    }

    crc ^ 0xFFFF_FFFF
}

/// Hardware id for a transmitter name
///
/// # Examples
///
/// ```
/// use lora_telemetry::gateway::identity::stable_hardware_id;
///
/// assert_eq!(stable_hardware_id("tx-1"), stable_hardware_id("tx-1"));
/// assert!(stable_hardware_id("tx-1") >= 1000);
/// ```
pub fn stable_hardware_id(name: &str) -> i64 {
    HARDWARE_ID_BASE + (crc32(name.as_bytes()) & 0x7FFF_FFFF) as i64
}
