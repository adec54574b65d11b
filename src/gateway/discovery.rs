//! # Serial Device Discovery
//!
//! Resolves the relay's serial device path, in order:
//!
//! 1. `serial.port`, if that path exists
//! 2. the first line of `serial.context_file` starting with a device pattern
//! 3. the first (sorted) filesystem entry matching a device pattern
//!
//! Patterns are path prefixes such as `/dev/ttyACM`.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{Result, TelemetryError};

/// Find the serial device to read from
///
/// # Errors
///
/// Returns `TelemetryError::SerialPortNotFound` listing what was tried.
pub fn discover_serial_port(config: &SerialConfig) -> Result<String> {
    let mut tried = Vec::new();

    if let Some(port) = config.port.as_deref().filter(|p| !p.is_empty()) {
        if Path::new(port).exists() {
            info!("Using configured serial port {}", port);
            return Ok(port.to_string());
        }
        warn!("Configured serial port {} does not exist", port);
        tried.push(port.to_string());
    }

    if let Some(context) = config.context_file.as_deref() {
        match from_context_file(Path::new(context), &config.device_patterns) {
            Some(port) => {
                info!("Using serial port {} from {}", port, context);
                return Ok(port);
            }
            None => tried.push(context.to_string()),
        }
    }

    let found = scan_patterns(&config.device_patterns);
    if let Some(port) = found.into_iter().next() {
        info!("Auto-detected serial port {}", port);
        return Ok(port);
    }
    tried.extend(config.device_patterns.iter().map(|p| format!("{}*", p)));

    Err(TelemetryError::SerialPortNotFound(tried.join(", ")))
}

/// First line of `path` that starts with one of `patterns`
pub fn from_context_file(path: &Path, patterns: &[String]) -> Option<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!("Cannot read context file {}: {}", path.display(), e);
            return None;
        }
    };

    contents
        .lines()
        .map(str::trim)
        .find(|line| patterns.iter().any(|p| line.starts_with(p.as_str())))
        .map(str::to_string)
}

/// Every existing path matching a pattern prefix, sorted
pub fn scan_patterns(patterns: &[String]) -> Vec<String> {
    let mut found = Vec::new();

    for pattern in patterns {
        let (dir, prefix) = match pattern.rfind('/') {
            Some(idx) => (&pattern[..=idx], &pattern[idx + 1..]),
            None => ("./", pattern.as_str()),
        };
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) {
                found.push(format!("{}{}", dir, name));
            }
        }
    }

    found.sort();
    found.dedup();
    found
}
