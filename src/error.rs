//! # Error Types
//!
//! Custom error types for the telemetry pipeline using `thiserror`.

use thiserror::Error;

use crate::hal::{RadioError, SensorError, SleepError};

/// Main error type for the telemetry pipeline
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Radio could not be brought up at boot (fatal for a node)
    #[error("Radio initialization failed: {0}")]
    RadioInit(String),

    /// Radio errors after initialization
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// Analog sensor errors
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    /// Low-power timer errors
    #[error("Sleep error: {0}")]
    Sleep(#[from] SleepError),

    /// Record encoding errors
    #[error("Encode error: {0}")]
    Encode(String),

    /// Serial communication errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No usable serial device found
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Telemetry store errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ingest queue errors
    #[error("Queue error: {0}")]
    Queue(String),
}

/// Result type alias for the telemetry pipeline
pub type Result<T> = std::result::Result<T, TelemetryError>;
