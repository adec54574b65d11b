//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Hardware constants (addresses, frequency, transmit power, sleep interval)
//! live here and are handed to the node and relay at initialization.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};
use crate::hal::RadioSettings;
use crate::packet::protocol::DEFAULT_NETWORK_ID;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub aux_power: AuxPowerConfig,
}

/// Which sensor a node build carries (never both)
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Temperature + humidity sensor
    TempHumidity,
    /// Capacitive soil-moisture probe
    SoilMoisture,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::TempHumidity => "temp_humidity",
            SensorKind::SoilMoisture => "soil_moisture",
        }
    }
}

/// Relay forwarding variant
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Splice link quality and forward, nothing else
    PassThrough,
    /// Additionally emit a human-readable summary line per packet
    Diagnostic,
}

/// Sensor node configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_network_id")]
    pub network_id: u8,

    #[serde(default = "default_node_address")]
    pub address: u8,

    #[serde(default = "default_relay_address")]
    pub relay_address: u8,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_sensor_kind")]
    pub sensor_kind: SensorKind,

    #[serde(default = "default_sleep_interval_ms")]
    pub sleep_interval_ms: u64,

    #[serde(default = "default_max_sleep_chunk_ms")]
    pub max_sleep_chunk_ms: u32,

    #[serde(default = "default_frequency_mhz")]
    pub frequency_mhz: f32,

    #[serde(default = "default_tx_power_dbm")]
    pub tx_power_dbm: i8,

    #[serde(default)]
    pub debug_signals: bool,

    #[serde(default = "default_adc_reference_v")]
    pub adc_reference_v: f32,

    #[serde(default = "default_adc_resolution_bits")]
    pub adc_resolution_bits: u8,

    #[serde(default = "default_battery_divider_ratio")]
    pub battery_divider_ratio: f32,

    #[serde(default)]
    pub gps_latitude: Option<f64>,

    #[serde(default)]
    pub gps_longitude: Option<f64>,
}

/// Relay node configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_network_id")]
    pub network_id: u8,

    #[serde(default = "default_relay_address")]
    pub address: u8,

    #[serde(default = "default_node_address")]
    pub expected_source: u8,

    #[serde(default = "default_relay_mode")]
    pub mode: RelayMode,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,

    #[serde(default = "default_frequency_mhz")]
    pub frequency_mhz: f32,

    #[serde(default = "default_tx_power_dbm")]
    pub tx_power_dbm: i8,
}

/// Gateway serial input configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub context_file: Option<String>,

    #[serde(default = "default_device_patterns")]
    pub device_patterns: Vec<String>,

    #[serde(default = "default_reconnect_max_backoff_s")]
    pub reconnect_max_backoff_s: u64,
}

/// Telemetry store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_s")]
    pub flush_interval_s: u64,

    /// Readings held in memory while the store is unreachable
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

/// Ingest gateway configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default)]
    pub default_latitude: Option<f64>,

    #[serde(default)]
    pub default_longitude: Option<f64>,

    #[serde(default = "default_clock_resync_tolerance_s")]
    pub clock_resync_tolerance_s: u64,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

/// Auxiliary power duty-cycle settings.
///
/// Consumed by an external control loop. Because of how the relay is wired,
/// `uptime_mins` is the time the relay is commanded ON and `downtime_mins`
/// the time it is commanded OFF, which is the opposite of what the powered
/// equipment sees. Keep this mapping as is.
#[derive(Debug, Deserialize, Clone)]
pub struct AuxPowerConfig {
    #[serde(default)]
    pub device_address: Option<String>,

    #[serde(default = "default_aux_password")]
    pub password: String,

    #[serde(default)]
    pub uptime_mins: f64,

    #[serde(default)]
    pub downtime_mins: f64,
}

/// Command sent to the auxiliary relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
}

/// Resolved auxiliary duty cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DutyCycle {
    pub device_address: String,
    pub password: u16,
    pub uptime: Duration,
    pub downtime: Duration,
}

impl DutyCycle {
    /// Shortest phase the control loop will schedule
    pub const MIN_PHASE: Duration = Duration::from_millis(100);

    /// Phases in execution order: ON for `uptime`, then OFF for `downtime`
    pub fn phases(&self) -> [(RelayCommand, Duration); 2] {
        [(RelayCommand::On, self.uptime), (RelayCommand::Off, self.downtime)]
    }
}

// Default value functions
fn default_network_id() -> u8 { DEFAULT_NETWORK_ID }
fn default_node_address() -> u8 { 1 }
fn default_relay_address() -> u8 { 2 }
fn default_sensor_kind() -> SensorKind { SensorKind::SoilMoisture }
fn default_sleep_interval_ms() -> u64 { 15 * 60 * 1000 }
fn default_max_sleep_chunk_ms() -> u32 { 16_000 }
fn default_frequency_mhz() -> f32 { 915.0 }
fn default_tx_power_dbm() -> i8 { 20 }
fn default_adc_reference_v() -> f32 { 3.3 }
fn default_adc_resolution_bits() -> u8 { 10 }
fn default_battery_divider_ratio() -> f32 { 2.0 }

fn default_relay_mode() -> RelayMode { RelayMode::PassThrough }
fn default_poll_interval_ms() -> u32 { 5 }

fn default_baud_rate() -> u32 { 115_200 }
fn default_device_patterns() -> Vec<String> {
    vec![
        "/dev/ttyACM".to_string(),
        "/dev/ttyUSB".to_string(),
        "/dev/serial/by-id/".to_string(),
    ]
}
fn default_reconnect_max_backoff_s() -> u64 { 30 }

fn default_database_url() -> String { "./data/telemetry.db".to_string() }
fn default_batch_size() -> usize { 5000 }
fn default_flush_interval_s() -> u64 { 90 }
fn default_max_pending() -> usize { 100_000 }

fn default_clock_resync_tolerance_s() -> u64 { 300 }

fn default_aux_password() -> String { "1234".to_string() }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            address: default_node_address(),
            relay_address: default_relay_address(),
            name: None,
            sensor_kind: default_sensor_kind(),
            sleep_interval_ms: default_sleep_interval_ms(),
            max_sleep_chunk_ms: default_max_sleep_chunk_ms(),
            frequency_mhz: default_frequency_mhz(),
            tx_power_dbm: default_tx_power_dbm(),
            debug_signals: false,
            adc_reference_v: default_adc_reference_v(),
            adc_resolution_bits: default_adc_resolution_bits(),
            battery_divider_ratio: default_battery_divider_ratio(),
            gps_latitude: None,
            gps_longitude: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            address: default_relay_address(),
            expected_source: default_node_address(),
            mode: default_relay_mode(),
            poll_interval_ms: default_poll_interval_ms(),
            frequency_mhz: default_frequency_mhz(),
            tx_power_dbm: default_tx_power_dbm(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            context_file: None,
            device_patterns: default_device_patterns(),
            reconnect_max_backoff_s: default_reconnect_max_backoff_s(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            batch_size: default_batch_size(),
            flush_interval_s: default_flush_interval_s(),
            max_pending: default_max_pending(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_latitude: None,
            default_longitude: None,
            clock_resync_tolerance_s: default_clock_resync_tolerance_s(),
        }
    }
}

impl Default for AuxPowerConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            password: default_aux_password(),
            uptime_mins: 0.0,
            downtime_mins: 0.0,
        }
    }
}

impl NodeConfig {
    pub fn radio_settings(&self) -> RadioSettings {
        RadioSettings {
            frequency_mhz: self.frequency_mhz,
            tx_power_dbm: self.tx_power_dbm,
            address: self.address,
            network_id: self.network_id,
        }
    }
}

impl RelayConfig {
    pub fn radio_settings(&self) -> RadioSettings {
        RadioSettings {
            frequency_mhz: self.frequency_mhz,
            tx_power_dbm: self.tx_power_dbm,
            address: self.address,
            network_id: self.network_id,
        }
    }
}

impl StoreConfig {
    /// Filesystem path of the SQLite database, with any `sqlite://` prefix removed
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url)
    }
}

impl AuxPowerConfig {
    /// Relay password as a 16-bit code; accepts decimal or `0x` hex, falling
    /// back to the factory default 1234 when unparseable
    pub fn password_code(&self) -> u16 {
        let text = self.password.trim();
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => text.parse::<u32>().ok(),
        };
        parsed.map(|v| (v & 0xFFFF) as u16).unwrap_or(0x04D2)
    }

    /// The duty cycle, or `None` when disabled (no device, or a zero duration)
    pub fn duty_cycle(&self) -> Option<DutyCycle> {
        let device_address = self.device_address.clone().filter(|a| !a.is_empty())?;
        if self.uptime_mins <= 0.0 || self.downtime_mins <= 0.0 {
            return None;
        }
        let phase = |mins: f64| Duration::from_secs_f64(mins * 60.0).max(DutyCycle::MIN_PHASE);
        Some(DutyCycle {
            device_address,
            password: self.password_code(),
            uptime: phase(self.uptime_mins),
            downtime: phase(self.downtime_mins),
        })
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lora_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (`DATABASE_URL`, `SERIAL_PORT`, `SERIAL_BAUD`)
    ///
    /// `lookup` is normally `|key| std::env::var(key).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.store.database_url = url;
        }
        if let Some(port) = lookup("SERIAL_PORT").filter(|v| !v.is_empty()) {
            self.serial.port = Some(port);
        }
        if let Some(baud) = lookup("SERIAL_BAUD") {
            self.serial.baud_rate = baud
                .trim()
                .parse()
                .map_err(|_| invalid(format!("SERIAL_BAUD is not a number: {}", baud)))?;
        }
        self.validate()
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Node addressing
        if self.node.address == self.node.relay_address {
            return Err(invalid("node address must differ from relay_address"));
        }
        if self.relay.address == self.relay.expected_source {
            return Err(invalid("relay address must differ from expected_source"));
        }

        // Radio parameters
        for (name, freq) in [("node", self.node.frequency_mhz), ("relay", self.relay.frequency_mhz)] {
            if !(137.0..=1020.0).contains(&freq) {
                return Err(invalid(format!("{} frequency_mhz must be between 137 and 1020", name)));
            }
        }
        for (name, power) in [("node", self.node.tx_power_dbm), ("relay", self.relay.tx_power_dbm)] {
            if !(5..=23).contains(&power) {
                return Err(invalid(format!("{} tx_power_dbm must be between 5 and 23", name)));
            }
        }

        // Power scheduling
        if self.node.sleep_interval_ms == 0 {
            return Err(invalid("sleep_interval_ms must be greater than 0"));
        }
        if self.node.max_sleep_chunk_ms == 0 || self.node.max_sleep_chunk_ms > 60_000 {
            return Err(invalid("max_sleep_chunk_ms must be between 1 and 60000"));
        }

        // Battery ADC calibration
        if !(8..=16).contains(&self.node.adc_resolution_bits) {
            return Err(invalid("adc_resolution_bits must be between 8 and 16"));
        }
        if self.node.adc_reference_v <= 0.0 || self.node.battery_divider_ratio <= 0.0 {
            return Err(invalid("adc_reference_v and battery_divider_ratio must be positive"));
        }

        if let Some(name) = &self.node.name {
            if name.is_empty() || name.len() > 32 {
                return Err(invalid("node name must be 1 to 32 characters"));
            }
        }

        validate_coordinates("node", self.node.gps_latitude, self.node.gps_longitude)?;
        validate_coordinates(
            "gateway default",
            self.gateway.default_latitude,
            self.gateway.default_longitude,
        )?;

        // Relay polling must stay short or packets are missed
        if self.relay.poll_interval_ms == 0 || self.relay.poll_interval_ms > 50 {
            return Err(invalid("poll_interval_ms must be between 1 and 50"));
        }

        // Serial
        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }
        if self.serial.device_patterns.iter().any(|p| p.is_empty()) {
            return Err(invalid("device_patterns cannot contain empty entries"));
        }
        if self.serial.reconnect_max_backoff_s == 0 || self.serial.reconnect_max_backoff_s > 600 {
            return Err(invalid("reconnect_max_backoff_s must be between 1 and 600"));
        }

        // Store
        if self.store.database_path().is_empty() {
            return Err(invalid("database_url cannot be empty"));
        }
        if self.store.batch_size == 0 {
            return Err(invalid("batch_size must be greater than 0"));
        }
        if self.store.flush_interval_s == 0 || self.store.flush_interval_s > 3600 {
            return Err(invalid("flush_interval_s must be between 1 and 3600"));
        }
        if self.store.max_pending < self.store.batch_size {
            return Err(invalid("max_pending must be at least batch_size"));
        }

        if self.gateway.clock_resync_tolerance_s == 0 {
            return Err(invalid("clock_resync_tolerance_s must be greater than 0"));
        }

        if self.aux_power.uptime_mins < 0.0 || self.aux_power.downtime_mins < 0.0 {
            return Err(invalid("aux_power durations cannot be negative"));
        }

        Ok(())
    }
}

fn validate_coordinates(name: &str, latitude: Option<f64>, longitude: Option<f64>) -> Result<()> {
    match (latitude, longitude) {
        (None, None) => Ok(()),
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(invalid(format!("{} coordinates out of range", name)));
            }
            Ok(())
        }
        _ => Err(invalid(format!("{} latitude and longitude must be set together", name))),
    }
}
