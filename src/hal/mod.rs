//! # Hardware Capability Module
//!
//! Trait abstractions for the hardware a node touches, so the node and relay
//! state machines never reach into driver registers directly.
//!
//! This module defines:
//! - [`RadioTransceiver`]: addressed packet radio (init, send, receive, sleep)
//! - [`AnalogSensor`]: per-channel analog readings
//! - [`LowPowerTimer`]: bounded low-power sleep, short delays and uptime
//! - [`StatusIndicator`]: a single status LED used for fatal-error blinking
//!
//! Simulated implementations live in [`sim`].

pub mod sim;

use bytes::Bytes;
use thiserror::Error;

/// Link-layer header carried by every radio frame.
///
/// The relay filters on `network_id` and `from` before looking at the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    /// Deployment tag separating our traffic from co-channel users
    pub network_id: u8,
    /// Destination node address
    pub to: u8,
    /// Source node address
    pub from: u8,
    /// Correlation id (low byte of the sender's sequence counter)
    pub id: u8,
}

/// A frame pulled off the air by a receiving radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    pub header: LinkHeader,
    /// Opaque payload bytes
    pub payload: Bytes,
}

/// Radio parameters applied at initialization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioSettings {
    pub frequency_mhz: f32,
    pub tx_power_dbm: i8,
    pub address: u8,
    pub network_id: u8,
}

/// Errors reported by a radio driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio not detected")]
    NotDetected,
    #[error("frequency rejected by radio")]
    InvalidFrequency,
    #[error("transmission timed out")]
    Timeout,
    #[error("payload of {0} bytes exceeds radio frame")]
    PayloadTooLarge(usize),
    #[error("bus error: {0}")]
    Bus(String),
}

/// Errors reported by an analog sensor channel
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor unavailable")]
    Unavailable,
    #[error("reading out of range: {0}")]
    OutOfRange(f32),
    #[error("bus error: {0}")]
    Bus(String),
}

/// Errors reported by the low-power sleep primitive
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SleepError {
    #[error("low-power sleep not supported in current state")]
    Unsupported,
    #[error("sleep interrupted")]
    Interrupted,
}

/// Analog channels a node can sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    /// Air temperature in °C
    Temperature,
    /// Relative humidity in percent
    Humidity,
    /// Raw capacitive soil-moisture count
    Capacitance,
    /// Raw ADC count on the battery divider pin
    Battery,
}

/// Addressed packet radio
#[cfg_attr(test, mockall::automock)]
pub trait RadioTransceiver {
    /// Bring the radio up with the given settings
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError>;

    /// Queue a frame for transmission; returns once the radio accepted it
    fn send(&mut self, header: LinkHeader, payload: &[u8]) -> Result<(), RadioError>;

    /// Block until the queued frame has left the antenna
    fn wait_packet_sent(&mut self) -> Result<(), RadioError>;

    /// Put the radio into its lowest-power state
    fn sleep(&mut self) -> Result<(), RadioError>;

    /// Put the radio into continuous receive mode
    fn set_mode_rx(&mut self) -> Result<(), RadioError>;

    /// Non-blocking check for a received frame
    fn available(&mut self) -> bool;

    /// Take the received frame, if any
    fn recv(&mut self) -> Option<RadioFrame>;

    /// RSSI of the most recently received frame, in dBm
    fn last_rssi(&self) -> i16;
}

/// Per-channel analog sensor access
#[cfg_attr(test, mockall::automock)]
pub trait AnalogSensor {
    /// Sample one channel
    fn read(&mut self, channel: SensorChannel) -> Result<f32, SensorError>;
}

/// Low-power timing primitives
#[cfg_attr(test, mockall::automock)]
pub trait LowPowerTimer {
    /// Enter low-power sleep for at most `ms` milliseconds.
    ///
    /// Returns the number of milliseconds actually slept, which may be less
    /// than requested (the hardware watchdog bounds each call).
    fn sleep_ms(&mut self, ms: u32) -> Result<u32, SleepError>;

    /// Short active delay, used for LED patterns and relay polling
    fn delay_ms(&mut self, ms: u32);

    /// Milliseconds since boot
    fn millis(&self) -> u64;
}

/// Single status LED
#[cfg_attr(test, mockall::automock)]
pub trait StatusIndicator {
    fn set(&mut self, on: bool);
}
