//! # Sensor Node Module
//!
//! Firmware logic for a battery-powered field node.
//!
//! One cycle runs without preemption:
//!
//! ```text
//! MEASURE -> ENCODE -> TRANSMIT -> RADIO_SLEEP -> DEEP_SLEEP(interval) -> MEASURE
//! ```
//!
//! A node enters `MEASURE` after its radio passes the boot self-check. A radio
//! that fails to initialize halts the node for good; with `debug_signals`
//! enabled the status LED blinks the fatal pattern first.
//!
//! Failures inside a cycle never stop the node: a bad sensor channel becomes a
//! null field, an oversized record becomes the overflow fallback, and a failed
//! transmission is simply not retried (the next cycle is the retry).

pub mod battery;
pub mod power;

use tracing::{debug, error, info, warn};

use crate::config::{NodeConfig, SensorKind};
use crate::error::{Result, TelemetryError};
use crate::hal::{
    AnalogSensor, LinkHeader, LowPowerTimer, RadioTransceiver, SensorChannel, SensorError,
    StatusIndicator,
};
use crate::packet::encoder::encode_record;
use crate::packet::protocol::correlation_id;
use crate::packet::record::{GpsFix, Measurement, SensorRecord};

use battery::BatteryCalibration;
use power::{deep_sleep, signal_fatal, SleepReport};

/// Valid air temperature range in °C
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = -40.0..=125.0;

/// Valid relative humidity range in percent
const HUMIDITY_RANGE: std::ops::RangeInclusive<f32> = 0.0..=100.0;

/// Node state machine states
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    /// Powered up, radio not yet checked
    Boot,
    Measure,
    Encode(Measurement),
    Transmit(Vec<u8>),
    RadioSleep,
    DeepSleep,
    /// Radio initialization failed; terminal
    Halted,
}

/// Counters kept across cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub cycles: u64,
    pub transmitted: u64,
    pub tx_failures: u64,
    pub sensor_failures: u64,
    pub overflows: u64,
}

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sequence: u32,
    pub correlation_id: u8,
    pub payload: Vec<u8>,
    pub transmitted: bool,
    pub sleep: SleepReport,
}

/// Sensor node driven over injected hardware capabilities
pub struct SensorNode<R, A, T, L> {
    config: NodeConfig,
    radio: R,
    sensor: A,
    timer: T,
    led: L,
    battery: BatteryCalibration,
    state: NodeState,
    sequence: u32,
    stats: NodeStats,
    last_tx: Option<(u32, Vec<u8>, bool)>,
    last_sleep: Option<SleepReport>,
}

impl<R, A, T, L> std::fmt::Debug for SensorNode<R, A, T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorNode")
            .field("address", &self.config.address)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl<R, A, T, L> SensorNode<R, A, T, L>
where
    R: RadioTransceiver,
    A: AnalogSensor,
    T: LowPowerTimer,
    L: StatusIndicator,
{
    pub fn new(config: NodeConfig, radio: R, sensor: A, timer: T, led: L) -> Self {
        let battery = BatteryCalibration::from_config(&config);
        Self {
            config,
            radio,
            sensor,
            timer,
            led,
            battery,
            state: NodeState::Boot,
            sequence: 0,
            stats: NodeStats::default(),
            last_tx: None,
            last_sleep: None,
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn sensor(&self) -> &A {
        &self.sensor
    }

    /// Start counting from a given sequence number (e.g. restored from
    /// retained memory)
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Radio self-check.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::RadioInit` and halts the node if the radio
    /// cannot be initialized.
    pub fn boot(&mut self) -> Result<()> {
        match self.radio.init(&self.config.radio_settings()) {
            Ok(()) => {
                info!(
                    "Node {} up on {:.1} MHz at {} dBm, reporting to {} every {} ms",
                    self.config.address,
                    self.config.frequency_mhz,
                    self.config.tx_power_dbm,
                    self.config.relay_address,
                    self.config.sleep_interval_ms
                );
                self.state = NodeState::Measure;
                Ok(())
            }
            Err(e) => {
                error!("Radio init failed on node {}: {}", self.config.address, e);
                self.halt();
                Err(TelemetryError::RadioInit(e.to_string()))
            }
        }
    }

    fn halt(&mut self) {
        self.state = NodeState::Halted;
        if self.config.debug_signals {
            signal_fatal(&mut self.timer, &mut self.led);
        }
    }

    /// Advance the state machine by one state
    ///
    /// # Errors
    ///
    /// Only fails when booting fails or the node is halted.
    pub fn step(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, NodeState::Halted);
        let next = match state {
            NodeState::Boot => {
                self.state = NodeState::Boot;
                return self.boot();
            }
            NodeState::Measure => NodeState::Encode(self.measure()),
            NodeState::Encode(measurement) => NodeState::Transmit(self.encode(measurement)),
            NodeState::Transmit(payload) => {
                self.transmit(payload);
                NodeState::RadioSleep
            }
            NodeState::RadioSleep => {
                if let Err(e) = self.radio.sleep() {
                    warn!("Radio refused to sleep: {}", e);
                }
                NodeState::DeepSleep
            }
            NodeState::DeepSleep => {
                let report = deep_sleep(
                    &mut self.timer,
                    self.config.sleep_interval_ms,
                    self.config.max_sleep_chunk_ms,
                );
                self.last_sleep = Some(report);
                self.stats.cycles += 1;
                NodeState::Measure
            }
            NodeState::Halted => {
                return Err(TelemetryError::RadioInit("node is halted".to_string()));
            }
        };
        self.state = next;
        Ok(())
    }

    /// Run one full cycle, booting first if needed
    ///
    /// # Errors
    ///
    /// Fails only if the node is (or becomes) halted.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        if self.state == NodeState::Boot {
            self.boot()?;
        }
        let started = self.stats.cycles;
        while self.stats.cycles == started {
            self.step()?;
        }

        let sleep = self
            .last_sleep
            .take()
            .ok_or_else(|| TelemetryError::Encode("cycle ended without sleeping".to_string()))?;
        let (sequence, payload, transmitted) = self
            .last_tx
            .take()
            .ok_or_else(|| TelemetryError::Encode("cycle produced no payload".to_string()))?;

        Ok(CycleReport {
            sequence,
            correlation_id: correlation_id(sequence),
            payload,
            transmitted,
            sleep,
        })
    }

    /// Run cycles until the node halts
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.run_cycle()?;
        }
    }

    fn measure(&mut self) -> Measurement {
        let mut m = Measurement {
            battery_v: self
                .read_channel(SensorChannel::Battery)
                .and_then(|raw| self.battery.volts(raw)),
            ..Default::default()
        };

        match self.config.sensor_kind {
            SensorKind::TempHumidity => {
                m.temperature_c = self
                    .read_channel(SensorChannel::Temperature)
                    .and_then(|v| self.in_range(SensorChannel::Temperature, v, &TEMPERATURE_RANGE));
                m.humidity_pct = self
                    .read_channel(SensorChannel::Humidity)
                    .and_then(|v| self.in_range(SensorChannel::Humidity, v, &HUMIDITY_RANGE));
            }
            SensorKind::SoilMoisture => {
                m.capacitance_val = self
                    .read_channel(SensorChannel::Capacitance)
                    .and_then(|v| self.in_range(SensorChannel::Capacitance, v, &(0.0..=u32::MAX as f32)))
                    .map(|v| v.round() as u32);
            }
        }

        debug!("Measured {:?}", m);
        m
    }

    fn read_channel(&mut self, channel: SensorChannel) -> Option<f32> {
        match self.sensor.read(channel) {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats.sensor_failures += 1;
                warn!("{:?} read failed: {}; sending null", channel, e);
                None
            }
        }
    }

    fn in_range(
        &mut self,
        channel: SensorChannel,
        value: f32,
        range: &std::ops::RangeInclusive<f32>,
    ) -> Option<f32> {
        if range.contains(&value) {
            return Some(value);
        }
        self.stats.sensor_failures += 1;
        warn!("{:?} read failed: {}; sending null", channel, SensorError::OutOfRange(value));
        None
    }

    fn encode(&mut self, measurement: Measurement) -> Vec<u8> {
        let gps = match (self.config.gps_latitude, self.config.gps_longitude) {
            (Some(latitude), Some(longitude)) => Some(GpsFix { latitude, longitude }),
            _ => None,
        };
        let record = SensorRecord {
            net: self.config.network_id,
            sensor_id: self.config.address,
            name: self.config.name.clone(),
            sequence: self.sequence,
            uptime_ms: self.timer.millis(),
            measurement,
            gps,
        };

        let encoded = encode_record(&record);
        if encoded.overflowed {
            self.stats.overflows += 1;
        }
        encoded.bytes
    }

    fn transmit(&mut self, payload: Vec<u8>) {
        let sequence = self.sequence;
        let header = LinkHeader {
            network_id: self.config.network_id,
            to: self.config.relay_address,
            from: self.config.address,
            id: correlation_id(sequence),
        };

        let result = self
            .radio
            .send(header, &payload)
            .and_then(|()| self.radio.wait_packet_sent());

        let transmitted = match result {
            Ok(()) => {
                self.stats.transmitted += 1;
                debug!("Sent seq {} ({} bytes) to {}", sequence, payload.len(), header.to);
                true
            }
            Err(e) => {
                self.stats.tx_failures += 1;
                warn!("Transmit of seq {} failed: {}", sequence, e);
                false
            }
        };

        self.sequence = self.sequence.wrapping_add(1);
        self.last_tx = Some((sequence, payload, transmitted));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{ScriptedSensor, SimLed, SimMedium, SimRadio, SimTimer};
    use crate::hal::{MockRadioTransceiver, RadioError};
    use crate::packet::record::WireRecord;
    use mockall::Sequence;

    fn soil_config() -> NodeConfig {
        NodeConfig {
            sleep_interval_ms: 60_000,
            ..NodeConfig::default()
        }
    }

    fn soil_sensor() -> ScriptedSensor {
        ScriptedSensor::new()
            .with(SensorChannel::Battery, 662.0)
            .with(SensorChannel::Capacitance, 3016.4)
    }

    fn sim_node(
        config: NodeConfig,
        sensor: ScriptedSensor,
    ) -> (SensorNode<SimRadio, ScriptedSensor, SimTimer, SimLed>, SimMedium, SimTimer) {
        let medium = SimMedium::new();
        let timer = SimTimer::new(config.max_sleep_chunk_ms);
        let node = SensorNode::new(config, medium.radio(), sensor, timer.clone(), SimLed::new());
        (node, medium, timer)
    }

    #[test]
    fn test_boot_enters_measure() {
        let (mut node, _, _) = sim_node(soil_config(), soil_sensor());
        assert_eq!(node.state(), &NodeState::Boot);
        node.boot().unwrap();
        assert_eq!(node.state(), &NodeState::Measure);
        assert_eq!(node.radio().settings().unwrap().network_id, 165);
    }

    #[test]
    fn test_cycle_walks_every_state() {
        let (mut node, _, _) = sim_node(soil_config(), soil_sensor());
        node.boot().unwrap();

        node.step().unwrap();
        assert!(matches!(node.state(), NodeState::Encode(_)));
        node.step().unwrap();
        assert!(matches!(node.state(), NodeState::Transmit(_)));
        node.step().unwrap();
        assert_eq!(node.state(), &NodeState::RadioSleep);
        node.step().unwrap();
        assert_eq!(node.state(), &NodeState::DeepSleep);
        assert!(node.radio().is_asleep());
    }

    #[test]
    fn test_soil_cycle_transmits_record() {
        let (mut node, medium, timer) = sim_node(soil_config(), soil_sensor());
        let report = node.run_cycle().unwrap();

        assert!(report.transmitted);
        assert_eq!(report.sequence, 0);
        assert_eq!(medium.pending(), 1);
        assert_eq!(report.sleep.slept_ms, 60_000);
        assert_eq!(timer.now_ms(), 60_000);

        let record: WireRecord = serde_json::from_slice(&report.payload).unwrap();
        assert_eq!(record.net, 165);
        assert_eq!(record.sensor_id, 1);
        assert_eq!(record.capacitance_val, Some(3016));
        assert_eq!(record.temperature_c, None);
        assert!((record.battery_v.unwrap() - 4.267).abs() < 0.001);

        let mut relay_radio = medium.radio();
        let frame = relay_radio.recv().unwrap();
        assert_eq!(frame.header.to, 2);
        assert_eq!(frame.header.from, 1);
        assert_eq!(frame.header.id, 0);
        assert_eq!(frame.payload.as_ref(), report.payload.as_slice());
    }

    #[test]
    fn test_temp_humidity_build_reads_only_its_channels() {
        let config = NodeConfig {
            sensor_kind: SensorKind::TempHumidity,
            ..soil_config()
        };
        let sensor = ScriptedSensor::new()
            .with(SensorChannel::Battery, 600.0)
            .with(SensorChannel::Temperature, 21.456)
            .with(SensorChannel::Humidity, 48.2)
            .with(SensorChannel::Capacitance, 999.0);
        let (mut node, _, _) = sim_node(config, sensor);
        let report = node.run_cycle().unwrap();

        assert!(!node.sensor().reads().contains(&SensorChannel::Capacitance));
        let record: WireRecord = serde_json::from_slice(&report.payload).unwrap();
        assert_eq!(record.temperature_c, Some(21.46));
        assert_eq!(record.humidity_pct, Some(48.2));
        assert_eq!(record.capacitance_val, None);
    }

    #[test]
    fn test_sensor_failure_degrades_to_null() {
        let sensor = ScriptedSensor::new()
            .with_failure(SensorChannel::Battery, SensorError::Bus("nack".to_string()))
            .with(SensorChannel::Capacitance, 1200.0);
        let (mut node, medium, _) = sim_node(soil_config(), sensor);
        let report = node.run_cycle().unwrap();

        assert!(report.transmitted);
        assert_eq!(medium.pending(), 1);
        let record: WireRecord = serde_json::from_slice(&report.payload).unwrap();
        assert_eq!(record.battery_v, None);
        assert_eq!(record.capacitance_val, Some(1200));
        assert_eq!(node.stats().sensor_failures, 1);
    }

    #[test]
    fn test_out_of_range_humidity_is_null() {
        let config = NodeConfig {
            sensor_kind: SensorKind::TempHumidity,
            ..soil_config()
        };
        let sensor = ScriptedSensor::new()
            .with(SensorChannel::Battery, 600.0)
            .with(SensorChannel::Temperature, 20.0)
            .with(SensorChannel::Humidity, 130.0);
        let (mut node, _, _) = sim_node(config, sensor);
        let record: WireRecord = serde_json::from_slice(&node.run_cycle().unwrap().payload).unwrap();
        assert_eq!(record.humidity_pct, None);
        assert_eq!(record.temperature_c, Some(20.0));
    }

    #[test]
    fn test_overflow_sends_fallback() {
        let config = NodeConfig {
            name: Some("x".repeat(300)),
            ..soil_config()
        };
        let (mut node, medium, _) = sim_node(config, soil_sensor());
        let report = node.run_cycle().unwrap();

        assert!(report.transmitted);
        assert_eq!(medium.pending(), 1);
        assert_eq!(
            report.payload,
            br#"{"net":165,"sensor_id":1,"sequence":0,"error":"overflow"}"#.to_vec()
        );
        assert_eq!(node.stats().overflows, 1);
    }

    #[test]
    fn test_correlation_id_wraps_with_sequence() {
        let (node, medium, _) = sim_node(soil_config(), soil_sensor());
        let mut node = node.with_sequence(254);
        let mut rx = medium.radio();

        for expected_seq in [254u32, 255, 256, 257] {
            let report = node.run_cycle().unwrap();
            assert_eq!(report.sequence, expected_seq);
            assert_eq!(report.correlation_id as u32, expected_seq % 256);
            assert_eq!(rx.recv().unwrap().header.id as u32, expected_seq % 256);
        }
    }

    #[test]
    fn test_uptime_advances_between_cycles() {
        let (mut node, _, _) = sim_node(soil_config(), soil_sensor());
        let first: WireRecord = serde_json::from_slice(&node.run_cycle().unwrap().payload).unwrap();
        let second: WireRecord = serde_json::from_slice(&node.run_cycle().unwrap().payload).unwrap();
        assert_eq!(first.uptime_ms, Some(0));
        assert_eq!(second.uptime_ms, Some(60_000));
        assert_eq!(second.sequence, Some(1));
    }

    #[test]
    fn test_failed_send_is_not_retried() {
        let mut radio = MockRadioTransceiver::new();
        radio.expect_init().returning(|_| Ok(()));
        radio
            .expect_send()
            .times(1)
            .returning(|_, _| Err(RadioError::Timeout));
        radio.expect_wait_packet_sent().never();
        radio.expect_sleep().times(1).returning(|| Ok(()));

        let timer = SimTimer::new(16_000);
        let mut node = SensorNode::new(soil_config(), radio, soil_sensor(), timer, SimLed::new());
        let report = node.run_cycle().unwrap();

        assert!(!report.transmitted);
        assert_eq!(node.sequence(), 1);
        assert_eq!(node.stats().tx_failures, 1);
        assert_eq!(node.state(), &NodeState::Measure);
    }

    #[test]
    fn test_transmit_then_radio_sleep_order() {
        let mut seq = Sequence::new();
        let mut radio = MockRadioTransceiver::new();
        radio
            .expect_init()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        radio
            .expect_send()
            .withf(|header, _| header.to == 2 && header.id == 5)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        radio
            .expect_wait_packet_sent()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        radio
            .expect_sleep()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let timer = SimTimer::new(16_000);
        let mut node = SensorNode::new(soil_config(), radio, soil_sensor(), timer, SimLed::new())
            .with_sequence(5);
        node.run_cycle().unwrap();
    }

    #[test]
    fn test_radio_init_failure_halts_with_signal_in_debug() {
        let config = NodeConfig {
            debug_signals: true,
            ..soil_config()
        };
        let medium = SimMedium::new();
        let led = SimLed::new();
        let radio = medium.radio().failing_init(RadioError::NotDetected);
        let mut node = SensorNode::new(config, radio, soil_sensor(), SimTimer::new(16_000), led.clone());

        let result = node.run_cycle();
        assert!(matches!(result, Err(TelemetryError::RadioInit(_))));
        assert_eq!(node.state(), &NodeState::Halted);
        assert_eq!(led.states().len(), (power::FATAL_BLINK_COUNT * 2) as usize);

        // halted for good
        assert!(node.step().is_err());
        assert!(node.run_cycle().is_err());
        assert_eq!(medium.pending(), 0);
    }

    #[test]
    fn test_radio_init_failure_silent_in_production() {
        let medium = SimMedium::new();
        let led = SimLed::new();
        let radio = medium.radio().failing_init(RadioError::NotDetected);
        let mut node = SensorNode::new(soil_config(), radio, soil_sensor(), SimTimer::new(16_000), led.clone());

        assert!(node.boot().is_err());
        assert_eq!(node.state(), &NodeState::Halted);
        assert!(led.states().is_empty());
    }

    #[test]
    fn test_gps_from_config() {
        let config = NodeConfig {
            gps_latitude: Some(45.512_345_6),
            gps_longitude: Some(-122.654_321_0),
            ..soil_config()
        };
        let (mut node, _, _) = sim_node(config, soil_sensor());
        let record: WireRecord = serde_json::from_slice(&node.run_cycle().unwrap().payload).unwrap();
        assert_eq!(record.gps_lat, Some(45.512_345_6));
        assert_eq!(record.gps_long, Some(-122.654_321));
    }
}
