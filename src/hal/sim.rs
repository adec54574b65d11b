//! Simulated hardware for tests and the `telemetry-sim` binary.
//!
//! All pieces are single-threaded (`Rc`/`RefCell`), matching the cooperative
//! execution model of the nodes they stand in for.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::Bytes;

use super::{
    AnalogSensor, LinkHeader, LowPowerTimer, RadioError, RadioFrame, RadioSettings,
    RadioTransceiver, SensorChannel, SensorError, SleepError, StatusIndicator,
};
use crate::packet::protocol::RADIO_MAX_PAYLOAD;

#[derive(Debug, Default)]
struct MediumState {
    in_flight: VecDeque<RadioFrame>,
    transmitted: u64,
    drop_every: Option<u64>,
    duplicate_every: Option<u64>,
    rssi_dbm: i16,
}

/// Shared radio medium.
///
/// Frames sent by any [`SimRadio`] attached to the medium become receivable by
/// every other attached radio, in order. Loss and duplication are
/// deterministic (every Nth frame) so tests stay reproducible.
#[derive(Debug, Clone)]
pub struct SimMedium {
    state: Rc<RefCell<MediumState>>,
}

impl Default for SimMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMedium {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MediumState {
                rssi_dbm: -60,
                ..Default::default()
            })),
        }
    }

    /// Drop every `n`th transmitted frame
    pub fn with_loss_every(self, n: u64) -> Self {
        self.state.borrow_mut().drop_every = (n > 0).then_some(n);
        self
    }

    /// Deliver every `n`th transmitted frame twice
    pub fn with_duplicate_every(self, n: u64) -> Self {
        self.state.borrow_mut().duplicate_every = (n > 0).then_some(n);
        self
    }

    /// RSSI reported for subsequently received frames
    pub fn set_rssi(&self, rssi_dbm: i16) {
        self.state.borrow_mut().rssi_dbm = rssi_dbm;
    }

    /// Inject a frame directly, bypassing any sender
    pub fn inject(&self, header: LinkHeader, payload: impl Into<Bytes>) {
        self.state.borrow_mut().in_flight.push_back(RadioFrame {
            header,
            payload: payload.into(),
        });
    }

    /// Frames currently waiting to be received
    pub fn pending(&self) -> usize {
        self.state.borrow().in_flight.len()
    }

    /// Create a radio attached to this medium
    pub fn radio(&self) -> SimRadio {
        SimRadio {
            medium: self.clone(),
            init_error: None,
            settings: None,
            asleep: false,
            receiving: false,
            last_rssi: 0,
            received: None,
            sent: 0,
        }
    }

    fn transmit(&self, frame: RadioFrame) {
        let mut state = self.state.borrow_mut();
        state.transmitted += 1;
        let n = state.transmitted;

        if state.drop_every.is_some_and(|every| n % every == 0) {
            return;
        }
        if state.duplicate_every.is_some_and(|every| n % every == 0) {
            state.in_flight.push_back(frame.clone());
        }
        state.in_flight.push_back(frame);
    }

    fn take(&self) -> Option<(RadioFrame, i16)> {
        let mut state = self.state.borrow_mut();
        let rssi = state.rssi_dbm;
        state.in_flight.pop_front().map(|frame| (frame, rssi))
    }
}

/// Radio endpoint on a [`SimMedium`]
#[derive(Debug)]
pub struct SimRadio {
    medium: SimMedium,
    init_error: Option<RadioError>,
    settings: Option<RadioSettings>,
    asleep: bool,
    receiving: bool,
    last_rssi: i16,
    received: Option<RadioFrame>,
    sent: u64,
}

impl SimRadio {
    /// Make `init` fail with the given error
    pub fn failing_init(mut self, error: RadioError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub fn settings(&self) -> Option<RadioSettings> {
        self.settings
    }

    /// Number of frames this radio has transmitted
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl RadioTransceiver for SimRadio {
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        if let Some(err) = self.init_error.clone() {
            return Err(err);
        }
        self.settings = Some(*settings);
        Ok(())
    }

    fn send(&mut self, header: LinkHeader, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > RADIO_MAX_PAYLOAD {
            return Err(RadioError::PayloadTooLarge(payload.len()));
        }
        self.asleep = false;
        self.receiving = false;
        self.medium.transmit(RadioFrame {
            header,
            payload: Bytes::copy_from_slice(payload),
        });
        self.sent += 1;
        Ok(())
    }

    fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.asleep = true;
        self.receiving = false;
        Ok(())
    }

    fn set_mode_rx(&mut self) -> Result<(), RadioError> {
        self.asleep = false;
        self.receiving = true;
        Ok(())
    }

    fn available(&mut self) -> bool {
        if self.received.is_none() {
            if let Some((frame, rssi)) = self.medium.take() {
                self.last_rssi = rssi;
                self.received = Some(frame);
            }
        }
        self.received.is_some()
    }

    fn recv(&mut self) -> Option<RadioFrame> {
        if !self.available() {
            return None;
        }
        self.receiving = false;
        self.received.take()
    }

    fn last_rssi(&self) -> i16 {
        self.last_rssi
    }
}

/// Analog sensor returning scripted values per channel.
///
/// Channels without a script report [`SensorError::Unavailable`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    channels: HashMap<SensorChannel, Result<f32, SensorError>>,
    reads: Vec<SensorChannel>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: SensorChannel, value: f32) -> Self {
        self.channels.insert(channel, Ok(value));
        self
    }

    pub fn with_failure(mut self, channel: SensorChannel, error: SensorError) -> Self {
        self.channels.insert(channel, Err(error));
        self
    }

    pub fn set(&mut self, channel: SensorChannel, value: f32) {
        self.channels.insert(channel, Ok(value));
    }

    /// Channels read so far, in order
    pub fn reads(&self) -> &[SensorChannel] {
        &self.reads
    }
}

impl AnalogSensor for ScriptedSensor {
    fn read(&mut self, channel: SensorChannel) -> Result<f32, SensorError> {
        self.reads.push(channel);
        self.channels
            .get(&channel)
            .cloned()
            .unwrap_or(Err(SensorError::Unavailable))
    }
}

/// Simulated clock and low-power timer.
///
/// Each `sleep_ms` call advances time by at most `max_per_call`
/// milliseconds, mimicking a watchdog-bounded sleep primitive.
#[derive(Debug, Clone)]
pub struct SimTimer {
    now_ms: Rc<Cell<u64>>,
    max_per_call: u32,
    fail_on_call: Option<usize>,
    sleep_calls: Rc<RefCell<Vec<u32>>>,
}

impl SimTimer {
    pub fn new(max_per_call: u32) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(0)),
            max_per_call,
            fail_on_call: None,
            sleep_calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Make the `n`th sleep call (zero-based) fail
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }

    /// Requested duration of every sleep call so far
    pub fn sleep_calls(&self) -> Vec<u32> {
        self.sleep_calls.borrow().clone()
    }
}

impl LowPowerTimer for SimTimer {
    fn sleep_ms(&mut self, ms: u32) -> Result<u32, SleepError> {
        let call = self.sleep_calls.borrow().len();
        self.sleep_calls.borrow_mut().push(ms);
        if self.fail_on_call == Some(call) {
            return Err(SleepError::Unsupported);
        }
        let slept = ms.min(self.max_per_call);
        self.advance(slept as u64);
        Ok(slept)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms as u64);
    }

    fn millis(&self) -> u64 {
        self.now_ms.get()
    }
}

/// Status LED recording every state change
#[derive(Debug, Clone, Default)]
pub struct SimLed {
    states: Rc<RefCell<Vec<bool>>>,
}

impl SimLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<bool> {
        self.states.borrow().clone()
    }
}

impl StatusIndicator for SimLed {
    fn set(&mut self, on: bool) {
        self.states.borrow_mut().push(on);
    }
}
