//! # Relay Node Module
//!
//! Bridges the radio medium to a line-oriented output stream.
//!
//! Each poll either finds nothing (the caller waits one short poll interval)
//! or handles exactly one frame:
//!
//! 1. Link-layer filter on network id and source address
//! 2. Read the frame's RSSI
//! 3. Splice `"rssi_dbm":N` before the closing brace and write the line
//! 4. Return the radio to receive mode, whatever happened above
//!
//! The relay never blocks on anything longer than one poll interval, since a
//! frame arriving while it is busy is lost.

pub mod diagnostic;
pub mod filter;

use std::io::Write;

use tracing::{debug, info, warn};

use crate::config::{RelayConfig, RelayMode};
use crate::error::{Result, TelemetryError};
use crate::hal::{LowPowerTimer, RadioTransceiver};
use crate::packet::splice::{append_link_quality, Spliced};

use diagnostic::{summary_line, DiagnosticFields};
use filter::{FilterMismatch, LinkFilter};

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No frame waiting
    Idle,
    /// Frame written to the output stream
    Forwarded {
        from: u8,
        id: u8,
        rssi_dbm: i16,
        /// False when no closing brace was found and the payload went out
        /// unchanged
        augmented: bool,
    },
    /// Frame dropped by the link-layer filter
    Rejected(FilterMismatch),
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub unchanged: u64,
    pub write_failures: u64,
}

/// Relay node forwarding accepted frames to `W`
pub struct RelayNode<R, W, T> {
    config: RelayConfig,
    filter: LinkFilter,
    radio: R,
    out: W,
    timer: T,
    stats: RelayStats,
}

impl<R, W, T> std::fmt::Debug for RelayNode<R, W, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("address", &self.config.address)
            .field("mode", &self.config.mode)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<R, W, T> RelayNode<R, W, T>
where
    R: RadioTransceiver,
    W: Write,
    T: LowPowerTimer,
{
    pub fn new(config: RelayConfig, radio: R, out: W, timer: T) -> Self {
        let filter = LinkFilter::from_config(&config);
        Self {
            config,
            filter,
            radio,
            out,
            timer,
            stats: RelayStats::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Initialize the radio and enter receive mode
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::RadioInit` if the radio does not come up.
    pub fn start(&mut self) -> Result<()> {
        self.radio
            .init(&self.config.radio_settings())
            .map_err(|e| TelemetryError::RadioInit(e.to_string()))?;
        self.radio.set_mode_rx()?;
        info!(
            "Relay {} listening on {:.1} MHz for node {} on network {} ({:?})",
            self.config.address,
            self.config.frequency_mhz,
            self.config.expected_source,
            self.config.network_id,
            self.config.mode
        );
        Ok(())
    }

    /// Handle at most one waiting frame without blocking
    pub fn poll_once(&mut self) -> RelayOutcome {
        if !self.radio.available() {
            return RelayOutcome::Idle;
        }
        let Some(frame) = self.radio.recv() else {
            return RelayOutcome::Idle;
        };
        self.stats.received += 1;
        let rssi_dbm = self.radio.last_rssi();

        let outcome = match self.filter.check(&frame.header) {
            Err(mismatch) => {
                self.stats.rejected += 1;
                debug!("Dropped frame: {}", mismatch);
                RelayOutcome::Rejected(mismatch)
            }
            Ok(()) => {
                let spliced = append_link_quality(&frame.payload, rssi_dbm);
                let augmented = matches!(spliced, Spliced::Augmented(_));
                if !augmented {
                    self.stats.unchanged += 1;
                    debug!(
                        "No closing brace in {} byte payload from {}; forwarding as-is",
                        frame.payload.len(),
                        frame.header.from
                    );
                }

                if self.config.mode == RelayMode::Diagnostic {
                    let fields = DiagnosticFields::extract(&frame.payload);
                    let summary = summary_line(&frame.header, rssi_dbm, &fields);
                    self.write_line(summary.as_bytes());
                }
                if self.write_line(spliced.bytes()) {
                    self.stats.forwarded += 1;
                }

                RelayOutcome::Forwarded {
                    from: frame.header.from,
                    id: frame.header.id,
                    rssi_dbm,
                    augmented,
                }
            }
        };

        if let Err(e) = self.radio.set_mode_rx() {
            warn!("Failed to re-enter receive mode: {}", e);
        }
        outcome
    }

    /// Write one line, appending a newline unless the payload already ends
    /// with one. Returns false if the stream rejected it.
    fn write_line(&mut self, bytes: &[u8]) -> bool {
        let result = self.out.write_all(bytes).and_then(|()| {
            if !bytes.ends_with(b"\n") {
                self.out.write_all(b"\n")?;
            }
            self.out.flush()
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                self.stats.write_failures += 1;
                warn!("Failed to write forwarded line: {}", e);
                false
            }
        }
    }

    /// Poll `count` times, waiting one poll interval after each idle poll
    pub fn run_polls(&mut self, count: usize) -> RelayStats {
        for _ in 0..count {
            if self.poll_once() == RelayOutcome::Idle {
                self.timer.delay_ms(self.config.poll_interval_ms);
            }
        }
        self.stats
    }

    /// Start the radio and poll forever
    ///
    /// # Errors
    ///
    /// Only returns if the radio fails to initialize.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        loop {
            if self.poll_once() == RelayOutcome::Idle {
                self.timer.delay_ms(self.config.poll_interval_ms);
            }
        }
    }
}
