//! # Ingest Gateway Module
//!
//! Turns relayed lines into stored readings.
//!
//! This module handles:
//! - Classifying and parsing forwarded lines
//! - Resolving each transmitter to a stable hardware id
//! - Deriving wall-clock timestamps from device uptime
//! - Queueing in memory and flushing batches on a fixed interval
//! - Requeueing a batch when the store write fails
//!
//! Sensors are always written before their readings, and a reading that
//! already exists for `(sensor, ts)` is silently ignored.

pub mod clock;
pub mod discovery;
pub mod identity;
pub mod queue;
pub mod reader;
pub mod translate;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, GatewayConfig};
use crate::error::{Result, TelemetryError};
use crate::packet::parser::{parse_line, ParsedLine, SkipReason};
use crate::store::models::{FlushReport, NewReading, SensorUpsert};
use crate::store::TelemetryStore;

use clock::ClockAnchors;
use queue::{IngestItem, IngestQueue};
use translate::{reading_for, sensor_for};

/// What happened to one line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Queued { hardware_id: i64, ts: DateTime<Utc> },
    Skipped(SkipReason),
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub lines: u64,
    pub queued: u64,
    pub skipped: u64,
    /// Readings dropped because the queue was full
    pub dropped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub inserted: u64,
    pub duplicates: u64,
}

/// Ingest gateway state
pub struct IngestGateway {
    settings: GatewayConfig,
    batch_size: usize,
    flush_interval: Duration,
    clocks: ClockAnchors,
    queue: IngestQueue,
    store: Arc<Mutex<TelemetryStore>>,
    stats: GatewayStats,
}

impl std::fmt::Debug for IngestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestGateway")
            .field("pending", &self.queue.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl IngestGateway {
    pub fn new(config: &Config, store: TelemetryStore) -> Self {
        Self {
            settings: config.gateway.clone(),
            batch_size: config.store.batch_size,
            flush_interval: Duration::from_secs(config.store.flush_interval_s),
            clocks: ClockAnchors::new(config.gateway.clock_resync_tolerance_s),
            queue: IngestQueue::new(config.store.max_pending),
            store: Arc::new(Mutex::new(store)),
            stats: GatewayStats::default(),
        }
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    /// Readings waiting to be flushed
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> Arc<Mutex<TelemetryStore>> {
        Arc::clone(&self.store)
    }

    /// Parse one line received at `received_at` and queue its reading
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::Queue` if the queue is full. Unusable lines
    /// are not errors; they come back as [`LineOutcome::Skipped`].
    pub fn handle_line(&mut self, line: &str, received_at: DateTime<Utc>) -> Result<LineOutcome> {
        self.stats.lines += 1;

        let record = match parse_line(line) {
            ParsedLine::Record(record) => record,
            ParsedLine::Skipped(reason) => {
                self.stats.skipped += 1;
                match &reason {
                    SkipReason::Blank | SkipReason::Comment => trace!("Ignoring line: {:?}", reason),
                    SkipReason::Overflow { sensor_id } => {
                        warn!("Sensor {} reported an encode overflow; no readings", sensor_id)
                    }
                    other => debug!("Discarding line ({:?}): {}", other, line.trim()),
                }
                return Ok(LineOutcome::Skipped(reason));
            }
        };
        let Some(uptime_ms) = record.uptime_ms else {
            self.stats.skipped += 1;
            return Ok(LineOutcome::Skipped(SkipReason::Incomplete {
                sensor_id: record.sensor_id,
            }));
        };

        let sensor = sensor_for(&record, &self.settings);
        let hardware_id = sensor.hardware_id;
        let ts = self.clocks.timestamp(hardware_id, uptime_ms, received_at);
        let reading = reading_for(&record, hardware_id, ts);
        let name = sensor.name.clone();

        if let Err(e) = self.queue.push(IngestItem { sensor, reading }) {
            self.stats.dropped += 1;
            return Err(e);
        }
        self.stats.queued += 1;
        info!("Received datapoint from {}; queue_len={}", name, self.queue.len());

        Ok(LineOutcome::Queued { hardware_id, ts })
    }

    /// Write up to one batch to the store.
    ///
    /// On failure the batch goes back to the front of the queue.
    pub async fn flush(&mut self) -> Result<FlushReport> {
        let batch = self.queue.take_batch(self.batch_size);
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let batch_len = batch.len();
        let store = Arc::clone(&self.store);
        let joined = tokio::task::spawn_blocking(move || {
            let result = write_items(&store, &batch);
            (batch, result)
        })
        .await;

        match joined {
            Ok((batch, Ok(report))) => {
                self.stats.flushes += 1;
                self.stats.inserted += report.inserted as u64;
                self.stats.duplicates += report.duplicates as u64;
                info!(
                    "Flushed {} readings ({} new, {} duplicate); {} pending",
                    batch.len(),
                    report.inserted,
                    report.duplicates,
                    self.queue.len()
                );
                Ok(report)
            }
            Ok((batch, Err(e))) => {
                self.stats.failed_flushes += 1;
                warn!("Flush of {} readings failed: {}; requeued", batch.len(), e);
                self.queue.requeue_front(batch);
                Err(e)
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                error!("Flush task failed: {}; {} readings lost", e, batch_len);
                Err(TelemetryError::Queue(format!("flush task failed: {}", e)))
            }
        }
    }

    /// Flush until the queue is empty or a write fails
    pub async fn flush_all(&mut self) -> Result<FlushReport> {
        let mut total = FlushReport::default();
        while !self.queue.is_empty() {
            total.merge(self.flush().await?);
        }
        Ok(total)
    }

    /// Consume lines until `shutdown` resolves or the line channel closes,
    /// flushing every `flush_interval_s`, then flush what is left.
    pub async fn run<F>(&mut self, mut lines: mpsc::Receiver<String>, shutdown: F) -> GatewayStats
    where
        F: Future<Output = ()>,
    {
        let mut tick = tokio::time::interval(self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        tick.tick().await;
        tokio::pin!(shutdown);

        info!(
            "Gateway running: flush every {}s, batches of {}",
            self.flush_interval.as_secs(),
            self.batch_size
        );

        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        if let Err(e) = self.handle_line(&line, Utc::now()) {
                            warn!("{}", e);
                        }
                    }
                    None => {
                        info!("Line source closed");
                        break;
                    }
                },
                _ = tick.tick() => {
                    // flush logs its own failures; a failed batch stays queued
                    // unless the write task itself died
                    if let Err(e) = self.flush().await {
                        debug!("Periodic flush failed: {}", e);
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        match self.flush_all().await {
            Ok(report) => info!("Final flush stored {} new readings", report.inserted),
            Err(e) => warn!("Final flush failed, {} readings not stored: {}", self.queue.len(), e),
        }
        self.stats
    }
}

fn write_items(store: &Mutex<TelemetryStore>, items: &[IngestItem]) -> Result<FlushReport> {
    let sensors: Vec<SensorUpsert> = items.iter().map(|i| i.sensor.clone()).collect();
    let readings: Vec<NewReading> = items.iter().map(|i| i.reading.clone()).collect();
    let mut store = store
        .lock()
        .map_err(|_| TelemetryError::Queue("telemetry store lock poisoned".to_string()))?;
    store.write_batch(&sensors, &readings)
}
