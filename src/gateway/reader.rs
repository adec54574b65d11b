//! # Line Reader
//!
//! Reads newline-terminated lines from the relay's serial port and hands them
//! to the gateway over a channel, reconnecting with exponential backoff when
//! the port disappears (USB unplug, relay reset).
//!
//! The serial port sits behind [`LineSource`]/[`Connector`] so the reconnect
//! loop can be tested without hardware.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing::{debug, info, warn};

use crate::error::{Result, TelemetryError};

/// Pause after opening the port; boards reset when the port opens
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// First reconnect delay
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// A stream of text lines
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, or `None` when the stream ended
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Opens a fresh [`LineSource`]
#[async_trait]
pub trait Connector: Send {
    type Source: LineSource;

    async fn connect(&mut self) -> Result<Self::Source>;

    /// Human-readable endpoint name for logs
    fn describe(&self) -> String;
}

/// Exponential backoff doubling from an initial delay up to a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following delay doubles
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Lines from an open serial port
pub struct SerialLineSource {
    reader: BufReader<tokio_serial::SerialStream>,
    buf: Vec<u8>,
}

#[async_trait]
impl LineSource for SerialLineSource {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Opens the relay's serial port (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    type Source = SerialLineSource;

    async fn connect(&mut self) -> Result<SerialLineSource> {
        info!("Opening serial port {} @ {}", self.path, self.baud_rate);
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TelemetryError::Serial(format!("Failed to open {}: {}", self.path, e)))?;

        tokio::time::sleep(SETTLE_DELAY).await;
        port.clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| TelemetryError::Serial(format!("Failed to clear {}: {}", self.path, e)))?;

        Ok(SerialLineSource {
            reader: BufReader::new(port),
            buf: Vec::with_capacity(512),
        })
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

/// Connect, forward lines into `tx`, and reconnect on any failure.
///
/// Returns once the receiving side of `tx` is dropped.
pub async fn run_reader<C: Connector>(mut connector: C, tx: mpsc::Sender<String>, max_backoff: Duration) {
    let mut backoff = Backoff::new(INITIAL_BACKOFF, max_backoff);

    while !tx.is_closed() {
        match connector.connect().await {
            Ok(mut source) => {
                info!("Serial connected to {}; waiting for lines", connector.describe());
                backoff.reset();
                loop {
                    match source.next_line().await {
                        Ok(Some(line)) => {
                            if tx.send(line).await.is_err() {
                                debug!("Line receiver closed; reader stopping");
                                return;
                            }
                        }
                        Ok(None) => {
                            warn!("Serial stream {} ended", connector.describe());
                            break;
                        }
                        Err(e) => {
                            warn!("Serial read error on {}: {}", connector.describe(), e);
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Serial error: {}", e),
        }

        let delay = backoff.next_delay();
        info!("Reconnecting to {} in {:.1}s", connector.describe(), delay.as_secs_f32());
        tokio::time::sleep(delay).await;
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    fn line(text: &str) -> io::Result<Option<String>> {
        Ok(Some(text.to_string()))
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_initial_above_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_forwards_and_reconnects() {
        let connector = ScriptedConnector::new(vec![
            Some(vec![line("a"), line("b"), Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))]),
            None,
            Some(vec![line("c")]),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_reader(connector.clone(), tx, Duration::from_secs(30)));

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(rx.recv().await.unwrap());
        }
        assert_eq!(received, vec!["a", "b", "c"]);
        assert_eq!(connector.attempts(), 3);

        drop(rx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_stops_when_receiver_dropped() {
        let connector = ScriptedConnector::new(vec![]);
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(rx);
        // returns immediately without connecting
        run_reader(connector.clone(), tx, Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 0);
    }
}
