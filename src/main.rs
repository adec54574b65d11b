//! # LoRa Gateway
//!
//! Reads relayed telemetry lines from the relay's serial port and stores the
//! readings in SQLite.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (argument, `LORA_CONFIG`, `config/default.toml`,
//!      or built-in defaults) and apply environment overrides
//!    - Set up logging (stdout, plus a daily log file when configured)
//!    - Resolve the serial device and open the database
//!
//! 2. **Main Loop**
//!    - A reader task forwards lines, reconnecting with backoff
//!    - The gateway queues parsed readings and flushes them in batches
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C or SIGTERM stops intake
//!    - Everything still queued is flushed
//!
//! # Examples
//!
//! ```bash
//! DATABASE_URL=sqlite:///var/lib/lora/telemetry.db lora-gateway config/default.toml
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use lora_telemetry::config::{Config, LoggingConfig};
use lora_telemetry::gateway::discovery::discover_serial_port;
use lora_telemetry::gateway::reader::{run_reader, SerialConnector};
use lora_telemetry::gateway::IngestGateway;
use lora_telemetry::store::TelemetryStore;

/// Config file used when none is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming the config file
const CONFIG_ENV: &str = "LORA_CONFIG";

/// Lines buffered between the serial reader and the gateway
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Rolling log file name prefix
const LOG_FILE_PREFIX: &str = "lora-gateway.log";

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    let _log_guard = init_logging(&config.logging)?;

    info!("LoRa gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(duty) = config.aux_power.duty_cycle() {
        // driven by a separate control loop; reported here for the operator
        info!(
            "Aux power relay {}: ON {:.0}s, OFF {:.0}s",
            duty.device_address,
            duty.uptime.as_secs_f64(),
            duty.downtime.as_secs_f64()
        );
    }

    let port = discover_serial_port(&config.serial)?;
    let store = TelemetryStore::open(config.store.database_path())
        .with_context(|| format!("Failed to open database {}", config.store.database_path()))?;
    let mut gateway = IngestGateway::new(&config, store);

    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let connector = SerialConnector::new(port, config.serial.baud_rate);
    let max_backoff = Duration::from_secs(config.serial.reconnect_max_backoff_s);
    let reader = tokio::spawn(run_reader(connector, tx, max_backoff));

    info!("Press Ctrl+C to exit");
    let stats = gateway.run(rx, shutdown_signal()).await;
    reader.abort();

    info!(
        "Gateway stopped: {} lines, {} stored, {} duplicates, {} skipped, {} dropped",
        stats.lines, stats.inserted, stats.duplicates, stats.skipped, stats.dropped
    );
    if gateway.pending() > 0 {
        warn!("{} readings were not stored", gateway.pending());
    }

    Ok(())
}

/// Resolve and load configuration, then apply environment overrides
fn load_config() -> Result<Config> {
    let explicit = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()));

    let mut config = match explicit {
        Some(path) => Config::load(&path).with_context(|| format!("Failed to load config {}", path))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG_PATH))?,
        None => Config::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// Install the tracing subscriber; the returned guard must outlive logging
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match logging.dir.as_deref() {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log dir {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install logger")?;

    Ok(guard)
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path_is_relative() {
        assert!(Path::new(DEFAULT_CONFIG_PATH).is_relative());
        assert!(DEFAULT_CONFIG_PATH.ends_with(".toml"));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let contents = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml"))
            .expect("config/default.toml should ship with the crate");
        let config = Config::from_toml_str(&contents).expect("shipped config should validate");
        assert_eq!(config.serial.baud_rate, 115_200);
    }
}
