//! # Telemetry Simulator
//!
//! Runs simulated sensor nodes over in-memory radio links and prints every
//! relayed line on stdout, exactly as a relay would write them to its serial
//! port. Logs go to stderr so the output can be piped straight into tools
//! that consume relay lines.
//!
//! Each node gets its own medium and relay, since a relay forwards a single
//! expected source.
//!
//! ```bash
//! telemetry-sim --nodes 3 --cycles 10 --loss 5 --duplicate 4
//! ```

use std::io::{self, Stdout};

use anyhow::{bail, Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lora_telemetry::config::{Config, NodeConfig, RelayConfig, RelayMode, SensorKind};
use lora_telemetry::hal::sim::{SimLed, SimMedium, SimRadio, SimTimer};
use lora_telemetry::hal::{AnalogSensor, SensorChannel, SensorError};
use lora_telemetry::node::SensorNode;
use lora_telemetry::relay::RelayNode;

/// Relay address used by every simulated link
const RELAY_ADDRESS: u8 = 250;

/// Simulated signal strength at the first node; each further node is weaker
const BASE_RSSI_DBM: i16 = -52;

/// Longest node name the config accepts
const NODE_NAME_MAX: usize = 32;

const USAGE: &str = "usage: telemetry-sim [--config PATH] [--nodes N] [--cycles N] \
                     [--loss N] [--duplicate N] [--diagnostic]";

/// Command-line options
#[derive(Debug, Clone, PartialEq)]
struct SimOptions {
    config: Option<String>,
    nodes: u8,
    cycles: u32,
    /// Drop every Nth frame (0 = never)
    loss_every: u64,
    /// Deliver every Nth frame twice (0 = never)
    duplicate_every: u64,
    diagnostic: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            config: None,
            nodes: 3,
            cycles: 4,
            loss_every: 0,
            duplicate_every: 0,
            diagnostic: false,
        }
    }
}

impl SimOptions {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut options = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |name: &str| args.next().with_context(|| format!("{} needs a value\n{}", name, USAGE));
            match arg.as_str() {
                "--config" => options.config = Some(value("--config")?),
                "--nodes" => options.nodes = value("--nodes")?.parse().context("--nodes")?,
                "--cycles" => options.cycles = value("--cycles")?.parse().context("--cycles")?,
                "--loss" => options.loss_every = value("--loss")?.parse().context("--loss")?,
                "--duplicate" => options.duplicate_every = value("--duplicate")?.parse().context("--duplicate")?,
                "--diagnostic" => options.diagnostic = true,
                "-h" | "--help" => bail!("{}", USAGE),
                other => bail!("unknown argument {}\n{}", other, USAGE),
            }
        }

        if options.nodes == 0 || options.nodes >= RELAY_ADDRESS {
            bail!("--nodes must be between 1 and {}", RELAY_ADDRESS - 1);
        }
        Ok(options)
    }
}

/// Analog sensor producing slowly varying, plausible values
#[derive(Debug, Clone)]
struct DriftingSensor {
    phase: f32,
    samples: u32,
}

impl DriftingSensor {
    fn new(seed: u8) -> Self {
        Self {
            phase: seed as f32 * 1.3,
            samples: 0,
        }
    }
}

impl AnalogSensor for DriftingSensor {
    fn read(&mut self, channel: SensorChannel) -> std::result::Result<f32, SensorError> {
        self.samples += 1;
        let wave = (self.samples as f32 * 0.37 + self.phase).sin();
        let value = match channel {
            // battery divider count sagging slowly from about 4.26 V
            SensorChannel::Battery => 661.0 - self.samples as f32 * 0.05,
            SensorChannel::Temperature => 21.5 + 4.0 * wave,
            SensorChannel::Humidity => 55.0 + 12.0 * wave,
            SensorChannel::Capacitance => 3000.0 + 150.0 * wave,
        };
        Ok(value)
    }
}

type SimNode = SensorNode<SimRadio, DriftingSensor, SimTimer, SimLed>;
type SimRelay = RelayNode<SimRadio, Stdout, SimTimer>;

/// One node, its medium and the relay listening for it
struct SimLink {
    node: SimNode,
    relay: SimRelay,
    medium: SimMedium,
    halted: bool,
}

/// Node settings for `address`; a configured name gets the address appended
/// so every simulated node keeps its own identity.
fn node_config_for(base: &NodeConfig, address: u8) -> NodeConfig {
    NodeConfig {
        address,
        relay_address: RELAY_ADDRESS,
        name: base.name.as_ref().map(|name| suffixed_name(name, address)),
        sensor_kind: if address % 2 == 1 {
            SensorKind::SoilMoisture
        } else {
            SensorKind::TempHumidity
        },
        ..base.clone()
    }
}

/// `name-address`, shortened to fit the node name limit
fn suffixed_name(name: &str, address: u8) -> String {
    let suffix = format!("-{}", address);
    let mut name = name.to_string();
    while name.len() + suffix.len() > NODE_NAME_MAX {
        name.pop();
    }
    name + &suffix
}

fn build_link(base: &Config, options: &SimOptions, address: u8) -> Result<SimLink> {
    let node_config = node_config_for(&base.node, address);
    let relay_config = RelayConfig {
        network_id: node_config.network_id,
        address: RELAY_ADDRESS,
        expected_source: address,
        mode: if options.diagnostic { RelayMode::Diagnostic } else { base.relay.mode },
        ..base.relay.clone()
    };

    let medium = SimMedium::new()
        .with_loss_every(options.loss_every)
        .with_duplicate_every(options.duplicate_every);
    medium.set_rssi(BASE_RSSI_DBM - 3 * i16::from(address));

    let node = SensorNode::new(
        node_config.clone(),
        medium.radio(),
        DriftingSensor::new(address),
        SimTimer::new(node_config.max_sleep_chunk_ms),
        SimLed::new(),
    );
    let mut relay = RelayNode::new(relay_config, medium.radio(), io::stdout(), SimTimer::new(u32::MAX));
    relay
        .start()
        .with_context(|| format!("relay for node {} failed to start", address))?;

    Ok(SimLink {
        node,
        relay,
        medium,
        halted: false,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = SimOptions::parse(std::env::args().skip(1))?;
    let base = match &options.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path))?,
        None => Config::default(),
    };

    info!(
        "Simulating {} nodes for {} cycles (loss every {}, duplicate every {})",
        options.nodes, options.cycles, options.loss_every, options.duplicate_every
    );

    let mut links = (1..=options.nodes)
        .map(|address| build_link(&base, &options, address))
        .collect::<Result<Vec<_>>>()?;

    for cycle in 0..options.cycles {
        for link in links.iter_mut().filter(|l| !l.halted) {
            if let Err(e) = link.node.run_cycle() {
                error!("Node halted in cycle {}: {}", cycle, e);
                link.halted = true;
                continue;
            }
            // one poll per waiting frame, plus one idle poll
            link.relay.run_polls(link.medium.pending() + 1);
        }
    }

    for (address, link) in (1..=options.nodes).zip(&links) {
        let node = link.node.stats();
        let relay = link.relay.stats();
        info!(
            "Node {}: {} sent, {} failed; relay forwarded {}, rejected {}",
            address, node.transmitted, node.tx_failures, relay.forwarded, relay.rejected
        );
    }

    Ok(())
}
