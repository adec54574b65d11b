//! # LoRa Telemetry Library
//!
//! Low-power sensor telemetry over LoRa: battery-powered sensor nodes, a
//! relay that forwards their packets to a serial link, and a gateway that
//! stores readings in SQLite.
//!
//! - [`node`]: measure, encode, transmit, deep sleep
//! - [`relay`]: filter, splice link quality, forward as lines
//! - [`gateway`]: parse lines, anchor clocks, batch into the [`store`]
//!
//! Hardware is reached only through the capability traits in [`hal`].

pub mod config;
pub mod error;
pub mod gateway;
pub mod hal;
pub mod node;
pub mod packet;
pub mod relay;
pub mod store;
