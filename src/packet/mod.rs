//! # Wire Record Module
//!
//! The self-describing textual record that travels from sensor node to relay
//! to gateway.
//!
//! This module handles:
//! - Fixed-schema record encoding into a bounded buffer, with an overflow fallback
//! - Link-quality augmentation spliced in by the relay
//! - Tolerant parsing of forwarded lines on the gateway side

pub mod protocol;
pub mod record;
pub mod encoder;
pub mod splice;
pub mod parser;
