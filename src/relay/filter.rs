//! Link-layer acceptance check, applied before any payload interpretation.

use std::fmt;

use crate::config::RelayConfig;
use crate::hal::LinkHeader;

/// Why a received frame was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMismatch {
    /// Frame belongs to another deployment sharing the channel
    Network { expected: u8, actual: u8 },
    /// Frame came from a transmitter this relay does not serve
    Source { expected: u8, actual: u8 },
}

impl fmt::Display for FilterMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMismatch::Network { expected, actual } => {
                write!(f, "network id {} (expected {})", actual, expected)
            }
            FilterMismatch::Source { expected, actual } => {
                write!(f, "source address {} (expected {})", actual, expected)
            }
        }
    }
}

/// Accepts frames from one transmitter on one network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFilter {
    pub network_id: u8,
    pub expected_source: u8,
}

impl LinkFilter {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            network_id: config.network_id,
            expected_source: config.expected_source,
        }
    }

    /// Network id is checked first; a foreign frame is reported as a network
    /// mismatch even if its source address also differs
    pub fn check(&self, header: &LinkHeader) -> Result<(), FilterMismatch> {
        if header.network_id != self.network_id {
            return Err(FilterMismatch::Network {
                expected: self.network_id,
                actual: header.network_id,
            });
        }
        if header.from != self.expected_source {
            return Err(FilterMismatch::Source {
                expected: self.expected_source,
                actual: header.from,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> LinkFilter {
        LinkFilter { network_id: 165, expected_source: 1 }
    }

    fn header(network_id: u8, from: u8) -> LinkHeader {
        LinkHeader { network_id, to: 2, from, id: 0 }
    }

    #[test]
    fn test_accepts_expected_frame() {
        assert_eq!(filter().check(&header(165, 1)), Ok(()));
    }

    #[test]
    fn test_rejects_foreign_network() {
        assert_eq!(
            filter().check(&header(7, 1)),
            Err(FilterMismatch::Network { expected: 165, actual: 7 })
        );
    }

    #[test]
    fn test_rejects_unknown_source() {
        assert_eq!(
            filter().check(&header(165, 9)),
            Err(FilterMismatch::Source { expected: 1, actual: 9 })
        );
    }

    #[test]
    fn test_network_checked_before_source() {
        assert!(matches!(
            filter().check(&header(7, 9)),
            Err(FilterMismatch::Network { .. })
        ));
    }

    #[test]
    fn test_from_default_config() {
        let f = LinkFilter::from_config(&RelayConfig::default());
        assert_eq!(f, LinkFilter { network_id: 165, expected_source: 1 });
    }

    #[test]
    fn test_mismatch_display() {
        let m = FilterMismatch::Source { expected: 1, actual: 9 };
        assert_eq!(m.to_string(), "source address 9 (expected 1)");
    }
}
