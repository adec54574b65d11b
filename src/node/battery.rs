//! Battery voltage from the divider pin ADC count.

use crate::config::NodeConfig;

/// ADC calibration for the battery divider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryCalibration {
    pub reference_v: f32,
    pub resolution_bits: u8,
    /// Vin / Vout of the resistor divider
    pub divider_ratio: f32,
}

impl BatteryCalibration {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            reference_v: config.adc_reference_v,
            resolution_bits: config.adc_resolution_bits,
            divider_ratio: config.battery_divider_ratio,
        }
    }

    fn full_scale(&self) -> f32 {
        (1u32 << self.resolution_bits) as f32
    }

    /// Convert a raw count to battery volts; `None` when the count is outside
    /// the ADC range
    pub fn volts(&self, raw: f32) -> Option<f32> {
        if !raw.is_finite() || raw < 0.0 || raw >= self.full_scale() {
            return None;
        }
        Some(raw * self.divider_ratio * self.reference_v / self.full_scale())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feather() -> BatteryCalibration {
        BatteryCalibration::from_config(&NodeConfig::default())
    }

    #[test]
    fn test_divider_conversion() {
        // 10-bit ADC, 3.3 V reference, halving divider
        let volts = feather().volts(662.0).unwrap();
        assert!((volts - 4.267).abs() < 0.001, "got {}", volts);
    }

    #[test]
    fn test_out_of_range_counts() {
        let cal = feather();
        assert_eq!(cal.volts(-1.0), None);
        assert_eq!(cal.volts(1024.0), None);
        assert_eq!(cal.volts(f32::NAN), None);
        assert_eq!(cal.volts(0.0), Some(0.0));
    }

    #[test]
    fn test_twelve_bit_adc() {
        let cal = BatteryCalibration {
            reference_v: 3.3,
            resolution_bits: 12,
            divider_ratio: 2.0,
        };
        let volts = cal.volts(2048.0).unwrap();
        assert!((volts - 3.3).abs() < 1e-6);
    }
}
