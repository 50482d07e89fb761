// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Relation between the hardware wake-up counter and the logical tick

use crate::Error;
use crate::RTC_TICK_RATE_HZ;
use crate::TICK_RATE_HZ;

/// Rates of the hardware wake-up counter and of the logical scheduler tick
///
/// The hardware counter must run at an exact integer multiple of the logical
/// tick rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickConfig {
    /// Hardware wake-up counter rate
    hardware_hz: u32,

    /// Logical tick rate
    tick_hz: u32,

    /// Hardware ticks per logical tick
    ratio: u32,
}

impl TickConfig {
    /// MAX32620 EV kit setup, RTC at 4096 Hz and scheduler tick at 512 Hz
    pub const MAX32620: Self = Self {
        hardware_hz: RTC_TICK_RATE_HZ,
        tick_hz: TICK_RATE_HZ,
        ratio: RTC_TICK_RATE_HZ / TICK_RATE_HZ,
    };

    /// Create a new tick configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTickRatio`] if the tick rate is zero, if it is
    /// faster than the hardware counter, or if it does not divide it exactly.
    pub const fn new(hardware_hz: u32, tick_hz: u32) -> Result<Self, Error> {
        if tick_hz == 0 || hardware_hz < tick_hz || hardware_hz % tick_hz != 0 {
            return Err(Error::InvalidTickRatio {
                hardware_hz,
                tick_hz,
            });
        }

        Ok(Self {
            hardware_hz,
            tick_hz,
            ratio: hardware_hz / tick_hz,
        })
    }

    /// Return the hardware wake-up counter rate
    #[must_use]
    pub const fn hardware_hz(self) -> u32 {
        self.hardware_hz
    }

    /// Return the logical tick rate
    #[must_use]
    pub const fn tick_hz(self) -> u32 {
        self.tick_hz
    }

    /// Return the number of hardware ticks per logical tick
    #[must_use]
    pub const fn ratio(self) -> u32 {
        self.ratio
    }

    /// Convert logical ticks to hardware ticks, saturating on overflow
    #[must_use]
    pub const fn to_hardware(self, ticks: u32) -> u32 {
        ticks.saturating_mul(self.ratio)
    }

    /// Convert seconds to hardware ticks, saturating on overflow
    #[must_use]
    pub const fn seconds_to_hardware(self, seconds: u32) -> u32 {
        seconds.saturating_mul(self.hardware_hz)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self::MAX32620
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max32620_ratio_is_eight() {
        assert_eq!(TickConfig::MAX32620.ratio(), 8);
        assert_eq!(TickConfig::new(4096, 512), Ok(TickConfig::MAX32620));
    }

    #[test]
    fn equal_rates_give_unit_ratio() {
        let config = TickConfig::new(1000, 1000).unwrap();
        assert_eq!(config.ratio(), 1);
    }

    #[test]
    fn reversed_ratio_is_rejected() {
        assert_eq!(
            TickConfig::new(512, 4096),
            Err(Error::InvalidTickRatio {
                hardware_hz: 512,
                tick_hz: 4096
            })
        );
    }

    #[test]
    fn inexact_ratio_is_rejected() {
        assert!(TickConfig::new(32768, 1000).is_err());
    }

    #[test]
    fn zero_tick_rate_is_rejected() {
        assert!(TickConfig::new(4096, 0).is_err());
    }

    #[test]
    fn conversions_saturate() {
        let config = TickConfig::MAX32620;
        assert_eq!(config.to_hardware(10), 80);
        assert_eq!(config.to_hardware(u32::MAX), u32::MAX);
        assert_eq!(config.seconds_to_hardware(7), 7 * 4096);
    }
}
