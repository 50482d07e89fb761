// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Hardware sleep levels

use core::fmt::Display;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;

/// A hardware sleep level
///
/// Levels are ordered from the deepest one to run mode, so `Lp0 < Lp3`.
/// Deeper levels draw less power and take longer to wake up from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SleepLevel {
    /// Deepest sleep, the processor restarts from reset on wake-up
    Lp0,

    /// Deep sleep, system clocks are stopped but execution state is retained
    Lp1,

    /// Light sleep, the core is halted until any enabled interrupt fires
    Lp2,

    /// Run mode
    Lp3,
}

impl SleepLevel {
    /// Whether registers and RAM survive a wake-up from this level
    #[must_use]
    pub const fn preserves_state(self) -> bool {
        !matches!(self, Self::Lp0)
    }

    /// Whether in-flight driver activity must be drained before entering
    ///
    /// Clocks stop in LP1 and power is removed in LP0, so an ongoing UART or
    /// SPI transfer would be corrupted.
    #[must_use]
    pub const fn requires_quiescence(self) -> bool {
        matches!(self, Self::Lp0 | Self::Lp1)
    }

    /// Whether this is run mode
    #[must_use]
    pub const fn is_run_mode(self) -> bool {
        matches!(self, Self::Lp3)
    }
}

impl Display for SleepLevel {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        let name = match *self {
            Self::Lp0 => "LP0",
            Self::Lp1 => "LP1",
            Self::Lp2 => "LP2",
            Self::Lp3 => "LP3",
        };
        formatter.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_from_deepest() {
        assert!(SleepLevel::Lp0 < SleepLevel::Lp1);
        assert!(SleepLevel::Lp1 < SleepLevel::Lp2);
        assert!(SleepLevel::Lp2 < SleepLevel::Lp3);
    }

    #[test]
    fn only_lp0_loses_state() {
        assert!(!SleepLevel::Lp0.preserves_state());
        assert!(SleepLevel::Lp1.preserves_state());
        assert!(SleepLevel::Lp2.preserves_state());
        assert!(SleepLevel::Lp3.preserves_state());
    }

    #[test]
    fn quiescence_is_needed_for_deep_levels_only() {
        assert!(SleepLevel::Lp0.requires_quiescence());
        assert!(SleepLevel::Lp1.requires_quiescence());
        assert!(!SleepLevel::Lp2.requires_quiescence());
        assert!(!SleepLevel::Lp3.requires_quiescence());
    }
}
