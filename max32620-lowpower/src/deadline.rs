// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Conversion of an idle request to a hardware wake-up deadline

use crate::SchedulerConfig;

/// Outcome of a deadline calculation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Arm the wake-up timer and enter deep sleep
    Arm {
        /// Logical ticks covered, after clamping
        idle_ticks: u32,

        /// Hardware ticks to program into the wake-up timer
        hardware_ticks: u32,
    },

    /// The deadline is too short, sleep shallowly for the rest of the tick
    Shallow,
}

/// Converter from idle logical ticks to hardware wake-up deadlines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeadlineCalculator {
    /// Hardware ticks per logical tick
    ratio: u32,

    /// Largest programmable hardware deadline
    max_deadline: u32,

    /// Smallest hardware deadline worth a trip into deep sleep
    min_hardware_ticks: u32,
}

impl DeadlineCalculator {
    /// Create a new calculator
    #[must_use]
    pub const fn new(ratio: u32, max_deadline: u32, min_hardware_ticks: u32) -> Self {
        Self {
            ratio,
            max_deadline,
            min_hardware_ticks,
        }
    }

    /// Create a calculator from a scheduler configuration
    #[must_use]
    pub const fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.tick.ratio(),
            config.max_deadline,
            config.min_hardware_ticks,
        )
    }

    /// Return the largest number of logical ticks a single sleep can cover
    #[must_use]
    pub const fn max_idle_ticks(&self) -> u32 {
        match self.max_deadline.checked_div(self.ratio) {
            Some(ticks) => ticks,
            None => 0,
        }
    }

    /// Compute the deadline for a number of idle logical ticks
    ///
    /// The request is clamped to the hardware limit first. The tick already
    /// in progress is not counted, so the deadline spans one tick less than
    /// the clamped request.
    #[must_use]
    pub fn calculate(&self, requested: u32) -> Deadline {
        let idle_ticks = requested.min(self.max_idle_ticks());
        let hardware_ticks = idle_ticks.saturating_sub(1).saturating_mul(self.ratio);

        if idle_ticks == 0 || hardware_ticks < self.min_hardware_ticks {
            return Deadline::Shallow;
        }

        Deadline::Arm {
            idle_ticks,
            hardware_ticks,
        }
    }
}
