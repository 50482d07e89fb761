// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Scheduler configuration

use heapless::Vec;

use crate::Comparator;
use crate::Error;
use crate::SleepLevel;
use crate::TickConfig;
use crate::WakeSource;
use crate::MAX_WAKE_SOURCES;

/// RTC counter rate on the MAX32620 EV kit
pub const RTC_TICK_RATE_HZ: u32 = 4096;

/// Scheduler tick rate on the MAX32620 EV kit
pub const TICK_RATE_HZ: u32 = 512;

/// Largest value accepted by the RTC snooze register
pub const MAX_SNOOZE: u32 = 0x3FF;

/// Smallest RTC deadline worth a trip into deep sleep
pub const MIN_RTC_TICKS: u32 = 3;

/// Smallest number of SysTick counts left for the tick to be suppressed
pub const MIN_SYSTICK: u32 = 2;

/// Number of wake-up sources that can be armed next to the tick deadline
pub const MAX_EXTRA_WAKE_SOURCES: usize = MAX_WAKE_SOURCES - 1;

/// Configuration of a [`SleepScheduler`](crate::SleepScheduler)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Hardware and logical tick rates
    pub tick: TickConfig,

    /// Largest programmable hardware deadline
    pub max_deadline: u32,

    /// Smallest hardware deadline worth a trip into deep sleep
    pub min_hardware_ticks: u32,

    /// Smallest number of tick timer counts left to suppress the tick
    pub min_systick: u32,

    /// Level entered for a full deadline
    pub deep_level: SleepLevel,

    /// Level entered when the deadline is too short
    pub shallow_level: SleepLevel,

    /// Sources able to end a tickless sleep early
    wake_sources: Vec<WakeSource, MAX_EXTRA_WAKE_SOURCES>,
}

impl SchedulerConfig {
    /// Create a configuration for a tick setup with MAX32620 limits
    #[must_use]
    pub const fn new(tick: TickConfig) -> Self {
        Self {
            tick,
            max_deadline: MAX_SNOOZE,
            min_hardware_ticks: MIN_RTC_TICKS,
            min_systick: MIN_SYSTICK,
            deep_level: SleepLevel::Lp1,
            shallow_level: SleepLevel::Lp2,
            wake_sources: Vec::new(),
        }
    }

    /// Change the largest programmable hardware deadline
    #[must_use]
    pub fn with_max_deadline(mut self, max_deadline: u32) -> Self {
        self.max_deadline = max_deadline;
        self
    }

    /// Change the smallest hardware deadline worth a trip into deep sleep
    #[must_use]
    pub fn with_min_hardware_ticks(mut self, min_hardware_ticks: u32) -> Self {
        self.min_hardware_ticks = min_hardware_ticks;
        self
    }

    /// Change the sleep levels
    #[must_use]
    pub fn with_levels(mut self, deep_level: SleepLevel, shallow_level: SleepLevel) -> Self {
        self.deep_level = deep_level;
        self.shallow_level = shallow_level;
        self
    }

    /// Add a source able to end a tickless sleep early
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyWakeSources`] when the list is full,
    /// [`Error::ReservedComparator`] for RTC compare 1, which carries the
    /// tick deadline, and [`Error::InvalidPin`] for a missing GPIO pin.
    pub fn with_wake_source(mut self, source: WakeSource) -> Result<Self, Error> {
        check_extra_source(&source)?;
        self.wake_sources
            .push(source)
            .map_err(|_| Error::TooManyWakeSources)?;
        Ok(self)
    }

    /// Return the sources able to end a tickless sleep early
    #[must_use]
    pub fn wake_sources(&self) -> &[WakeSource] {
        &self.wake_sources
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLevel`] if the deep level loses state or is run
    /// mode, or if the shallow level is not shallower than the deep one or
    /// needs drivers to be drained, and [`Error::InvalidDeadlineLimit`] if the
    /// deadline limit does not cover a full logical tick.
    ///
    /// The shallow level is entered without asking the permission gate.
    pub fn validate(&self) -> Result<(), Error> {
        if self.shallow_level.requires_quiescence() || self.shallow_level.is_run_mode() {
            return Err(Error::InvalidLevel(self.shallow_level));
        }
        if !self.deep_level.preserves_state() || self.deep_level.is_run_mode() {
            return Err(Error::InvalidLevel(self.deep_level));
        }
        if self.shallow_level <= self.deep_level {
            return Err(Error::InvalidLevel(self.shallow_level));
        }

        let ratio = self.tick.ratio();
        if self.max_deadline / ratio < 1 {
            return Err(Error::InvalidDeadlineLimit {
                max_deadline: self.max_deadline,
                ratio,
            });
        }

        for source in &self.wake_sources {
            check_extra_source(source)?;
        }

        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(TickConfig::MAX32620)
    }
}

/// Check a source added next to the tick deadline
fn check_extra_source(source: &WakeSource) -> Result<(), Error> {
    if let WakeSource::RtcCompare {
        comparator: Comparator::Compare1,
        ..
    } = *source
    {
        return Err(Error::ReservedComparator(Comparator::Compare1));
    }
    source.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpioWake;

    #[test]
    fn default_is_valid() {
        let config = SchedulerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.tick.ratio(), 8);
        assert_eq!(config.max_deadline, 0x3FF);
        assert_eq!(config.min_hardware_ticks, 3);
        assert_eq!(config.min_systick, 2);
    }

    #[test]
    fn lp0_cannot_be_the_tickless_level() {
        let config = SchedulerConfig::default().with_levels(SleepLevel::Lp0, SleepLevel::Lp2);
        assert_eq!(config.validate(), Err(Error::InvalidLevel(SleepLevel::Lp0)));
    }

    #[test]
    fn shallow_level_must_not_stop_the_clocks() {
        let config = SchedulerConfig::default().with_levels(SleepLevel::Lp0, SleepLevel::Lp1);
        assert_eq!(config.validate(), Err(Error::InvalidLevel(SleepLevel::Lp1)));
    }

    #[test]
    fn shallow_level_must_be_shallower() {
        let config = SchedulerConfig::default().with_levels(SleepLevel::Lp2, SleepLevel::Lp1);
        assert_eq!(config.validate(), Err(Error::InvalidLevel(SleepLevel::Lp1)));

        let config = SchedulerConfig::default().with_levels(SleepLevel::Lp1, SleepLevel::Lp3);
        assert_eq!(config.validate(), Err(Error::InvalidLevel(SleepLevel::Lp3)));
    }

    #[test]
    fn deadline_limit_must_cover_a_tick() {
        let config = SchedulerConfig::default().with_max_deadline(7);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidDeadlineLimit {
                max_deadline: 7,
                ratio: 8
            })
        );
    }

    #[test]
    fn compare1_is_reserved() {
        let result = SchedulerConfig::default()
            .with_wake_source(WakeSource::rtc_after(Comparator::Compare1, 10));
        assert_eq!(
            result,
            Err(Error::ReservedComparator(Comparator::Compare1))
        );
    }

    #[test]
    fn wake_sources_are_bounded() {
        let mut config = SchedulerConfig::default();
        for pin in 0..7 {
            config = config
                .with_wake_source(WakeSource::GpioEdge(GpioWake::new(0, pin)))
                .unwrap();
        }
        assert_eq!(config.wake_sources().len(), 7);

        let result = config.with_wake_source(WakeSource::Watchdog);
        assert_eq!(result, Err(Error::TooManyWakeSources));
    }
}
