// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Arming and disarming of wake-up sources
//!
//! The arbiter walks a fixed sequence of states.
//!
//! ```text
//! Idle --arm--> Armed --sleep--> Asleep --wake-up--> Woken
//!   ^             |                                    |
//!   +---disarm----+-------------disarm-----------------+
//! ```
//!
//! Every arm starts from a blank wake-up configuration, so a source armed for
//! an earlier sleep cannot end a later one.
//!
//! The arbiter owns the RTC lines it arms, and any other line only while the
//! application has not enabled it. Disarming leaves an application line
//! enabled and pending, so its handler still runs once interrupts are
//! unmasked.

use heapless::Vec;
use log::debug;
use log::trace;

use crate::driver::InterruptController;
use crate::driver::IrqLine;
use crate::driver::InterruptMask;
use crate::driver::PowerSequencer;
use crate::driver::Rtc;
use crate::Comparator;
use crate::Error;
use crate::RtcDeadline;
use crate::SleepLevel;
use crate::WakeFlags;
use crate::WakeSource;

/// Number of wake-up sources that can be armed at once
pub const MAX_WAKE_SOURCES: usize = 8;

/// State of a wake-up arbiter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArbiterState {
    /// No source armed
    Idle,

    /// Sources armed, not yet asleep
    Armed,

    /// Sleeping
    Asleep,

    /// Woken up, sources still armed
    Woken,
}

/// A wake-up as observed by the arbiter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wake {
    /// RTC counter read right after waking up
    pub snapshot: u32,

    /// Latched wake-up causes
    pub flags: WakeFlags,
}

/// Owner of the peripherals involved in sleeping and waking up
pub struct WakeArbiter<RTC, PWR, IC> {
    /// Real-time clock
    rtc: RTC,

    /// Power sequencer
    power: PWR,

    /// Interrupt controller
    interrupts: IC,

    /// Current state
    state: ArbiterState,

    /// Sources armed since the last disarm
    armed: Vec<WakeSource, MAX_WAKE_SOURCES>,

    /// Application lines that were already enabled when armed
    preserved: Vec<IrqLine, MAX_WAKE_SOURCES>,
}

impl<RTC, PWR, IC> WakeArbiter<RTC, PWR, IC>
where
    RTC: Rtc,
    PWR: PowerSequencer,
    IC: InterruptController,
{
    /// Create a new arbiter with no source armed
    pub const fn new(rtc: RTC, power: PWR, interrupts: IC) -> Self {
        Self {
            rtc,
            power,
            interrupts,
            state: ArbiterState::Idle,
            armed: Vec::new(),
            preserved: Vec::new(),
        }
    }

    /// Return the current state
    pub const fn state(&self) -> ArbiterState {
        self.state
    }

    /// Return the sources armed since the last disarm
    pub fn armed(&self) -> &[WakeSource] {
        &self.armed
    }

    /// Return the real-time clock
    pub const fn rtc(&self) -> &RTC {
        &self.rtc
    }

    /// Return the power sequencer
    pub const fn power(&self) -> &PWR {
        &self.power
    }

    /// Return the power sequencer mutably
    pub fn power_mut(&mut self) -> &mut PWR {
        &mut self.power
    }

    /// Return the interrupt controller
    pub const fn interrupts(&self) -> &IC {
        &self.interrupts
    }

    /// Arm a set of wake-up sources
    ///
    /// The wake-up configuration and any stale wake-up flag are cleared
    /// first. Interrupt lines are not enabled until [`sleep`](Self::sleep).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the arbiter is idle,
    /// [`Error::TooManyWakeSources`] for more than [`MAX_WAKE_SOURCES`]
    /// sources and [`Error::InvalidPin`] for a GPIO source on a missing pin.
    pub fn arm(&mut self, sources: &[WakeSource]) -> Result<(), Error> {
        self.expect_state(ArbiterState::Idle)?;
        if sources.len() > MAX_WAKE_SOURCES {
            return Err(Error::TooManyWakeSources);
        }
        for source in sources {
            source.validate()?;
        }

        trace!("Arm {} wake-up sources", sources.len());
        self.power.clear_wake_config();
        self.power.clear_wake_flags();
        self.armed.clear();
        self.preserve_enabled_lines(sources);

        for source in sources {
            self.arm_source(source);
            if self.armed.push(*source).is_err() {
                self.disarm();
                return Err(Error::TooManyWakeSources);
            }
        }

        self.state = ArbiterState::Armed;
        Ok(())
    }

    /// Remember the application lines enabled before arming
    fn preserve_enabled_lines(&mut self, sources: &[WakeSource]) {
        self.preserved.clear();
        for source in sources.iter().filter(|source| source.rtc_event().is_none()) {
            let line = source.irq_line();
            if !self.interrupts.is_enabled(line) || self.preserved.contains(&line) {
                continue;
            }
            if self.preserved.push(line).is_err() {
                debug!("Cannot remember line {line:?} as enabled");
            }
        }
    }

    /// Enable a single source at peripheral level
    fn arm_source(&mut self, source: &WakeSource) {
        if let WakeSource::RtcCompare {
            comparator,
            deadline,
        } = *source
        {
            let event = comparator.into();
            self.rtc.disable_interrupt(event);
            self.rtc.clear_flag(event);
            match (comparator, deadline) {
                (Comparator::Compare1, RtcDeadline::After(ticks)) => self.rtc.snooze(ticks),
                (Comparator::Compare0, RtcDeadline::After(ticks)) => {
                    let target = self.rtc.count().wrapping_add(ticks);
                    self.rtc.set_compare(comparator, target);
                }
                (_, RtcDeadline::At(count)) => self.rtc.set_compare(comparator, count),
            }
            self.rtc.enable_interrupt(event);
        } else if let Some(event) = source.rtc_event() {
            self.rtc.clear_flag(event);
            self.rtc.enable_interrupt(event);
        } else {
            trace!("Source {source:?} needs no peripheral setup");
        }

        self.power.configure_wake(source);
    }

    /// Enter a sleep level with the armed sources
    ///
    /// RTC lines still pending from an earlier deadline are cleared. Other
    /// pending lines are kept and end the sleep at once. Interrupt lines are
    /// enabled at the controller as the last step before entering. The RTC
    /// counter is read first on wake-up, before the latched flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless sources are armed.
    pub fn sleep(&mut self, level: SleepLevel) -> Result<Wake, Error> {
        self.expect_state(ArbiterState::Armed)?;

        self.power.clear_wake_flags();
        while self.rtc.is_synchronising() {
            core::hint::spin_loop();
        }

        for source in self.armed.iter().filter(|source| source.rtc_event().is_some()) {
            self.interrupts.unpend(source.irq_line());
        }
        for source in &self.armed {
            self.interrupts.enable(source.irq_line());
        }

        trace!("Enter {level}");
        self.state = ArbiterState::Asleep;
        self.power.enter(level);

        let snapshot = self.rtc.count();
        let flags = self.power.wake_flags();
        self.state = ArbiterState::Woken;
        trace!("Woke up from {level} at {snapshot:#010x} with flags {flags:?}");

        Ok(Wake { snapshot, flags })
    }

    /// Disable every armed source and return to idle
    ///
    /// RTC lines are disabled and cleared, and so is any other line the
    /// application had not enabled before arming. A line the application had
    /// enabled is left alone: it stays enabled, and an edge that woke the
    /// chip up stays pending for its handler.
    ///
    /// Calling this twice leaves the peripherals in the same state as calling
    /// it once.
    pub fn disarm(&mut self) {
        for source in &self.armed {
            let line = source.irq_line();
            if let Some(event) = source.rtc_event() {
                self.interrupts.disable(line);
                self.interrupts.unpend(line);
                self.rtc.disable_interrupt(event);
                self.rtc.clear_flag(event);
            } else if !self.preserved.contains(&line) {
                self.interrupts.disable(line);
                self.interrupts.unpend(line);
            }
        }
        self.armed.clear();
        self.preserved.clear();

        self.power.clear_wake_config();
        self.power.clear_wake_flags();
        self.state = ArbiterState::Idle;
    }

    /// Sleep once with interrupts masked
    ///
    /// Arms the sources, sleeps and disarms them again. Entering run mode
    /// returns immediately with no flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be armed.
    pub fn enter<M>(
        &mut self,
        mask: &M,
        level: SleepLevel,
        sources: &[WakeSource],
    ) -> Result<WakeFlags, Error>
    where
        M: InterruptMask,
    {
        if level.is_run_mode() {
            return Ok(WakeFlags::empty());
        }

        let _guard = mask.masked();
        self.arm(sources)?;
        let wake = self.sleep(level);
        self.disarm();

        wake.map(|wake| wake.flags)
    }

    /// Sleep until a designated source wakes the chip up
    ///
    /// The closure is called after every other wake-up, after the sources
    /// are disarmed and interrupts unmasked. Relative RTC deadlines are fixed
    /// once before the first sleep.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be armed.
    pub fn sleep_until<M, F>(
        &mut self,
        mask: &M,
        level: SleepLevel,
        sources: &[WakeSource],
        designated: WakeFlags,
        mut on_wake: F,
    ) -> Result<WakeFlags, Error>
    where
        M: InterruptMask,
        F: FnMut(WakeFlags),
    {
        let sources = self.resolve(sources)?;

        loop {
            let flags = self.enter(mask, level, &sources)?;
            if flags.intersects(designated) {
                debug!("Designated wake-up {flags:?}");
                return Ok(flags);
            }
            on_wake(flags);
        }
    }

    /// Replace relative RTC deadlines with absolute counter values
    fn resolve(
        &self,
        sources: &[WakeSource],
    ) -> Result<Vec<WakeSource, MAX_WAKE_SOURCES>, Error> {
        let now = self.rtc.count();
        let mut resolved = Vec::new();
        for source in sources {
            let source = match *source {
                WakeSource::RtcCompare {
                    comparator,
                    deadline: RtcDeadline::After(ticks),
                } => WakeSource::rtc_at(comparator, now.wrapping_add(ticks)),
                other => other,
            };
            resolved
                .push(source)
                .map_err(|_| Error::TooManyWakeSources)?;
        }
        Ok(resolved)
    }

    /// Check the current state
    fn expect_state(&self, expected: ArbiterState) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}
