// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Reset cause and boot mode

use crate::driver::PowerSequencer;

/// Cause of the last reset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResetCause {
    /// Power was applied
    PowerOn,

    /// A wake-up source ended an LP0 sleep
    Lp0Wake,

    /// The watchdog expired
    Watchdog,

    /// The reset pin was asserted
    External,
}

/// How the application was started
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BootMode {
    /// Cold start or manual reset
    FirstBoot,

    /// Restart after an LP0 sleep
    ResumeFromLp0,

    /// Restart after a watchdog expiry
    WatchdogRecovery,
}

impl BootMode {
    /// Detect the boot mode from the power sequencer reset cause
    pub fn detect<P>(power: &P) -> Self
    where
        P: PowerSequencer + ?Sized,
    {
        Self::from(power.reset_cause())
    }
}

impl From<ResetCause> for BootMode {
    fn from(cause: ResetCause) -> Self {
        match cause {
            ResetCause::PowerOn | ResetCause::External => Self::FirstBoot,
            ResetCause::Lp0Wake => Self::ResumeFromLp0,
            ResetCause::Watchdog => Self::WatchdogRecovery,
        }
    }
}
