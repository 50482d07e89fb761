// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Data structures and functions for error handling

use crate::ArbiterState;
use crate::Comparator;
use crate::SleepLevel;

/// An error
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The hardware counter rate is not an exact multiple of the tick rate
    InvalidTickRatio {
        /// Hardware wake-up counter rate
        hardware_hz: u32,

        /// Logical tick rate
        tick_hz: u32,
    },

    /// A sleep level cannot be used for the requested role
    InvalidLevel(SleepLevel),

    /// The hardware deadline limit does not cover a single logical tick
    InvalidDeadlineLimit {
        /// Largest programmable hardware deadline
        max_deadline: u32,

        /// Hardware ticks per logical tick
        ratio: u32,
    },

    /// The wake-source arbiter was driven out of order
    InvalidState {
        /// State the operation requires
        expected: ArbiterState,

        /// State the arbiter was in
        actual: ArbiterState,
    },

    /// More wake sources than the arbiter can track
    TooManyWakeSources,

    /// A GPIO wake-up source refers to a pin that does not exist
    InvalidPin {
        /// GPIO port
        port: u8,

        /// Pin within the port
        pin: u8,
    },

    /// A comparator is reserved for the tick deadline
    ReservedComparator(Comparator),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}
