// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Data types for displaying elapsed time

use core::fmt::Display;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;

/// Time elapsed since boot, counted in ticks of a known rate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Uptime {
    /// Elapsed ticks
    ticks: u32,

    /// Ticks per second
    rate_hz: u32,
}

impl Uptime {
    /// Create an uptime from a tick count
    pub const fn new(ticks: u32, rate_hz: u32) -> Self {
        Self { ticks, rate_hz }
    }

    /// Return the whole seconds elapsed
    pub const fn seconds(&self) -> u32 {
        match self.ticks.checked_div(self.rate_hz) {
            Some(seconds) => seconds,
            None => 0,
        }
    }
}

impl Display for Uptime {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:#010x} ({} seconds)", self.ticks, self.seconds())
    }
}
