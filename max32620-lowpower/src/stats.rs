// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Sleep statistics

use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;

use heapless::HistoryBuffer;

use crate::SleepOutcome;
use crate::WakeFlags;
use crate::WakeTiming;

/// Number of wake-up records kept
pub const HISTORY_LENGTH: usize = 16;

/// Counters of idle attempts by outcome
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SleepCounters {
    /// Calls to the idle hook
    pub attempts: u32,

    /// Idle requests of zero ticks
    pub rejected: u32,

    /// Attempts deferred because the tick interrupt was imminent
    pub deferred: u32,

    /// Attempts ending in shallow sleep
    pub shallow: u32,

    /// Attempts aborted after arming
    pub aborted: u32,

    /// Attempts failed because of a driver misuse
    pub failed: u32,

    /// Completed deep sleeps
    pub slept: u32,

    /// Deep sleeps ended early by another source
    pub early_wakes: u32,

    /// Deep sleeps ended past the deadline without the timer flag
    pub late_wakes: u32,

    /// Logical ticks credited to the task scheduler
    pub credited_ticks: u64,
}

/// A completed deep sleep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WakeRecord {
    /// Idle ticks requested by the task scheduler
    pub requested: u32,

    /// Idle ticks covered after clamping to the hardware limit
    pub idle_ticks: u32,

    /// Hardware ticks armed
    pub armed: u32,

    /// Hardware ticks actually slept
    pub slept: u32,

    /// Logical ticks credited
    pub credited: u32,

    /// Latched wake-up causes
    pub flags: WakeFlags,

    /// How the wake-up relates to the deadline
    pub timing: WakeTiming,
}

/// Statistics of a sleep scheduler
pub struct SleepStats {
    /// Counters by outcome
    counters: SleepCounters,

    /// Most recent deep sleeps
    history: HistoryBuffer<WakeRecord, HISTORY_LENGTH>,
}

impl SleepStats {
    /// Create empty statistics
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: SleepCounters {
                attempts: 0,
                rejected: 0,
                deferred: 0,
                shallow: 0,
                aborted: 0,
                failed: 0,
                slept: 0,
                early_wakes: 0,
                late_wakes: 0,
                credited_ticks: 0,
            },
            history: HistoryBuffer::new(),
        }
    }

    /// Return the counters
    #[must_use]
    pub const fn counters(&self) -> &SleepCounters {
        &self.counters
    }

    /// Return the most recent deep sleep
    #[must_use]
    pub fn last_wake(&self) -> Option<&WakeRecord> {
        self.history.recent()
    }

    /// Iterate over the most recent deep sleeps, oldest first
    pub fn history(&self) -> impl Iterator<Item = &WakeRecord> {
        self.history.oldest_ordered()
    }

    /// Record the outcome of an idle attempt
    pub fn record(&mut self, outcome: &SleepOutcome) {
        let counters = &mut self.counters;
        counters.attempts = counters.attempts.wrapping_add(1);

        match *outcome {
            SleepOutcome::Rejected => counters.rejected = counters.rejected.wrapping_add(1),
            SleepOutcome::Deferred => counters.deferred = counters.deferred.wrapping_add(1),
            SleepOutcome::Shallow => counters.shallow = counters.shallow.wrapping_add(1),
            SleepOutcome::Aborted(_) => counters.aborted = counters.aborted.wrapping_add(1),
            SleepOutcome::Failed(_) => counters.failed = counters.failed.wrapping_add(1),
            SleepOutcome::Slept {
                credited, timing, ..
            } => {
                counters.slept = counters.slept.wrapping_add(1);
                counters.credited_ticks = counters.credited_ticks.wrapping_add(u64::from(credited));
                match timing {
                    WakeTiming::OnTime => {}
                    WakeTiming::Early { .. } => {
                        counters.early_wakes = counters.early_wakes.wrapping_add(1);
                    }
                    WakeTiming::Late { .. } => {
                        counters.late_wakes = counters.late_wakes.wrapping_add(1);
                    }
                }
            }
        }
    }

    /// Record the details of a completed deep sleep
    pub fn record_wake(&mut self, record: WakeRecord) {
        self.history.write(record);
    }
}

impl Default for SleepStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SleepStats {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter
            .debug_struct("SleepStats")
            .field("counters", &self.counters)
            .field("history", &self.history.len())
            .finish()
    }
}
