// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Reconciliation of hardware sleep time with the logical tick count
//!
//! The wake-up timer runs faster than the logical tick, so a sleep rarely
//! lasts a whole number of logical ticks. The hardware ticks left over are
//! carried to the next sleep as a residual, and no time is lost over many
//! cycles.

use log::warn;

use crate::TickConfig;
use crate::Wake;
use crate::WakeFlags;
use crate::WakeSource;

/// The deadline a sleep was armed with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmedDeadline {
    /// Hardware ticks programmed
    pub hardware_ticks: u32,

    /// Counter value the wake-up timer was set to
    pub target: u32,
}

/// How a wake-up relates to the armed deadline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WakeTiming {
    /// The wake-up timer fired
    OnTime,

    /// Another source woke the chip before the deadline
    Early {
        /// Hardware ticks left before the deadline
        by: u32,
    },

    /// The chip woke at or after the deadline without the timer flag
    Late {
        /// Hardware ticks past the deadline
        by: u32,
    },
}

/// Result of a reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Hardware ticks actually spent asleep
    pub hardware_ticks: u32,

    /// Logical ticks to credit to the task scheduler
    pub credited: u32,

    /// Hardware ticks carried to the next sleep
    pub residual: u32,

    /// How the wake-up relates to the deadline
    pub timing: WakeTiming,
}

/// Converter of hardware sleep time to logical ticks, carrying the remainder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickReconciler {
    /// Hardware ticks per logical tick
    ratio: u32,

    /// Hardware ticks not yet credited
    residual: u32,

    /// Flags meaning the wake-up timer fired
    designated: WakeFlags,
}

impl TickReconciler {
    /// Create a reconciler with no residual
    ///
    /// A wake-up carrying the flags of the timer source reached the deadline.
    #[must_use]
    pub const fn new(tick: TickConfig, timer: &WakeSource) -> Self {
        Self {
            ratio: tick.ratio(),
            residual: 0,
            designated: timer.flags(),
        }
    }

    /// Start from a given residual
    #[cfg(test)]
    const fn with_residual(self, residual: u32) -> Self {
        Self { residual, ..self }
    }

    /// Return the hardware ticks not yet credited
    #[must_use]
    pub const fn residual(&self) -> u32 {
        self.residual
    }

    /// Return the flags meaning the wake-up timer fired
    #[must_use]
    pub const fn designated(&self) -> WakeFlags {
        self.designated
    }

    /// Compute the hardware ticks spent asleep
    #[must_use]
    pub fn elapsed(&self, armed: ArmedDeadline, wake: &Wake) -> (u32, WakeTiming) {
        if wake.flags.intersects(self.designated) {
            return (armed.hardware_ticks, WakeTiming::OnTime);
        }

        #[expect(
            clippy::cast_possible_wrap,
            reason = "Counter distances are far below half the counter range"
        )]
        let difference = wake.snapshot.wrapping_sub(armed.target) as i32;

        if difference < 0 {
            let early = difference.unsigned_abs();
            (
                armed.hardware_ticks.saturating_sub(early),
                WakeTiming::Early { by: early },
            )
        } else {
            let late = difference.unsigned_abs();
            warn!(
                "Woke up {late} ticks past the deadline without the timer flag (flags: {:?})",
                wake.flags,
            );
            (
                armed.hardware_ticks.saturating_add(late),
                WakeTiming::Late { by: late },
            )
        }
    }

    /// Fold a wake-up into logical ticks
    pub fn reconcile(&mut self, armed: ArmedDeadline, wake: &Wake) -> Reconciliation {
        let (hardware_ticks, timing) = self.elapsed(armed, wake);

        let total = hardware_ticks.saturating_add(self.residual);
        let credited = total / self.ratio.max(1);
        self.residual = total % self.ratio.max(1);

        Reconciliation {
            hardware_ticks,
            credited,
            residual: self.residual,
            timing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Comparator;

    fn armed(hardware_ticks: u32, target: u32) -> ArmedDeadline {
        ArmedDeadline {
            hardware_ticks,
            target,
        }
    }

    fn wake(snapshot: u32, flags: WakeFlags) -> Wake {
        Wake { snapshot, flags }
    }

    fn reconciler() -> TickReconciler {
        let timer = WakeSource::rtc_after(Comparator::Compare1, 0);
        TickReconciler::new(TickConfig::MAX32620, &timer)
    }

    #[test]
    fn timer_flags_are_designated() {
        assert_eq!(reconciler().designated(), WakeFlags::RTC_COMPARE1);

        let timer = WakeSource::rtc_after(Comparator::Compare0, 0);
        let mut reconciler = TickReconciler::new(TickConfig::MAX32620, &timer);
        let result = reconciler.reconcile(armed(72, 1072), &wake(1067, WakeFlags::RTC_COMPARE1));
        assert_eq!(result.timing, WakeTiming::Early { by: 5 });
    }

    #[test]
    fn designated_wake_credits_full_deadline() {
        let mut reconciler = reconciler();
        let result = reconciler.reconcile(armed(72, 1072), &wake(1074, WakeFlags::RTC_COMPARE1));

        assert_eq!(
            result,
            Reconciliation {
                hardware_ticks: 72,
                credited: 9,
                residual: 0,
                timing: WakeTiming::OnTime,
            }
        );
    }

    #[test]
    fn early_wake_with_residual() {
        let mut reconciler = reconciler().with_residual(3);
        let result = reconciler.reconcile(armed(72, 1072), &wake(1067, WakeFlags::GPIO));

        assert_eq!(
            result,
            Reconciliation {
                hardware_ticks: 67,
                credited: 8,
                residual: 6,
                timing: WakeTiming::Early { by: 5 },
            }
        );
        assert_eq!(reconciler.residual(), 6);
    }

    #[test]
    fn late_wake_without_flag_counts_the_overrun() {
        let mut reconciler = reconciler();
        let result = reconciler.reconcile(armed(72, 1072), &wake(1076, WakeFlags::empty()));

        assert_eq!(result.hardware_ticks, 76);
        assert_eq!(result.credited, 9);
        assert_eq!(result.residual, 4);
        assert_eq!(result.timing, WakeTiming::Late { by: 4 });
    }

    #[test]
    fn difference_is_wrap_safe() {
        let mut reconciler = reconciler();
        let target = 20_u32;
        let snapshot = 0xFFFF_FFF0_u32;

        let result = reconciler.reconcile(armed(72, target), &wake(snapshot, WakeFlags::GPIO));
        assert_eq!(result.timing, WakeTiming::Early { by: 36 });
        assert_eq!(result.hardware_ticks, 36);
    }

    #[test]
    fn early_wake_saturates_at_zero() {
        let mut reconciler = reconciler();
        let result = reconciler.reconcile(armed(8, 100), &wake(50, WakeFlags::GPIO));
        assert_eq!(result.hardware_ticks, 0);
        assert_eq!(result.credited, 0);
    }

    #[test]
    fn residual_earns_a_bonus_tick_on_the_eighth_cycle() {
        let mut reconciler = reconciler();
        let mut credits = [0; 8];

        for credit in &mut credits {
            // 65 hardware ticks, one more than eight full logical ticks
            let result = reconciler.reconcile(armed(72, 1000), &wake(993, WakeFlags::GPIO));
            assert!(result.residual < 8);
            *credit = result.credited;
        }

        assert_eq!(credits, [8, 8, 8, 8, 8, 8, 8, 9]);
        assert_eq!(reconciler.residual(), 0);
    }

    #[test]
    fn hardware_time_is_conserved() {
        let mut reconciler = reconciler();
        let pattern = [0_u32, 5, 71, 13, 0, 1, 64, 33, 7, 0, 22, 50];

        let mut slept = 0;
        let mut credited = 0;
        for early in pattern {
            let snapshot = 5000 - early;
            let flags = if early == 0 {
                WakeFlags::RTC_COMPARE1
            } else {
                WakeFlags::GPIO
            };
            let result = reconciler.reconcile(armed(72, 5000), &wake(snapshot, flags));
            slept += result.hardware_ticks;
            credited += result.credited;
            assert!(reconciler.residual() < 8);
        }

        assert_eq!(credited * 8 + reconciler.residual(), slept);
    }
}
