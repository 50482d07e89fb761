// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Capabilities consumed from peripheral drivers and from the task scheduler
//!
//! Register-level access lives outside this crate. Boards implement these
//! traits on top of their peripheral access layer, the [`sim`](crate::sim)
//! module implements them on a simulated chip.

use crate::Comparator;
use crate::ResetCause;
use crate::SleepLevel;
use crate::WakeFlags;
use crate::WakeSource;

/// An interrupt line at the interrupt controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrqLine {
    /// RTC compare 0
    Rtc0,

    /// RTC compare 1
    Rtc1,

    /// RTC prescaler compare
    RtcPrescaler,

    /// A GPIO port
    Gpio(u8),

    /// USB controller
    Usb,

    /// Low-power watchdog
    Watchdog,
}

/// An RTC event with its own interrupt enable and flag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RtcEvent {
    /// Compare 0 matched
    Compare0,

    /// Compare 1 matched
    Compare1,

    /// Prescaler compare matched
    Prescaler,
}

impl From<Comparator> for RtcEvent {
    fn from(comparator: Comparator) -> Self {
        match comparator {
            Comparator::Compare0 => Self::Compare0,
            Comparator::Compare1 => Self::Compare1,
        }
    }
}

/// The real-time clock used as wake-up timer
pub trait Rtc {
    /// Read the free-running counter
    fn count(&self) -> u32;

    /// Read a comparator
    fn compare(&self, comparator: Comparator) -> u32;

    /// Set a comparator to an absolute counter value
    fn set_compare(&mut self, comparator: Comparator, value: u32);

    /// Set compare 1 to the current counter plus `ticks`
    fn snooze(&mut self, ticks: u32);

    /// Enable the interrupt of an event
    fn enable_interrupt(&mut self, event: RtcEvent);

    /// Disable the interrupt of an event
    fn disable_interrupt(&mut self, event: RtcEvent);

    /// Clear the latched flag of an event
    fn clear_flag(&mut self, event: RtcEvent);

    /// Whether a register write is still crossing into the RTC clock domain
    fn is_synchronising(&self) -> bool;
}

/// The power sequencer controlling sleep levels and wake-up detection
pub trait PowerSequencer {
    /// Disable every wake-up detector
    fn clear_wake_config(&mut self);

    /// Enable wake-up detection for a source
    fn configure_wake(&mut self, source: &WakeSource);

    /// Clear all latched wake-up flags
    fn clear_wake_flags(&mut self);

    /// Read the latched wake-up flags
    fn wake_flags(&self) -> WakeFlags;

    /// Enter a sleep level and return once woken up
    ///
    /// On hardware, entering [`SleepLevel::Lp0`] does not return: the chip
    /// restarts from reset. Entering [`SleepLevel::Lp3`] returns immediately.
    fn enter(&mut self, level: SleepLevel);

    /// Read the cause of the last reset
    fn reset_cause(&self) -> ResetCause;
}

/// The interrupt controller
pub trait InterruptController {
    /// Enable an interrupt line
    fn enable(&mut self, line: IrqLine);

    /// Disable an interrupt line
    fn disable(&mut self, line: IrqLine);

    /// Clear a pending interrupt
    fn unpend(&mut self, line: IrqLine);

    /// Whether an interrupt is pending
    fn is_pending(&self, line: IrqLine) -> bool;

    /// Whether an interrupt line is enabled
    fn is_enabled(&self, line: IrqLine) -> bool;
}

/// The global interrupt mask
pub trait InterruptMask {
    /// Mask all interrupts
    fn mask(&self);

    /// Unmask all interrupts
    fn unmask(&self);

    /// Mask all interrupts until the returned guard is dropped
    fn masked(&self) -> MaskGuard<'_, Self>
    where
        Self: Sized,
    {
        self.mask();
        MaskGuard { mask: self }
    }
}

/// A scope with all interrupts masked
///
/// Interrupts raised while masked stay pending and still wake the core up
/// from sleep. They are serviced once the guard is dropped.
#[must_use = "interrupts are unmasked as soon as the guard is dropped"]
pub struct MaskGuard<'mask, M>
where
    M: InterruptMask,
{
    /// Mask to release on drop
    mask: &'mask M,
}

impl<M> Drop for MaskGuard<'_, M>
where
    M: InterruptMask,
{
    fn drop(&mut self) {
        self.mask.unmask();
    }
}

/// Answer of the task scheduler to a late sleep confirmation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepStatus {
    /// A task became ready or a context switch is pending
    Abort,

    /// Sleep is allowed, a task is waiting for a timeout
    Standard,

    /// Sleep is allowed, no task is waiting for a timeout
    NoTasksWaitingTimeout,
}

/// The task scheduler whose tick is suppressed while idle
pub trait TaskScheduler {
    /// Confirm that sleeping is still allowed, called with interrupts masked
    fn confirm_sleep(&self) -> SleepStatus;

    /// Advance the tick count by a number of ticks spent asleep
    fn step_tick(&mut self, ticks: u32);

    /// Counts left before the tick timer fires
    fn systick_remaining(&self) -> u32;
}

/// A driver is still busy and cannot sleep yet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Busy;

/// A driver that must quiesce before deep sleep
pub trait PrepareForSleep {
    /// Try to get ready for deep sleep
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] while the driver still has work in flight.
    fn prepare_for_sleep(&mut self) -> Result<(), Busy>;
}

/// Retry preparing a driver until it is ready for deep sleep
///
/// There is no upper bound on the number of attempts.
pub fn prepare_blocking<D>(device: &mut D)
where
    D: PrepareForSleep + ?Sized,
{
    while device.prepare_for_sleep().is_err() {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    struct CountingMask {
        masked: Cell<bool>,
        unmasks: Cell<u32>,
    }

    impl InterruptMask for CountingMask {
        fn mask(&self) {
            self.masked.set(true);
        }

        fn unmask(&self) {
            self.masked.set(false);
            self.unmasks.set(self.unmasks.get() + 1);
        }
    }

    struct Uart {
        pending: u32,
        attempts: u32,
    }

    impl PrepareForSleep for Uart {
        fn prepare_for_sleep(&mut self) -> Result<(), Busy> {
            self.attempts += 1;
            if self.pending == 0 {
                Ok(())
            } else {
                self.pending -= 1;
                Err(Busy)
            }
        }
    }

    #[test]
    fn guard_unmasks_on_drop() {
        let mask = CountingMask {
            masked: Cell::new(false),
            unmasks: Cell::new(0),
        };

        {
            let _guard = mask.masked();
            assert!(mask.masked.get());
        }

        assert!(!mask.masked.get());
        assert_eq!(mask.unmasks.get(), 1);
    }

    #[test]
    fn guard_unmasks_on_early_return() {
        fn bail_out(mask: &CountingMask) -> Option<()> {
            let _guard = mask.masked();
            None?;
            Some(())
        }

        let mask = CountingMask {
            masked: Cell::new(false),
            unmasks: Cell::new(0),
        };
        assert_eq!(bail_out(&mask), None);
        assert!(!mask.masked.get());
    }

    #[test]
    fn prepare_blocking_retries_until_ready() {
        let mut uart = Uart {
            pending: 4,
            attempts: 0,
        };
        prepare_blocking(&mut uart);
        assert_eq!(uart.attempts, 5);
        assert_eq!(uart.pending, 0);
    }

    #[test]
    fn comparator_maps_to_event() {
        assert_eq!(RtcEvent::from(Comparator::Compare0), RtcEvent::Compare0);
        assert_eq!(RtcEvent::from(Comparator::Compare1), RtcEvent::Compare1);
    }
}
