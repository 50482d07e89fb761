// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Flags shared between interrupt handlers and the idle path

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::WakeFlags;

/// Signal carrying the causes of the last tickless wake-up
pub type WakeSignal = Signal<CriticalSectionRawMutex, WakeFlags>;

/// A one-slot event flag
///
/// An interrupt handler signals completion, the consumer takes the flag.
#[derive(Debug, Default)]
pub struct EventFlag(AtomicBool);

impl EventFlag {
    /// Create a cleared flag
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Set the flag
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag and return whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Whether the flag is set
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// An application switch vetoing deep sleep
///
/// Works as an application [`SleepPermit`](crate::SleepPermit) when borrowed.
#[derive(Debug, Default)]
pub struct BusyFlag(AtomicBool);

impl BusyFlag {
    /// Create a flag that allows deep sleep
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Create a flag that vetoes deep sleep
    #[must_use]
    pub const fn busy() -> Self {
        Self(AtomicBool::new(true))
    }

    /// Veto or allow deep sleep
    pub fn set_busy(&self, busy: bool) {
        self.0.store(busy, Ordering::Release);
    }

    /// Whether deep sleep is vetoed
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_flag_is_taken_once() {
        let flag = EventFlag::new();
        assert!(!flag.take());

        flag.signal();
        flag.signal();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.is_set());
    }

    #[test]
    fn busy_flag_toggles() {
        let flag = BusyFlag::busy();
        assert!(flag.is_busy());
        flag.set_busy(false);
        assert!(!flag.is_busy());
    }

    #[test]
    fn wake_signal_keeps_last_value() {
        let signal = WakeSignal::new();
        assert_eq!(signal.try_take(), None);

        signal.signal(WakeFlags::GPIO);
        signal.signal(WakeFlags::RTC_COMPARE1);
        assert_eq!(signal.try_take(), Some(WakeFlags::RTC_COMPARE1));
        assert_eq!(signal.try_take(), None);
    }
}
