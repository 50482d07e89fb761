// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Wake-up sources and latched wake-up flags

use core::ops::BitOr;
use core::ops::BitOrAssign;

use crate::driver::IrqLine;
use crate::driver::RtcEvent;
use crate::Error;

/// Number of GPIO ports on MAX32620
pub const GPIO_PORTS: u8 = 7;

/// Number of pins on each GPIO port
pub const GPIO_PINS_PER_PORT: u8 = 8;

/// An RTC comparator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// Compare register 0
    Compare0,

    /// Compare register 1, also the target of the snooze mechanism
    Compare1,
}

/// When an RTC comparator fires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RtcDeadline {
    /// A number of counter ticks after the source is armed
    After(u32),

    /// An absolute counter value
    At(u32),
}

/// Active level of a GPIO wake-up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Polarity {
    /// Wake up on a falling edge
    ActiveLow,

    /// Wake up on a rising edge
    ActiveHigh,
}

/// Weak pull resistor of a GPIO wake-up pin
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pull {
    /// No pull resistor
    None,

    /// Weak pull-up
    Up,

    /// Weak pull-down
    Down,
}

/// A GPIO edge wake-up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpioWake {
    /// GPIO port
    pub port: u8,

    /// Pin within the port
    pub pin: u8,

    /// Edge that wakes the chip
    pub polarity: Polarity,

    /// Pull resistor kept active during sleep
    pub pull: Pull,
}

impl GpioWake {
    /// Create a GPIO wake-up for a push-button, active low with pull-up
    #[must_use]
    pub const fn new(port: u8, pin: u8) -> Self {
        Self {
            port,
            pin,
            polarity: Polarity::ActiveLow,
            pull: Pull::Up,
        }
    }

    /// Change the wake-up edge
    #[must_use]
    pub const fn with_polarity(self, polarity: Polarity) -> Self {
        Self { polarity, ..self }
    }

    /// Change the pull resistor
    #[must_use]
    pub const fn with_pull(self, pull: Pull) -> Self {
        Self { pull, ..self }
    }

    /// Check that the pin exists
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPin`] for a port or pin out of range.
    pub const fn validate(&self) -> Result<(), Error> {
        if self.port >= GPIO_PORTS || self.pin >= GPIO_PINS_PER_PORT {
            return Err(Error::InvalidPin {
                port: self.port,
                pin: self.pin,
            });
        }
        Ok(())
    }
}

/// A hardware event able to end a sleep
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WakeSource {
    /// An RTC comparator match
    RtcCompare {
        /// Comparator to use
        comparator: Comparator,

        /// When the comparator fires
        deadline: RtcDeadline,
    },

    /// The RTC prescaler compare, a periodic wake-up
    RtcPrescaler,

    /// An edge on a GPIO pin
    GpioEdge(GpioWake),

    /// A change of the USB VBUS line
    UsbVbus {
        /// Wake up when a cable is connected
        plug: bool,

        /// Wake up when a cable is disconnected
        remove: bool,
    },

    /// The low-power watchdog
    Watchdog,
}

impl WakeSource {
    /// Create an RTC compare wake-up some counter ticks after arming
    #[must_use]
    pub const fn rtc_after(comparator: Comparator, ticks: u32) -> Self {
        Self::RtcCompare {
            comparator,
            deadline: RtcDeadline::After(ticks),
        }
    }

    /// Create an RTC compare wake-up at an absolute counter value
    #[must_use]
    pub const fn rtc_at(comparator: Comparator, count: u32) -> Self {
        Self::RtcCompare {
            comparator,
            deadline: RtcDeadline::At(count),
        }
    }

    /// Return the interrupt line this source is delivered on
    #[must_use]
    pub const fn irq_line(&self) -> IrqLine {
        match *self {
            Self::RtcCompare {
                comparator: Comparator::Compare0,
                ..
            } => IrqLine::Rtc0,
            Self::RtcCompare {
                comparator: Comparator::Compare1,
                ..
            } => IrqLine::Rtc1,
            Self::RtcPrescaler => IrqLine::RtcPrescaler,
            Self::GpioEdge(gpio) => IrqLine::Gpio(gpio.port),
            Self::UsbVbus { .. } => IrqLine::Usb,
            Self::Watchdog => IrqLine::Watchdog,
        }
    }

    /// Return the RTC event behind this source, if it is an RTC source
    #[must_use]
    pub const fn rtc_event(&self) -> Option<RtcEvent> {
        match *self {
            Self::RtcCompare {
                comparator: Comparator::Compare0,
                ..
            } => Some(RtcEvent::Compare0),
            Self::RtcCompare {
                comparator: Comparator::Compare1,
                ..
            } => Some(RtcEvent::Compare1),
            Self::RtcPrescaler => Some(RtcEvent::Prescaler),
            Self::GpioEdge(_) | Self::UsbVbus { .. } | Self::Watchdog => None,
        }
    }

    /// Return the wake-up flags that identify this source after a wake-up
    #[must_use]
    pub const fn flags(&self) -> WakeFlags {
        match *self {
            Self::RtcCompare {
                comparator: Comparator::Compare0,
                ..
            } => WakeFlags::RTC_COMPARE0,
            Self::RtcCompare {
                comparator: Comparator::Compare1,
                ..
            } => WakeFlags::RTC_COMPARE1,
            Self::RtcPrescaler => WakeFlags::RTC_PRESCALER,
            Self::GpioEdge(_) => WakeFlags::GPIO,
            Self::UsbVbus { plug, remove } => {
                let mut bits = 0;
                if plug {
                    bits |= WakeFlags::USB_PLUG.0;
                }
                if remove {
                    bits |= WakeFlags::USB_REMOVE.0;
                }
                WakeFlags(bits)
            }
            Self::Watchdog => WakeFlags::WATCHDOG,
        }
    }

    /// Check that the source can be armed
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPin`] for a GPIO source on a missing pin.
    pub const fn validate(&self) -> Result<(), Error> {
        match *self {
            Self::GpioEdge(gpio) => gpio.validate(),
            _ => Ok(()),
        }
    }
}

bitfield::bitfield! {
    /// Wake-up causes latched by the power sequencer
    ///
    /// More than one cause can be latched by the same wake-up.
    #[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WakeFlags(u32);
    impl Debug;
    /// RTC compare 0 matched
    pub rtc_compare0, set_rtc_compare0: 0;
    /// RTC compare 1 matched
    pub rtc_compare1, set_rtc_compare1: 1;
    /// RTC prescaler compare matched
    pub rtc_prescaler, set_rtc_prescaler: 2;
    /// A GPIO edge was detected
    pub gpio, set_gpio: 3;
    /// USB VBUS appeared
    pub usb_plug, set_usb_plug: 4;
    /// USB VBUS disappeared
    pub usb_remove, set_usb_remove: 5;
    /// The low-power watchdog expired
    pub watchdog, set_watchdog: 6;
}

impl WakeFlags {
    /// RTC compare 0 matched
    pub const RTC_COMPARE0: Self = Self(1 << 0);

    /// RTC compare 1 matched
    pub const RTC_COMPARE1: Self = Self(1 << 1);

    /// RTC prescaler compare matched
    pub const RTC_PRESCALER: Self = Self(1 << 2);

    /// A GPIO edge was detected
    pub const GPIO: Self = Self(1 << 3);

    /// USB VBUS appeared
    pub const USB_PLUG: Self = Self(1 << 4);

    /// USB VBUS disappeared
    pub const USB_REMOVE: Self = Self(1 << 5);

    /// The low-power watchdog expired
    pub const WATCHDOG: Self = Self(1 << 6);

    /// Mask of all defined bits
    const ALL: u32 = (1 << 7) - 1;

    /// Create an empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create a set from raw bits, dropping undefined ones
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Return the raw bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether no cause is latched
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every cause in `other` is latched
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any cause in `other` is latched
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Return the union of two sets
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for WakeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for WakeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_constants() {
        let mut flags = WakeFlags::empty();
        assert!(flags.is_empty());

        flags.set_rtc_compare1(true);
        assert_eq!(flags, WakeFlags::RTC_COMPARE1);
        assert!(flags.rtc_compare1());
        assert!(!flags.gpio());

        flags |= WakeFlags::GPIO;
        assert!(flags.gpio());
        assert!(flags.contains(WakeFlags::RTC_COMPARE1 | WakeFlags::GPIO));
        assert!(!flags.contains(WakeFlags::WATCHDOG | WakeFlags::GPIO));
        assert!(flags.intersects(WakeFlags::WATCHDOG | WakeFlags::GPIO));
    }

    #[test]
    fn from_bits_drops_undefined_bits() {
        let flags = WakeFlags::from_bits(0xFFFF_FFFF);
        assert_eq!(flags.bits(), 0x7F);
        assert!(flags.watchdog());
    }

    #[test]
    fn usb_source_reports_selected_edges() {
        let source = WakeSource::UsbVbus {
            plug: true,
            remove: false,
        };
        assert_eq!(source.flags(), WakeFlags::USB_PLUG);
        assert_eq!(source.irq_line(), IrqLine::Usb);

        let both = WakeSource::UsbVbus {
            plug: true,
            remove: true,
        };
        assert_eq!(both.flags(), WakeFlags::USB_PLUG | WakeFlags::USB_REMOVE);
    }

    #[test]
    fn rtc_sources_map_to_their_line_and_event() {
        let source = WakeSource::rtc_after(Comparator::Compare1, 72);
        assert_eq!(source.irq_line(), IrqLine::Rtc1);
        assert_eq!(source.rtc_event(), Some(RtcEvent::Compare1));
        assert_eq!(source.flags(), WakeFlags::RTC_COMPARE1);

        let prescaler = WakeSource::RtcPrescaler;
        assert_eq!(prescaler.rtc_event(), Some(RtcEvent::Prescaler));
        assert_eq!(WakeSource::Watchdog.rtc_event(), None);
    }

    #[test]
    fn gpio_pins_are_validated() {
        let button = WakeSource::GpioEdge(GpioWake::new(2, 3));
        assert_eq!(button.irq_line(), IrqLine::Gpio(2));
        assert!(button.validate().is_ok());

        let missing = WakeSource::GpioEdge(GpioWake::new(7, 0));
        assert_eq!(missing.validate(), Err(Error::InvalidPin { port: 7, pin: 0 }));

        let missing = WakeSource::GpioEdge(GpioWake::new(0, 8));
        assert_eq!(missing.validate(), Err(Error::InvalidPin { port: 0, pin: 8 }));
    }
}
