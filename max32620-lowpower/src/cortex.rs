// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Global interrupt mask and NVIC of the MAX32620 Cortex-M4F core

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;

use crate::driver::InterruptController;
use crate::driver::InterruptMask;
use crate::driver::IrqLine;
use crate::GPIO_PORTS;

/// Vector of RTC compare 0
const RTC0_IRQ: u16 = 3;

/// Vector of RTC compare 1
const RTC1_IRQ: u16 = 4;

/// Vector of RTC prescaler compare
const RTC2_IRQ: u16 = 5;

/// Vector of the USB controller
const USB_IRQ: u16 = 8;

/// Vector of GPIO port 0, the other ports follow
const GPIO_P0_IRQ: u16 = 15;

/// An external interrupt number
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Irq(u16);

// SAFETY: numbers are only built by `vector` from the MAX32620 vector table
unsafe impl InterruptNumber for Irq {
    fn number(self) -> u16 {
        self.0
    }
}

/// Return the NVIC vector of an interrupt line
///
/// The low-power watchdog has no vector of its own, it only wakes the chip
/// up through the power sequencer.
#[must_use]
pub fn vector(line: IrqLine) -> Option<Irq> {
    let number = match line {
        IrqLine::Rtc0 => RTC0_IRQ,
        IrqLine::Rtc1 => RTC1_IRQ,
        IrqLine::RtcPrescaler => RTC2_IRQ,
        IrqLine::Usb => USB_IRQ,
        IrqLine::Gpio(port) if port < GPIO_PORTS => GPIO_P0_IRQ + u16::from(port),
        IrqLine::Gpio(_) | IrqLine::Watchdog => return None,
    };
    Some(Irq(number))
}

/// The PRIMASK register
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalMask;

impl InterruptMask for GlobalMask {
    fn mask(&self) {
        cortex_m::interrupt::disable();
    }

    fn unmask(&self) {
        // SAFETY: only called when a mask guard is dropped, outside any
        // critical section relying on masked interrupts
        unsafe { cortex_m::interrupt::enable() };
    }
}

/// The Nested Vectored Interrupt Controller
#[derive(Clone, Copy, Debug, Default)]
pub struct Nvic;

impl InterruptController for Nvic {
    fn enable(&mut self, line: IrqLine) {
        if let Some(irq) = vector(line) {
            // SAFETY: the idle path owns the wake-up lines while they are
            // armed, no mask-based critical section covers them
            unsafe { NVIC::unmask(irq) };
        }
    }

    fn disable(&mut self, line: IrqLine) {
        if let Some(irq) = vector(line) {
            NVIC::mask(irq);
        }
    }

    fn unpend(&mut self, line: IrqLine) {
        if let Some(irq) = vector(line) {
            NVIC::unpend(irq);
        }
    }

    fn is_pending(&self, line: IrqLine) -> bool {
        vector(line).is_some_and(NVIC::is_pending)
    }

    fn is_enabled(&self, line: IrqLine) -> bool {
        vector(line).is_some_and(NVIC::is_enabled)
    }
}
