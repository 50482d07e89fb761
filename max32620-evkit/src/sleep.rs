// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Functions for entering low-power modes outside of tickless idle
//!
//! Each function arms its own wake-up sources on top of the sleep scheduler
//! hardware and enters the requested level. The console is drained first
//! whenever the level stops the clocks.

use log::info;

use max32620_lowpower::driver::prepare_blocking;
use max32620_lowpower::driver::InterruptController;
use max32620_lowpower::driver::IrqLine;
use max32620_lowpower::sim::SimChip;
use max32620_lowpower::sim::Stimulus;
use max32620_lowpower::Comparator;
use max32620_lowpower::GpioWake;
use max32620_lowpower::Pull;
use max32620_lowpower::SleepLevel;
use max32620_lowpower::WakeFlags;
use max32620_lowpower::WakeSource;
use max32620_lowpower::RTC_TICK_RATE_HZ;

use crate::clock::Uptime;
use crate::Error;
use crate::Scheduler;

/// Duration of the LP1 sleep woken up by the RTC
const LP1_SECONDS: u32 = 7;

/// Duration of the LP0 sleep
const LP0_SECONDS: u32 = 5;

/// Duration of the LP2 sleep woken up by the RTC
const LP2_SECONDS: u32 = 5;

/// Seconds between prescaler wake-ups
const PRESCALER_PERIOD_SECONDS: u32 = 1;

/// Prescaler wake-ups before the deadline
const PRESCALER_WAKES: u32 = 4;

/// Seconds before a simulated external event
const EXTERNAL_EVENT_SECONDS: u32 = 2;

/// Push button SW1, active low with a pull-up
const PUSH_BUTTON: GpioWake = GpioWake::new(2, 7).with_pull(Pull::Up);

/// Push button SW3, active low with a pull-up
const SW3: GpioWake = GpioWake::new(6, 0).with_pull(Pull::Up);

/// Return the uptime of the RTC
fn rtc_uptime(chip: &SimChip) -> Uptime {
    Uptime::new(chip.counter(), RTC_TICK_RATE_HZ)
}

/// Enter a level until one of the sources wakes the chip up
///
/// The console is drained before a level that stops the clocks. The wake-up
/// must latch the expected flag.
fn enter(
    scheduler: &mut Scheduler,
    level: SleepLevel,
    sources: &[WakeSource],
    expected: WakeFlags,
) -> Result<WakeFlags, Error> {
    if level.requires_quiescence() {
        prepare_blocking(scheduler.gate_mut().platform_mut().console_mut());
    }

    let (arbiter, mask) = scheduler.manual();
    let flags = arbiter.enter(mask, level, sources)?;
    if flags.contains(expected) {
        Ok(flags)
    } else {
        Err(Error::UnexpectedWake(flags))
    }
}

/// Sleep in LP1 until RTC compare 1 matches
///
/// # Errors
///
/// Returns an error if the wake-up is not caused by the RTC.
pub fn rtc_lp1(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    info!("Entering LP1 for {LP1_SECONDS} s, waking up on RTC compare 1");
    let ticks = scheduler.config().tick.seconds_to_hardware(LP1_SECONDS);
    enter(
        scheduler,
        SleepLevel::Lp1,
        &[WakeSource::rtc_after(Comparator::Compare1, ticks)],
        WakeFlags::RTC_COMPARE1,
    )?;
    info!("Woke up from LP1 at {}", rtc_uptime(chip));
    Ok(())
}

/// Sleep in LP1 until RTC compare 1 matches, waking up on every prescaler
/// period in the meantime
///
/// # Errors
///
/// Returns an error if the sources cannot be armed.
pub fn prescaler_lp1(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    let tick = scheduler.config().tick;
    let period = tick.seconds_to_hardware(PRESCALER_PERIOD_SECONDS);
    chip.set_prescaler_period(period);

    let deadline = period * PRESCALER_WAKES + period / 2;
    info!("Entering LP1 until RTC compare 1, waking up every {PRESCALER_PERIOD_SECONDS} s");
    prepare_blocking(scheduler.gate_mut().platform_mut().console_mut());

    let mut wakes = 0_u32;
    let (arbiter, mask) = scheduler.manual();
    arbiter.sleep_until(
        mask,
        SleepLevel::Lp1,
        &[
            WakeSource::RtcPrescaler,
            WakeSource::rtc_after(Comparator::Compare1, deadline),
        ],
        WakeFlags::RTC_COMPARE1,
        |flags| {
            wakes += 1;
            info!("Prescaler wake-up {flags:?} at {}", rtc_uptime(chip));
        },
    )?;
    info!("Woke up from LP1 after {wakes} prescaler wake-ups at {}", rtc_uptime(chip));
    Ok(())
}

/// Sleep in LP1 until the push button is pressed
///
/// # Errors
///
/// Returns an error if the press cannot be simulated or the wake-up is not
/// caused by a GPIO.
pub fn button_lp1(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    let after = scheduler.config().tick.seconds_to_hardware(EXTERNAL_EVENT_SECONDS);
    chip.schedule(
        after,
        Stimulus::GpioEdge {
            port: PUSH_BUTTON.port,
            pin: PUSH_BUTTON.pin,
        },
    )?;

    info!(
        "Entering LP1, press SW1 (P{}.{}) to wake up",
        PUSH_BUTTON.port, PUSH_BUTTON.pin
    );
    enter(
        scheduler,
        SleepLevel::Lp1,
        &[WakeSource::GpioEdge(PUSH_BUTTON)],
        WakeFlags::GPIO,
    )?;
    info!("SW1 pressed at {}", rtc_uptime(chip));
    take_fired(chip);
    Ok(())
}

/// Sleep in LP1 until the low-power watchdog expires
///
/// # Errors
///
/// Returns an error if the expiry cannot be simulated or the wake-up is not
/// caused by the watchdog.
pub fn watchdog_lp1(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    let after = scheduler.config().tick.seconds_to_hardware(EXTERNAL_EVENT_SECONDS);
    chip.schedule(after, Stimulus::WatchdogExpiry)?;

    info!("Entering LP1 until the watchdog expires");
    enter(
        scheduler,
        SleepLevel::Lp1,
        &[WakeSource::Watchdog],
        WakeFlags::WATCHDOG,
    )?;
    info!("Watchdog expired at {}", rtc_uptime(chip));
    take_fired(chip);
    Ok(())
}

/// Sleep in LP1 until a USB cable is plugged, then until it is removed
///
/// # Errors
///
/// Returns an error if the cable events cannot be simulated or the wake-ups
/// are not caused by VBUS.
pub fn usb_lp1(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    let after = scheduler.config().tick.seconds_to_hardware(EXTERNAL_EVENT_SECONDS);
    let vbus = WakeSource::UsbVbus {
        plug: true,
        remove: true,
    };

    chip.schedule(after, Stimulus::UsbPlug)?;
    info!("Entering LP1 until a USB cable is plugged");
    enter(scheduler, SleepLevel::Lp1, &[vbus], WakeFlags::USB_PLUG)?;
    info!("VBUS detected at {}", rtc_uptime(chip));

    chip.schedule(after, Stimulus::UsbRemove)?;
    info!("Entering LP1 until the USB cable is removed");
    enter(scheduler, SleepLevel::Lp1, &[vbus], WakeFlags::USB_REMOVE)?;
    info!("VBUS removed at {}", rtc_uptime(chip));
    take_fired(chip);
    Ok(())
}

/// Sleep in LP2 until SW3 is pressed
///
/// The application owns the interrupt line of SW3, and its handler runs after
/// the wake-up.
///
/// # Errors
///
/// Returns an error if the press cannot be simulated, if the wake-up is not
/// caused by a GPIO or if the press never reaches the handler.
pub fn button_lp2(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    let after = scheduler.config().tick.seconds_to_hardware(EXTERNAL_EVENT_SECONDS);
    chip.schedule(
        after,
        Stimulus::GpioEdge {
            port: SW3.port,
            pin: SW3.pin,
        },
    )?;

    let mut nvic = chip.nvic();
    let line = IrqLine::Gpio(SW3.port);
    nvic.enable(line);

    info!("Entering LP2, press SW3 (P{}.{}) to wake up", SW3.port, SW3.pin);
    enter(
        scheduler,
        SleepLevel::Lp2,
        &[WakeSource::GpioEdge(SW3)],
        WakeFlags::GPIO,
    )?;

    if !nvic.is_pending(line) {
        nvic.disable(line);
        return Err(Error::LostInterrupt(line));
    }
    nvic.unpend(line);
    nvic.disable(line);
    info!("SW3 pressed at {}", rtc_uptime(chip));
    take_fired(chip);
    Ok(())
}

/// Sleep in LP2 until the RTC snooze expires
///
/// # Errors
///
/// Returns an error if the wake-up is not caused by the RTC.
pub fn rtc_lp2(chip: &SimChip, scheduler: &mut Scheduler) -> Result<(), Error> {
    info!("Entering LP2 for {LP2_SECONDS} s, waking up on RTC compare 1");
    let ticks = scheduler.config().tick.seconds_to_hardware(LP2_SECONDS);
    enter(
        scheduler,
        SleepLevel::Lp2,
        &[WakeSource::rtc_after(Comparator::Compare1, ticks)],
        WakeFlags::RTC_COMPARE1,
    )?;
    info!("Woke up from LP2 at {}", rtc_uptime(chip));
    Ok(())
}

/// Sleep in LP0 until RTC compare 0 matches
///
/// Waking up from LP0 resets the chip.
///
/// # Errors
///
/// Returns an error if the wake-up is not caused by the RTC.
pub fn rtc_lp0(scheduler: &mut Scheduler) -> Result<(), Error> {
    info!("Entering LP0 for {LP0_SECONDS} s, waking up on RTC compare 0");
    let ticks = scheduler.config().tick.seconds_to_hardware(LP0_SECONDS);
    enter(
        scheduler,
        SleepLevel::Lp0,
        &[WakeSource::rtc_after(Comparator::Compare0, ticks)],
        WakeFlags::RTC_COMPARE0,
    )?;
    Ok(())
}

/// Discard the external events already handled by a wake-up
fn take_fired(chip: &SimChip) {
    for stimulus in chip.take_fired() {
        info!("Handled {stimulus:?}");
    }
}

#[cfg(test)]
mod tests {
    use max32620_lowpower::BootMode;

    use super::*;
    use crate::build_scheduler;

    fn chip() -> &'static SimChip {
        Box::leak(Box::new(SimChip::new()))
    }

    #[test]
    fn rtc_wake_up_after_seven_seconds() {
        let chip = chip();
        let mut scheduler = build_scheduler(chip).unwrap();
        rtc_lp1(chip, &mut scheduler).unwrap();
        assert_eq!(chip.counter(), 7 * 4096);
        assert_eq!(chip.entries(SleepLevel::Lp1), 1);
    }

    #[test]
    fn prescaler_wakes_before_deadline() {
        let chip = chip();
        let mut scheduler = build_scheduler(chip).unwrap();
        prescaler_lp1(chip, &mut scheduler).unwrap();
        assert_eq!(chip.entries(SleepLevel::Lp1), PRESCALER_WAKES + 1);
        assert_eq!(chip.counter(), 4 * 4096 + 2048);
    }

    #[test]
    fn external_events_wake_up() {
        let chip = chip();
        let mut scheduler = build_scheduler(chip).unwrap();
        button_lp1(chip, &mut scheduler).unwrap();
        watchdog_lp1(chip, &mut scheduler).unwrap();
        usb_lp1(chip, &mut scheduler).unwrap();
        assert_eq!(chip.counter(), 4 * 2 * 4096);
        assert_eq!(chip.wake_config_len(), 0);
    }

    #[test]
    fn lp2_wakes_up_on_the_button_and_the_rtc() {
        let chip = chip();
        let mut scheduler = build_scheduler(chip).unwrap();

        button_lp2(chip, &mut scheduler).unwrap();
        assert_eq!(chip.counter(), 2 * 4096);
        assert!(!chip.is_enabled(IrqLine::Gpio(6)));
        assert!(!chip.is_pending(IrqLine::Gpio(6)));

        rtc_lp2(chip, &mut scheduler).unwrap();
        assert_eq!(chip.counter(), 7 * 4096);
        assert_eq!(chip.entries(SleepLevel::Lp2), 2);
        assert_eq!(chip.entries(SleepLevel::Lp1), 0);
        assert!(!chip.is_enabled(IrqLine::Rtc1));
    }

    #[test]
    fn lp0_wake_up_resets() {
        let chip = chip();
        let mut scheduler = build_scheduler(chip).unwrap();
        rtc_lp0(&mut scheduler).unwrap();
        assert_eq!(chip.entries(SleepLevel::Lp0), 1);
        assert_eq!(chip.counter(), 5 * 4096);
        assert_eq!(BootMode::detect(&chip.power()), BootMode::ResumeFromLp0);
    }
}
