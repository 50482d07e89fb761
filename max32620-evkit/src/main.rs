// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! MAX32620 EV kit low-power demo
//!
//! The firmware runs a small task set on a simulated chip, suppressing the
//! tick in LP1 whenever the tasks are idle, then walks through the manual
//! low-power modes and finally enters LP0.

use core::num::ParseIntError;

use log::error;
use log::info;

use static_cell::StaticCell;

use max32620_lowpower::driver::IrqLine;
use max32620_lowpower::sim::SimChip;
use max32620_lowpower::sim::SimMask;
use max32620_lowpower::sim::SimNvic;
use max32620_lowpower::sim::SimPower;
use max32620_lowpower::sim::SimRtc;
use max32620_lowpower::sim::Stimulus;
use max32620_lowpower::BootMode;
use max32620_lowpower::BusyFlag;
use max32620_lowpower::ConsolePermit;
use max32620_lowpower::Error as LowPowerError;
use max32620_lowpower::PermissionGate;
use max32620_lowpower::SchedulerConfig;
use max32620_lowpower::SleepScheduler;
use max32620_lowpower::WakeArbiter;
use max32620_lowpower::WakeFlags;
use max32620_lowpower::WakeSource;
use max32620_lowpower::RTC_TICK_RATE_HZ;
use max32620_lowpower::TICK_RATE_HZ;

mod logging;
use self::logging::setup as setup_logging;

mod clock;
use self::clock::Uptime;

mod console;
use self::console::Console;
use self::console::CONSOLE_RX;

mod kernel;
use self::kernel::Kernel;
use self::kernel::LP1_DISABLED;
use self::kernel::SESSION_SCRIPT;
use self::kernel::WAKE_SIGNAL;

mod random;
use self::random::Jitter;

mod sleep;

/// Duration of the tickless demo in seconds
const DEMO_SECONDS: u32 = 130;

/// The simulated chip
static CHIP: StaticCell<SimChip> = StaticCell::new();

/// Sleep scheduler of the EV kit
type Scheduler = SleepScheduler<
    SimRtc<'static>,
    SimPower<'static>,
    SimNvic<'static>,
    SimMask<'static>,
    &'static BusyFlag,
    ConsolePermit<Console>,
>;

/// Main task
fn main() {
    setup_logging();

    let chip = CHIP.init(SimChip::new());

    if let Err(error) = main_fallible(chip) {
        error!("Error while running firmware: {error:?}");
        std::process::exit(1);
    }
}

/// Main task that can return an error
fn main_fallible(chip: &'static SimChip) -> Result<(), Error> {
    loop {
        match BootMode::detect(&chip.power()) {
            BootMode::FirstBoot => {
                info!("-=- MAX32620 FreeRTOS Demo -=-");
                run_demo(chip)?;
                info!("Simulated reset after LP0 wake-up");
            }
            BootMode::ResumeFromLp0 => {
                let uptime = Uptime::new(chip.counter(), RTC_TICK_RATE_HZ);
                info!("Woke up from LP0, program reset at {uptime}");
                return Ok(());
            }
            mode @ BootMode::WatchdogRecovery => return Err(Error::UnexpectedBoot(mode)),
        }
    }
}

/// Run the tickless demo and the manual low-power modes
fn run_demo(chip: &'static SimChip) -> Result<(), Error> {
    let mut jitter = Jitter::from_seed(random::seed()?);
    let mut scheduler = build_scheduler(chip)?;
    let mut kernel = Kernel::new();

    info!("Tickless LP1 idle is configured. Type 'tickless 1' to enable.");
    kernel::run(
        chip,
        &mut scheduler,
        &mut kernel,
        &mut jitter,
        DEMO_SECONDS * TICK_RATE_HZ,
    )?;

    sleep::rtc_lp1(chip, &mut scheduler)?;
    sleep::prescaler_lp1(chip, &mut scheduler)?;
    sleep::button_lp1(chip, &mut scheduler)?;
    sleep::watchdog_lp1(chip, &mut scheduler)?;
    sleep::usb_lp1(chip, &mut scheduler)?;
    sleep::button_lp2(chip, &mut scheduler)?;
    sleep::rtc_lp2(chip, &mut scheduler)?;
    sleep::rtc_lp0(&mut scheduler)?;

    Ok(())
}

/// Create the sleep scheduler on the chip
///
/// Deep sleep is allowed once tickless idle is enabled from the console and
/// the console has drained its output. Keystrokes wake the chip up.
fn build_scheduler(chip: &'static SimChip) -> Result<Scheduler, Error> {
    let config = SchedulerConfig::default().with_wake_source(WakeSource::GpioEdge(CONSOLE_RX))?;
    let arbiter = WakeArbiter::new(chip.rtc(), chip.power(), chip.nvic());
    let gate = PermissionGate::new()
        .with_application(&LP1_DISABLED)
        .with_platform(ConsolePermit::new(Console::new(SESSION_SCRIPT)));

    let scheduler = SleepScheduler::new(config, arbiter, chip.mask())?
        .with_gate(gate)
        .with_wake_signal(&WAKE_SIGNAL);
    Ok(scheduler)
}

/// An error within the demo
#[derive(Debug)]
enum Error {
    /// An error from the low-power core
    #[expect(unused, reason = "Never read directly")]
    LowPower(LowPowerError),

    /// A simulated event could not be scheduled
    #[expect(unused, reason = "Never read directly")]
    Schedule(Stimulus),

    /// The simulation seed is not a number
    #[expect(unused, reason = "Never read directly")]
    Seed(ParseIntError),

    /// The tick count drifted from the RTC
    #[expect(unused, reason = "Never read directly")]
    Drift {
        /// Hardware ticks accounted for by the tick count and residual
        expected: u32,

        /// Hardware ticks elapsed
        actual: u32,
    },

    /// A sleep ended without the expected wake-up cause
    #[expect(unused, reason = "Never read directly")]
    UnexpectedWake(WakeFlags),

    /// An interrupt that woke the chip up never reached its handler
    #[expect(unused, reason = "Never read directly")]
    LostInterrupt(IrqLine),

    /// The chip booted in an unexpected mode
    #[expect(unused, reason = "Never read directly")]
    UnexpectedBoot(BootMode),
}

impl From<LowPowerError> for Error {
    fn from(error: LowPowerError) -> Self {
        Self::LowPower(error)
    }
}

impl From<Stimulus> for Error {
    fn from(stimulus: Stimulus) -> Self {
        Self::Schedule(stimulus)
    }
}

impl From<ParseIntError> for Error {
    fn from(error: ParseIntError) -> Self {
        Self::Seed(error)
    }
}
