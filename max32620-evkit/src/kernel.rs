// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! A cooperative task kernel driven by a 512 Hz tick
//!
//! Two tasks blink the LEDs every second, one prints the uptime every
//! minute, and one serves the command line. Whenever no task is due the
//! idle hook hands the time left to the sleep scheduler.
//!
//! The console receive line is enabled at the interrupt controller for the
//! whole run, and its handler runs whenever the line is pending.

use log::debug;
use log::info;
use log::trace;

use heapless::Vec;

use max32620_lowpower::driver::InterruptController;
use max32620_lowpower::driver::IrqLine;
use max32620_lowpower::driver::SleepStatus;
use max32620_lowpower::driver::TaskScheduler;
use max32620_lowpower::sim::SimChip;
use max32620_lowpower::sim::Stimulus;
use max32620_lowpower::BusyFlag;
use max32620_lowpower::EventFlag;
use max32620_lowpower::SleepOutcome;
use max32620_lowpower::WakeFlags;
use max32620_lowpower::WakeSignal;
use max32620_lowpower::TICK_RATE_HZ;

use crate::clock::Uptime;
use crate::console::type_line;
use crate::console::Command;
use crate::console::Console;
use crate::console::CONSOLE_RX;
use crate::random::Jitter;
use crate::Error;
use crate::Scheduler;

/// Tickless idle is disabled until enabled from the console
pub static LP1_DISABLED: BusyFlag = BusyFlag::busy();

/// A character was received on the console
pub static CONSOLE_RX_EVENT: EventFlag = EventFlag::new();

/// Causes of the last deep sleep wake-up
pub static WAKE_SIGNAL: WakeSignal = WakeSignal::new();

/// Period of the LED tasks
const BLINK_PERIOD: u32 = TICK_RATE_HZ;

/// Period of the uptime task
const TICKTOCK_PERIOD: u32 = 60 * TICK_RATE_HZ;

/// Core clock cycles per tick
const SYSTICK_RELOAD: u32 = 96_000_000 / TICK_RATE_HZ;

/// Half of the tick counter range, used for wrap-safe comparisons
const HALF_RANGE: u32 = 1 << 31;

/// Number of tasks with a period
const TASKS: usize = 3;

/// Characters typed on the console during the session
pub const SESSION_SCRIPT: &[u8] = b"tickless 1\ruptime\rstats\r";

/// Seconds from boot at which each line of the script starts being typed
const SESSION_STARTS: [u32; 3] = [3, 45, 95];

/// Work done by a periodic task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Job {
    /// Toggle an LED
    Blink(usize),

    /// Print the uptime
    TickTock,
}

/// A periodic task
#[derive(Clone, Copy, Debug)]
struct Task {
    /// Name
    name: &'static str,

    /// Ticks between two releases
    period: u32,

    /// Tick of the next release
    release: u32,

    /// Work to do when released
    job: Job,
}

impl Task {
    /// Create a task first released one period after boot
    const fn new(name: &'static str, period: u32, job: Job) -> Self {
        Self {
            name,
            period,
            release: period,
            job,
        }
    }
}

/// The task kernel
#[derive(Debug)]
pub struct Kernel {
    /// Tick count
    tick: u32,

    /// Core clock cycles left before the tick interrupt
    systick_remaining: u32,

    /// Periodic tasks
    tasks: [Task; TASKS],

    /// LED states
    leds: [bool; 2],
}

impl Kernel {
    /// Create a kernel at tick zero
    pub const fn new() -> Self {
        Self {
            tick: 0,
            systick_remaining: SYSTICK_RELOAD,
            tasks: [
                Task::new("Task0", BLINK_PERIOD, Job::Blink(0)),
                Task::new("Task1", BLINK_PERIOD, Job::Blink(1)),
                Task::new("TickTock", TICKTOCK_PERIOD, Job::TickTock),
            ],
            leds: [false, true],
        }
    }

    /// Return the tick count
    pub const fn tick(&self) -> u32 {
        self.tick
    }

    /// Return the ticks until the next task is due
    fn expected_idle(&self) -> u32 {
        self.tasks
            .iter()
            .map(|task| task.release.wrapping_sub(self.tick))
            .filter(|&ticks| ticks < HALF_RANGE)
            .min()
            .unwrap_or(0)
    }

    /// Release the tasks whose time has come
    fn release_due(&mut self) -> Vec<Job, TASKS> {
        let mut due = Vec::new();
        for task in &mut self.tasks {
            if self.tick.wrapping_sub(task.release) < HALF_RANGE {
                trace!("Release {}", task.name);
                task.release = task.release.wrapping_add(task.period);
                if due.push(task.job).is_err() {
                    debug!("Too many tasks due, skip {}", task.name);
                }
            }
        }
        due
    }

    /// Toggle an LED
    fn blink(&mut self, led: usize) {
        if let Some(state) = self.leds.get_mut(led) {
            *state = !*state;
            trace!("LED{led} {}", if *state { "on" } else { "off" });
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for Kernel {
    fn confirm_sleep(&self) -> SleepStatus {
        if CONSOLE_RX_EVENT.is_set() {
            SleepStatus::Abort
        } else {
            SleepStatus::Standard
        }
    }

    fn step_tick(&mut self, ticks: u32) {
        self.tick = self.tick.wrapping_add(ticks);
    }

    fn systick_remaining(&self) -> u32 {
        self.systick_remaining
    }
}

/// Wake-up causes observed while running
#[derive(Clone, Copy, Debug, Default)]
struct WakeCauses {
    /// Deadline reached
    timer: u32,

    /// Keystrokes
    console: u32,

    /// Anything else
    other: u32,
}

impl WakeCauses {
    /// Count a wake-up, given the flags of the deadline timer
    fn note(&mut self, flags: WakeFlags, timer: WakeFlags) {
        if flags.intersects(timer) {
            self.timer += 1;
        } else if flags.gpio() {
            self.console += 1;
        } else {
            self.other += 1;
        }
    }
}

/// Run the kernel for a number of ticks
///
/// # Errors
///
/// Returns an error if the console session cannot be scheduled, if the
/// sleep scheduler is misused, or if the tick count drifts from the RTC.
pub fn run(
    chip: &SimChip,
    scheduler: &mut Scheduler,
    kernel: &mut Kernel,
    jitter: &mut Jitter,
    duration: u32,
) -> Result<(), Error> {
    let tick = scheduler.config().tick;
    let ratio = tick.ratio();
    let hardware_hz = tick.hardware_hz();
    let start_counter = chip.counter();
    let start_tick = kernel.tick();

    let mut starts = SESSION_STARTS.iter();
    for line in SESSION_SCRIPT.split_inclusive(|&byte| byte == b'\r') {
        let seconds = starts.next().copied().unwrap_or_default();
        type_line(chip, jitter, seconds * hardware_hz, line)?;
    }

    let mut rx_pending = 0;
    let mut causes = WakeCauses::default();

    let mut nvic = chip.nvic();
    nvic.enable(console_line());
    chip.set_systick(Some(ratio));

    while kernel.tick().wrapping_sub(start_tick) < duration {
        for job in kernel.release_due() {
            match job {
                Job::Blink(led) => kernel.blink(led),
                Job::TickTock => {
                    let uptime = Uptime::new(kernel.tick(), TICK_RATE_HZ);
                    let tickless = if LP1_DISABLED.is_busy() {
                        "disabled"
                    } else {
                        "enabled"
                    };
                    console_of(scheduler).print(format_args!(
                        "Uptime is {uptime}, tickless-idle is {tickless}"
                    ));
                }
            }
        }

        if CONSOLE_RX_EVENT.take() {
            serve_console(scheduler, kernel, &mut rx_pending);
        }

        // Idle task
        let expected_idle = kernel.expected_idle();
        kernel.systick_remaining = jitter.between(0, SYSTICK_RELOAD);

        // Interrupts raised while the tasks were running
        deliver_interrupts(chip, &mut rx_pending);

        let before = chip.counter();
        let mut rest = ratio;
        match scheduler.idle(kernel, expected_idle) {
            SleepOutcome::Failed(error) => return Err(error.into()),
            SleepOutcome::Slept { .. } => {
                if let Some(flags) = WAKE_SIGNAL.try_take() {
                    trace!("Woken up by {flags:?}");
                    causes.note(flags, scheduler.timer_flags());
                }
            }
            SleepOutcome::Shallow => {
                // Woken up by the tick interrupt or by a keystroke
                rest = ratio.saturating_sub(chip.counter().wrapping_sub(before));
            }
            _ => {}
        }

        // Rest of the current tick
        chip.advance(rest);
        kernel.step_tick(1);
    }

    chip.set_systick(None);
    nvic.disable(console_line());
    nvic.unpend(console_line());

    let ticks = kernel.tick().wrapping_sub(start_tick);
    let elapsed = chip.counter().wrapping_sub(start_counter);
    let expected = tick.to_hardware(ticks).wrapping_add(scheduler.residual());
    if elapsed != expected {
        return Err(Error::Drift {
            expected,
            actual: elapsed,
        });
    }

    let counters = scheduler.stats().counters();
    info!(
        "Ran {} with {} deep sleeps, no drift between tick and RTC",
        Uptime::new(ticks, TICK_RATE_HZ),
        counters.slept,
    );
    info!(
        "Deep sleeps ended by timer: {}, console: {}, other: {}",
        causes.timer, causes.console, causes.other,
    );

    Ok(())
}

/// Return the console held by the sleep scheduler
fn console_of(scheduler: &mut Scheduler) -> &mut Console {
    scheduler.gate_mut().platform_mut().console_mut()
}

/// Return the interrupt line of the console receive pin
const fn console_line() -> IrqLine {
    IrqLine::Gpio(CONSOLE_RX.port)
}

/// Run the console receive handler if its line is pending
///
/// The handler counts every keystroke latched since it last ran.
fn deliver_interrupts(chip: &SimChip, rx_pending: &mut usize) {
    let mut nvic = chip.nvic();
    let line = console_line();
    if !(nvic.is_enabled(line) && nvic.is_pending(line)) {
        return;
    }
    nvic.unpend(line);

    for stimulus in chip.take_fired() {
        match stimulus {
            Stimulus::GpioEdge { port, pin }
                if port == CONSOLE_RX.port && pin == CONSOLE_RX.pin =>
            {
                *rx_pending += 1;
                CONSOLE_RX_EVENT.signal();
            }
            other => debug!("Ignore {other:?}"),
        }
    }
}

/// Process the characters received on the console
fn serve_console(scheduler: &mut Scheduler, kernel: &Kernel, rx_pending: &mut usize) {
    while *rx_pending > 0 {
        *rx_pending -= 1;
        if let Some(command) = console_of(scheduler).receive() {
            execute(scheduler, kernel, command);
        }
    }
}

/// Execute a console command
fn execute(scheduler: &mut Scheduler, kernel: &Kernel, command: Command) {
    let counters = *scheduler.stats().counters();
    let residual = scheduler.residual();
    let console = console_of(scheduler);

    match command {
        Command::Help => {
            console.print(format_args!("Commands: help, tickless 0|1, uptime, stats"));
        }
        Command::Tickless(enabled) => {
            LP1_DISABLED.set_busy(!enabled);
            let state = if enabled { "enabled" } else { "disabled" };
            console.print(format_args!("Tickless LP1 idle is {state}"));
        }
        Command::Uptime => {
            let uptime = Uptime::new(kernel.tick(), TICK_RATE_HZ);
            console.print(format_args!("Uptime is {uptime}"));
        }
        Command::Stats => {
            console.print(format_args!(
                "Idle: {} attempts, {} deep, {} shallow, {} aborted, {} deferred",
                counters.attempts,
                counters.slept,
                counters.shallow,
                counters.aborted,
                counters.deferred,
            ));
            console.print(format_args!(
                "Credited {} ticks, {} early and {} late wake-ups, residual {}",
                counters.credited_ticks, counters.early_wakes, counters.late_wakes, residual,
            ));
        }
        Command::Unknown(line) => {
            console.print(format_args!("Unknown command '{line}'"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_release_after_one_period() {
        let kernel = Kernel::new();
        assert_eq!(kernel.expected_idle(), BLINK_PERIOD);
    }

    #[test]
    fn release_and_reschedule() {
        let mut kernel = Kernel::new();
        kernel.step_tick(BLINK_PERIOD);

        let due = kernel.release_due();
        assert_eq!(due.as_slice(), [Job::Blink(0), Job::Blink(1)]);
        assert_eq!(kernel.expected_idle(), BLINK_PERIOD);
    }

    #[test]
    fn overdue_task_is_released() {
        let mut kernel = Kernel::new();
        kernel.step_tick(BLINK_PERIOD + 5);

        assert_eq!(kernel.release_due().len(), 2);
        assert_eq!(kernel.expected_idle(), BLINK_PERIOD - 5);
    }

    #[test]
    fn tickless_session_without_drift() {
        let chip: &'static SimChip = Box::leak(Box::new(SimChip::new()));
        let mut scheduler = crate::build_scheduler(chip).unwrap();
        let mut kernel = Kernel::new();
        let mut jitter = Jitter::from_seed(3);

        run(chip, &mut scheduler, &mut kernel, &mut jitter, 100 * TICK_RATE_HZ).unwrap();

        assert!(!LP1_DISABLED.is_busy());
        assert_eq!(kernel.tick(), 100 * TICK_RATE_HZ);
        let counters = scheduler.stats().counters();
        assert!(counters.slept > 0);
        assert!(counters.aborted > 0);
        assert_eq!(
            chip.counter(),
            kernel.tick() * 8 + scheduler.residual()
        );
    }

    #[test]
    fn console_handler_runs_on_pending_line_only() {
        let chip = SimChip::new();
        let mut nvic = chip.nvic();
        let mut rx_pending = 0;
        let edge = Stimulus::GpioEdge {
            port: CONSOLE_RX.port,
            pin: CONSOLE_RX.pin,
        };

        chip.schedule(1, edge).unwrap();
        chip.advance(2);
        deliver_interrupts(&chip, &mut rx_pending);
        assert_eq!(rx_pending, 0);

        nvic.enable(console_line());
        chip.schedule(1, edge).unwrap();
        chip.advance(2);
        deliver_interrupts(&chip, &mut rx_pending);
        assert_eq!(rx_pending, 2);
        assert!(!chip.is_pending(console_line()));
        CONSOLE_RX_EVENT.take();
    }

    #[test]
    fn timer_wake_ups_are_told_apart() {
        let mut causes = WakeCauses::default();
        causes.note(WakeFlags::RTC_COMPARE1, WakeFlags::RTC_COMPARE1);
        causes.note(WakeFlags::GPIO, WakeFlags::RTC_COMPARE1);
        causes.note(WakeFlags::RTC_COMPARE0, WakeFlags::RTC_COMPARE1);
        assert_eq!((causes.timer, causes.console, causes.other), (1, 1, 1));
    }

    #[test]
    fn blink_toggles() {
        let mut kernel = Kernel::new();
        kernel.blink(0);
        kernel.blink(1);
        assert_eq!(kernel.leds, [true, false]);
    }
}
