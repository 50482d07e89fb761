// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Tickless idle hook
//!
//! The task scheduler calls [`SleepScheduler::idle`] from its idle path with
//! the number of ticks until the next task is due. The scheduler either
//! sleeps shallowly for the rest of the current tick, or stops the tick,
//! programs the RTC to wake the chip up in time and sleeps deeply.
//!
//! Interrupts are masked between the last permission check and the sleep
//! instruction. An interrupt arriving in that window stays pending and wakes
//! the chip up immediately. A line the application enabled before idling is
//! still enabled and pending afterwards, so its handler runs as soon as
//! interrupts are unmasked and the interrupt is never lost.

use heapless::Vec;
use log::debug;
use log::trace;
use log::warn;

use crate::driver::InterruptController;
use crate::driver::InterruptMask;
use crate::driver::PowerSequencer;
use crate::driver::Rtc;
use crate::driver::SleepStatus;
use crate::driver::TaskScheduler;
use crate::AlwaysPermit;
use crate::ArbiterState;
use crate::ArmedDeadline;
use crate::Comparator;
use crate::Deadline;
use crate::DeadlineCalculator;
use crate::DenyReason;
use crate::Error;
use crate::Permission;
use crate::PermissionGate;
use crate::SchedulerConfig;
use crate::SleepPermit;
use crate::SleepStats;
use crate::TickReconciler;
use crate::Wake;
use crate::WakeArbiter;
use crate::WakeFlags;
use crate::WakeRecord;
use crate::WakeSignal;
use crate::WakeSource;
use crate::WakeTiming;
use crate::MAX_WAKE_SOURCES;

/// Comparator waking the chip up at the idle deadline
const WAKE_TIMER: Comparator = Comparator::Compare1;

/// Outcome of an idle attempt
#[derive(Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    /// Zero idle ticks were requested
    Rejected,

    /// The tick interrupt is imminent, nothing was done
    Deferred,

    /// Slept shallowly for the rest of the current tick
    Shallow,

    /// Deep sleep was refused after arming, nothing was credited
    Aborted(DenyReason),

    /// The wake-up sources could not be armed
    Failed(Error),

    /// Slept deeply
    Slept {
        /// Logical ticks credited to the task scheduler
        credited: u32,

        /// Latched wake-up causes
        flags: WakeFlags,

        /// How the wake-up relates to the deadline
        timing: WakeTiming,
    },
}

impl SleepOutcome {
    /// Return the logical ticks credited to the task scheduler
    #[must_use]
    pub const fn credited(&self) -> u32 {
        match *self {
            Self::Slept { credited, .. } => credited,
            _ => 0,
        }
    }
}

/// Coordinator of tickless idle
pub struct SleepScheduler<RTC, PWR, IC, M, A = AlwaysPermit, P = AlwaysPermit> {
    /// Configuration
    config: SchedulerConfig,

    /// Converter from idle ticks to hardware deadlines
    deadlines: DeadlineCalculator,

    /// Converter from hardware sleep time to logical ticks
    reconciler: TickReconciler,

    /// Owner of the wake-up peripherals
    arbiter: WakeArbiter<RTC, PWR, IC>,

    /// Global interrupt mask
    mask: M,

    /// Permission to enter deep sleep
    gate: PermissionGate<A, P>,

    /// Statistics
    stats: SleepStats,

    /// Signal receiving the causes of every deep sleep wake-up
    signal: Option<&'static WakeSignal>,
}

impl<RTC, PWR, IC, M> SleepScheduler<RTC, PWR, IC, M>
where
    RTC: Rtc,
    PWR: PowerSequencer,
    IC: InterruptController,
    M: InterruptMask,
{
    /// Create a new scheduler with an always permitting gate
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: SchedulerConfig,
        arbiter: WakeArbiter<RTC, PWR, IC>,
        mask: M,
    ) -> Result<Self, Error> {
        config.validate()?;

        debug!(
            "Tickless idle with ratio {}, deadline limit {} and levels {}/{}",
            config.tick.ratio(),
            config.max_deadline,
            config.deep_level,
            config.shallow_level,
        );

        Ok(Self {
            deadlines: DeadlineCalculator::from_config(&config),
            reconciler: TickReconciler::new(config.tick, &WakeSource::rtc_after(WAKE_TIMER, 0)),
            config,
            arbiter,
            mask,
            gate: PermissionGate::new(),
            stats: SleepStats::new(),
            signal: None,
        })
    }
}

impl<RTC, PWR, IC, M, A, P> SleepScheduler<RTC, PWR, IC, M, A, P>
where
    RTC: Rtc,
    PWR: PowerSequencer,
    IC: InterruptController,
    M: InterruptMask,
    A: SleepPermit,
    P: SleepPermit,
{
    /// Replace the permission gate
    pub fn with_gate<B, Q>(
        self,
        gate: PermissionGate<B, Q>,
    ) -> SleepScheduler<RTC, PWR, IC, M, B, Q> {
        SleepScheduler {
            config: self.config,
            deadlines: self.deadlines,
            reconciler: self.reconciler,
            arbiter: self.arbiter,
            mask: self.mask,
            gate,
            stats: self.stats,
            signal: self.signal,
        }
    }

    /// Publish the causes of every deep sleep wake-up on a signal
    #[must_use]
    pub fn with_wake_signal(mut self, signal: &'static WakeSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Return the configuration
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Return the statistics
    pub const fn stats(&self) -> &SleepStats {
        &self.stats
    }

    /// Return the hardware ticks not yet credited
    pub const fn residual(&self) -> u32 {
        self.reconciler.residual()
    }

    /// Return the wake-up flags meaning the idle deadline was reached
    pub const fn timer_flags(&self) -> WakeFlags {
        self.reconciler.designated()
    }

    /// Return the wake-up arbiter
    pub const fn arbiter(&self) -> &WakeArbiter<RTC, PWR, IC> {
        &self.arbiter
    }

    /// Return the wake-up arbiter and the interrupt mask for manual sleeps
    pub fn manual(&mut self) -> (&mut WakeArbiter<RTC, PWR, IC>, &M) {
        (&mut self.arbiter, &self.mask)
    }

    /// Return the permission gate mutably
    pub fn gate_mut(&mut self) -> &mut PermissionGate<A, P> {
        &mut self.gate
    }

    /// Sleep while the task scheduler is idle
    ///
    /// `expected_idle` is the number of logical ticks until the next task is
    /// due. The ticks actually spent asleep are credited to the task scheduler
    /// before returning.
    pub fn idle<T>(&mut self, rtos: &mut T, expected_idle: u32) -> SleepOutcome
    where
        T: TaskScheduler + ?Sized,
    {
        let outcome = self.try_idle(rtos, expected_idle);
        self.stats.record(&outcome);
        outcome
    }

    /// Run an idle attempt
    fn try_idle<T>(&mut self, rtos: &mut T, expected_idle: u32) -> SleepOutcome
    where
        T: TaskScheduler + ?Sized,
    {
        if expected_idle == 0 {
            trace!("Nothing to suppress");
            return SleepOutcome::Rejected;
        }

        if rtos.systick_remaining() < self.config.min_systick {
            trace!("Tick interrupt is imminent");
            return SleepOutcome::Deferred;
        }

        let (idle_ticks, hardware_ticks) = match self.deadlines.calculate(expected_idle) {
            Deadline::Shallow => {
                trace!("Deadline of {expected_idle} ticks is too short");
                self.arbiter.power_mut().enter(self.config.shallow_level);
                return SleepOutcome::Shallow;
            }
            Deadline::Arm {
                idle_ticks,
                hardware_ticks,
            } => (idle_ticks, hardware_ticks),
        };

        if let Permission::Denied(reason) = self.gate.check() {
            trace!("Deep sleep refused: {reason:?}");
            return SleepOutcome::Aborted(reason);
        }

        if self.arbiter.state() != ArbiterState::Idle {
            debug!("Clear wake-up sources left armed");
            self.arbiter.disarm();
        }

        let mut sources: Vec<WakeSource, MAX_WAKE_SOURCES> = Vec::new();
        let timer = WakeSource::rtc_after(WAKE_TIMER, hardware_ticks);
        for source in core::iter::once(&timer).chain(self.config.wake_sources()) {
            if sources.push(*source).is_err() {
                return SleepOutcome::Failed(Error::TooManyWakeSources);
            }
        }

        let (wake, target) = {
            let _guard = self.mask.masked();

            if let Err(error) = self.arbiter.arm(&sources) {
                warn!("Cannot arm wake-up sources: {error:?}");
                self.arbiter.disarm();
                return SleepOutcome::Failed(error);
            }

            let denial = if rtos.confirm_sleep() == SleepStatus::Abort {
                Some(DenyReason::TaskReady)
            } else if let Permission::Denied(reason) = self.gate.check() {
                Some(reason)
            } else {
                None
            };
            if let Some(reason) = denial {
                debug!("Deep sleep aborted: {reason:?}");
                self.arbiter.disarm();
                return SleepOutcome::Aborted(reason);
            }

            let wake = self.arbiter.sleep(self.config.deep_level);
            let target = self.arbiter.rtc().compare(WAKE_TIMER);
            self.arbiter.disarm();
            (wake, target)
        };

        let wake: Wake = match wake {
            Ok(wake) => wake,
            Err(error) => return SleepOutcome::Failed(error),
        };

        let armed = ArmedDeadline {
            hardware_ticks,
            target,
        };
        let reconciliation = self.reconciler.reconcile(armed, &wake);

        critical_section::with(|_cs| rtos.step_tick(reconciliation.credited));

        if let Some(signal) = self.signal {
            signal.signal(wake.flags);
        }

        debug!(
            "Slept {} of {hardware_ticks} hardware ticks, credited {} ticks, residual {}",
            reconciliation.hardware_ticks, reconciliation.credited, reconciliation.residual,
        );

        self.stats.record_wake(WakeRecord {
            requested: expected_idle,
            idle_ticks,
            armed: hardware_ticks,
            slept: reconciliation.hardware_ticks,
            credited: reconciliation.credited,
            flags: wake.flags,
            timing: reconciliation.timing,
        });

        SleepOutcome::Slept {
            credited: reconciliation.credited,
            flags: wake.flags,
            timing: reconciliation.timing,
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;
    use crate::driver::IrqLine;
    use crate::driver::RtcEvent;
    use crate::sim::SimChip;
    use crate::sim::SimMask;
    use crate::sim::SimNvic;
    use crate::sim::SimPower;
    use crate::sim::SimRtc;
    use crate::sim::SimRtos;
    use crate::sim::Stimulus;
    use crate::BusyFlag;
    use crate::GpioWake;
    use crate::PermitFn;
    use crate::SleepLevel;

    type SimScheduler<'chip> =
        SleepScheduler<SimRtc<'chip>, SimPower<'chip>, SimNvic<'chip>, SimMask<'chip>>;

    const CONSOLE_RX: GpioWake = GpioWake::new(0, 0);

    fn scheduler(chip: &SimChip, config: SchedulerConfig) -> SimScheduler<'_> {
        let arbiter = WakeArbiter::new(chip.rtc(), chip.power(), chip.nvic());
        SleepScheduler::new(config, arbiter, chip.mask()).unwrap()
    }

    fn console_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_wake_source(WakeSource::GpioEdge(CONSOLE_RX))
            .unwrap()
    }

    fn console_edge() -> Stimulus {
        Stimulus::GpioEdge {
            port: CONSOLE_RX.port,
            pin: CONSOLE_RX.pin,
        }
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let chip = SimChip::new();
        let arbiter = WakeArbiter::new(chip.rtc(), chip.power(), chip.nvic());
        let config = SchedulerConfig::default().with_levels(SleepLevel::Lp0, SleepLevel::Lp2);
        let result = SleepScheduler::new(config, arbiter, chip.mask());
        assert!(matches!(result, Err(Error::InvalidLevel(SleepLevel::Lp0))));
    }

    #[test]
    fn zero_idle_is_rejected() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, SchedulerConfig::default());
        let mut rtos = SimRtos::new();

        assert_eq!(scheduler.idle(&mut rtos, 0), SleepOutcome::Rejected);
        assert_eq!(rtos.tick, 0);
        assert_eq!(scheduler.stats().counters().rejected, 1);
    }

    #[test]
    fn imminent_tick_is_deferred() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, SchedulerConfig::default());
        let mut rtos = SimRtos {
            systick_remaining: 1,
            ..SimRtos::new()
        };

        assert_eq!(scheduler.idle(&mut rtos, 10), SleepOutcome::Deferred);
        assert_eq!(chip.entries(SleepLevel::Lp1), 0);
        assert_eq!(chip.entries(SleepLevel::Lp2), 0);
    }

    #[test]
    fn short_deadline_sleeps_shallow() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, SchedulerConfig::default());
        let mut rtos = SimRtos::new();

        assert_eq!(scheduler.idle(&mut rtos, 1), SleepOutcome::Shallow);
        assert_eq!(chip.entries(SleepLevel::Lp2), 1);
        assert_eq!(chip.entries(SleepLevel::Lp1), 0);
        assert_eq!(chip.wake_config_len(), 0);
        assert_eq!(rtos.tick, 0);
        assert_eq!(scheduler.residual(), 0);
    }

    #[test]
    fn designated_wake_credits_full_deadline() {
        let chip = SimChip::new();
        let config = SchedulerConfig::default().with_max_deadline(1_000_000);
        let mut scheduler = scheduler(&chip, config);
        let mut rtos = SimRtos::new();

        let outcome = scheduler.idle(&mut rtos, 10);

        assert_eq!(
            outcome,
            SleepOutcome::Slept {
                credited: 9,
                flags: WakeFlags::RTC_COMPARE1,
                timing: WakeTiming::OnTime,
            }
        );
        assert_eq!(chip.counter(), 72);
        assert_eq!(rtos.tick, 9);
        assert_eq!(scheduler.residual(), 0);
        assert_eq!(chip.masked_while_sleeping(), 1);
        assert!(!chip.is_masked());
        assert_eq!(scheduler.arbiter().state(), ArbiterState::Idle);
        assert!(!chip.rtc_interrupt_enabled(RtcEvent::Compare1));
    }

    #[test]
    fn early_wake_carries_residual() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, console_config());
        let mut rtos = SimRtos::new();

        chip.schedule(67, console_edge()).unwrap();
        let first = scheduler.idle(&mut rtos, 10);
        assert_eq!(first.credited(), 8);
        assert_eq!(scheduler.residual(), 3);

        chip.schedule(67, console_edge()).unwrap();
        let second = scheduler.idle(&mut rtos, 10);
        assert_eq!(
            second,
            SleepOutcome::Slept {
                credited: 8,
                flags: WakeFlags::GPIO,
                timing: WakeTiming::Early { by: 5 },
            }
        );
        assert_eq!(scheduler.residual(), 6);
        assert_eq!(rtos.tick, 16);
    }

    #[test]
    fn task_ready_after_masking_aborts() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, console_config());
        let mut rtos = SimRtos {
            status: SleepStatus::Abort,
            ..SimRtos::new()
        };

        let outcome = scheduler.idle(&mut rtos, 10);

        assert_eq!(outcome, SleepOutcome::Aborted(DenyReason::TaskReady));
        assert_eq!(rtos.tick, 0);
        assert_eq!(chip.entries(SleepLevel::Lp1), 0);
        assert_eq!(chip.wake_config_len(), 0);
        assert!(!chip.is_enabled(IrqLine::Rtc1));
        assert!(!chip.is_enabled(IrqLine::Gpio(0)));
        assert!(!chip.is_masked());
        assert_eq!(scheduler.arbiter().state(), ArbiterState::Idle);
    }

    #[test]
    fn gate_is_checked_again_after_masking() {
        let chip = SimChip::new();
        let calls = Cell::new(0);
        let gate = PermissionGate::new().with_platform(PermitFn(|| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Permission::Permitted
            } else {
                Permission::Denied(DenyReason::DriverBusy)
            }
        }));
        let mut scheduler = scheduler(&chip, SchedulerConfig::default()).with_gate(gate);
        let mut rtos = SimRtos::new();

        let outcome = scheduler.idle(&mut rtos, 10);

        assert_eq!(outcome, SleepOutcome::Aborted(DenyReason::DriverBusy));
        assert_eq!(calls.get(), 2);
        assert_eq!(chip.entries(SleepLevel::Lp1), 0);
        assert_eq!(chip.wake_config_len(), 0);
        assert_eq!(scheduler.stats().counters().aborted, 1);
    }

    #[test]
    fn busy_application_never_arms() {
        let chip = SimChip::new();
        let busy = BusyFlag::busy();
        let gate = PermissionGate::new().with_application(&busy);
        let mut scheduler = scheduler(&chip, SchedulerConfig::default()).with_gate(gate);
        let mut rtos = SimRtos::new();

        let outcome = scheduler.idle(&mut rtos, 10);
        assert_eq!(outcome, SleepOutcome::Aborted(DenyReason::ApplicationBusy));
        assert_eq!(chip.counter(), 0);

        busy.set_busy(false);
        let outcome = scheduler.idle(&mut rtos, 10);
        assert_eq!(outcome.credited(), 9);
    }

    #[test]
    fn aborted_attempt_leaves_no_stale_wake_source() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, console_config());
        let mut rtos = SimRtos {
            status: SleepStatus::Abort,
            ..SimRtos::new()
        };
        assert!(matches!(
            scheduler.idle(&mut rtos, 10),
            SleepOutcome::Aborted(_)
        ));

        // A later manual sleep on the watchdog alone ignores the console
        chip.schedule(10, console_edge()).unwrap();
        chip.schedule(40, Stimulus::WatchdogExpiry).unwrap();
        let (arbiter, mask) = scheduler.manual();
        let flags = arbiter
            .enter(mask, SleepLevel::Lp1, &[WakeSource::Watchdog])
            .unwrap();

        assert_eq!(flags, WakeFlags::WATCHDOG);
        assert_eq!(chip.counter(), 40);
    }

    #[test]
    fn interrupt_raised_in_the_window_ends_sleep_at_once() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, console_config());
        let mut rtos = SimRtos::new();

        // Console edge after the idle decision, while interrupts are masked
        chip.pend(IrqLine::Gpio(0));
        let outcome = scheduler.idle(&mut rtos, 10);

        assert_eq!(chip.counter(), 0);
        assert_eq!(outcome.credited(), 0);
        assert!(matches!(
            outcome,
            SleepOutcome::Slept {
                timing: WakeTiming::Early { by: 72 },
                ..
            }
        ));
    }

    #[test]
    fn application_interrupt_survives_deep_sleep() {
        let chip = SimChip::new();
        let mut nvic = chip.nvic();
        let mut scheduler = scheduler(&chip, console_config());
        let mut rtos = SimRtos::new();

        nvic.enable(IrqLine::Gpio(0));
        chip.schedule(30, console_edge()).unwrap();
        let outcome = scheduler.idle(&mut rtos, 10);

        assert_eq!(
            outcome,
            SleepOutcome::Slept {
                credited: 3,
                flags: WakeFlags::GPIO,
                timing: WakeTiming::Early { by: 42 },
            }
        );
        assert!(chip.is_enabled(IrqLine::Gpio(0)));
        assert!(chip.is_pending(IrqLine::Gpio(0)));
        assert!(!chip.is_enabled(IrqLine::Rtc1));
        assert!(!chip.is_pending(IrqLine::Rtc1));
        assert_eq!(scheduler.timer_flags(), WakeFlags::RTC_COMPARE1);
    }

    #[test]
    fn late_wake_is_credited_and_counted() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, SchedulerConfig::default());
        let mut rtos = SimRtos::new();

        chip.inject_late_wake(4);
        let outcome = scheduler.idle(&mut rtos, 10);

        assert_eq!(
            outcome,
            SleepOutcome::Slept {
                credited: 9,
                flags: WakeFlags::empty(),
                timing: WakeTiming::Late { by: 4 },
            }
        );
        assert_eq!(scheduler.residual(), 4);
        assert_eq!(scheduler.stats().counters().late_wakes, 1);
    }

    #[test]
    fn long_idle_is_clamped_to_the_snooze_limit() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, SchedulerConfig::default());
        let mut rtos = SimRtos::new();

        let outcome = scheduler.idle(&mut rtos, 1000);

        assert_eq!(chip.counter(), 126 * 8);
        assert_eq!(outcome.credited(), 126);
        let record = scheduler.stats().last_wake().copied().unwrap();
        assert_eq!(record.requested, 1000);
        assert_eq!(record.idle_ticks, 127);
        assert_eq!(record.armed, 1008);
    }

    #[test]
    fn wake_causes_are_published() {
        static SIGNAL: WakeSignal = WakeSignal::new();

        let chip = SimChip::new();
        let mut scheduler =
            scheduler(&chip, SchedulerConfig::default()).with_wake_signal(&SIGNAL);
        let mut rtos = SimRtos::new();

        scheduler.idle(&mut rtos, 4);
        assert_eq!(SIGNAL.try_take(), Some(WakeFlags::RTC_COMPARE1));

        scheduler.idle(&mut rtos, 1);
        assert_eq!(SIGNAL.try_take(), None);
    }

    #[test]
    fn hardware_time_matches_ticks_over_many_cycles() {
        let chip = SimChip::new();
        let mut scheduler = scheduler(&chip, console_config());
        let mut rtos = SimRtos::new();

        for round in 0_u32..200 {
            if round % 3 == 0 {
                chip.schedule(5 + (round * 13) % 90, console_edge()).unwrap();
            }
            rtos.systick_remaining = round % 5;

            let idle = 1 + (round * 7) % 40;
            let outcome = scheduler.idle(&mut rtos, idle);
            assert!(!matches!(outcome, SleepOutcome::Failed(_)));
            assert!(scheduler.residual() < 8);

            // Finish the tick in progress awake
            chip.advance(8);
            rtos.tick += 1;
            chip.take_fired().clear();
        }

        assert_eq!(chip.counter(), rtos.tick * 8 + scheduler.residual());
        let counters = scheduler.stats().counters();
        assert_eq!(counters.attempts, 200);
        assert!(counters.slept > 0);
        assert!(counters.early_wakes > 0);
        assert!(counters.deferred > 0);
    }
}
