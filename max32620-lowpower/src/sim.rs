// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Simulated MAX32620 low-power peripherals
//!
//! A [`SimChip`] models the RTC counter, the power sequencer, the interrupt
//! controller and the global interrupt mask on a virtual time base counting
//! RTC ticks. Time only moves when the chip is told to run with
//! [`SimChip::advance`] or when it sleeps, in which case it jumps to the
//! first enabled wake-up source.
//!
//! External events such as button presses are scheduled ahead of time with
//! [`SimChip::schedule`]. Every event that happened is reported by
//! [`SimChip::take_fired`], whether it woke the chip up or not.

use core::cell::RefCell;

use heapless::Vec;
use log::trace;

use crate::driver::InterruptController;
use crate::driver::InterruptMask;
use crate::driver::IrqLine;
use crate::driver::PowerSequencer;
use crate::driver::Rtc;
use crate::driver::RtcEvent;
use crate::driver::SleepStatus;
use crate::driver::TaskScheduler;
use crate::Comparator;
use crate::ResetCause;
use crate::SleepLevel;
use crate::WakeFlags;
use crate::WakeSource;
use crate::MAX_WAKE_SOURCES;

/// Number of external events that can be scheduled at once
pub const MAX_EVENTS: usize = 32;

/// Number of fired events kept until taken
pub const MAX_FIRED: usize = 32;

/// Number of register accesses an RTC write takes to synchronise
const SYNC_POLLS: u8 = 2;

/// An external event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stimulus {
    /// An edge on a GPIO pin
    GpioEdge {
        /// GPIO port
        port: u8,

        /// Pin within the port
        pin: u8,
    },

    /// A USB cable was connected
    UsbPlug,

    /// A USB cable was disconnected
    UsbRemove,

    /// The low-power watchdog expired
    WatchdogExpiry,
}

impl Stimulus {
    /// Return the interrupt line the event is delivered on
    const fn irq_line(self) -> IrqLine {
        match self {
            Self::GpioEdge { port, .. } => IrqLine::Gpio(port),
            Self::UsbPlug | Self::UsbRemove => IrqLine::Usb,
            Self::WatchdogExpiry => IrqLine::Watchdog,
        }
    }

    /// Return the wake-up flag latched by the event
    const fn flags(self) -> WakeFlags {
        match self {
            Self::GpioEdge { .. } => WakeFlags::GPIO,
            Self::UsbPlug => WakeFlags::USB_PLUG,
            Self::UsbRemove => WakeFlags::USB_REMOVE,
            Self::WatchdogExpiry => WakeFlags::WATCHDOG,
        }
    }

    /// Whether a configured wake-up source detects the event
    fn detected_by(self, source: &WakeSource) -> bool {
        match (self, *source) {
            (Self::GpioEdge { port, pin }, WakeSource::GpioEdge(gpio)) => {
                gpio.port == port && gpio.pin == pin
            }
            (Self::UsbPlug, WakeSource::UsbVbus { plug, .. }) => plug,
            (Self::UsbRemove, WakeSource::UsbVbus { remove, .. }) => remove,
            (Self::WatchdogExpiry, WakeSource::Watchdog) => true,
            _ => false,
        }
    }
}

/// A scheduled external event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Event {
    /// Counter value at which the event happens
    at: u32,

    /// What happens
    stimulus: Stimulus,
}

/// Peripheral configuration at a point in time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralSnapshot {
    /// RTC comparators
    pub compare: [u32; 2],

    /// RTC interrupt enables, one bit per event
    pub rtc_interrupts: u8,

    /// RTC flags, one bit per event
    pub rtc_flags: u8,

    /// Enabled interrupt lines
    pub nvic_enabled: u32,

    /// Pending interrupt lines
    pub nvic_pending: u32,

    /// Configured wake-up detectors
    pub wake_config: Vec<WakeSource, MAX_WAKE_SOURCES>,

    /// Latched wake-up flags
    pub wake_flags: WakeFlags,
}

/// State shared by the peripheral handles
#[derive(Debug)]
struct ChipState {
    /// RTC counter
    counter: u32,

    /// RTC comparators
    compare: [u32; 2],

    /// RTC interrupt enables
    rtc_interrupts: u8,

    /// RTC flags
    rtc_flags: u8,

    /// Counter ticks between prescaler compare events
    prescaler_period: u32,

    /// Register polls left before the last RTC write is synchronised
    sync_polls: u8,

    /// Configured wake-up detectors
    wake_config: Vec<WakeSource, MAX_WAKE_SOURCES>,

    /// Latched wake-up flags
    wake_flags: WakeFlags,

    /// Enabled interrupt lines
    nvic_enabled: u32,

    /// Pending interrupt lines
    nvic_pending: u32,

    /// Global interrupt mask
    masked: bool,

    /// Sleeps entered with interrupts masked
    masked_sleeps: u32,

    /// Sleeps entered per level
    entries: [u32; 4],

    /// Scheduled external events
    events: Vec<Event, MAX_EVENTS>,

    /// External events that happened and were not taken yet
    fired: Vec<Stimulus, MAX_FIRED>,

    /// Overrun of the next timer wake-up, reported without the timer flag
    late_wake: Option<u32>,

    /// Cause of the last reset
    reset_cause: ResetCause,

    /// Counter ticks between core tick interrupts, while the core clock runs
    systick: Option<u32>,
}

impl ChipState {
    /// Create a chip fresh out of power-on reset
    const fn new() -> Self {
        Self {
            counter: 0,
            compare: [0; 2],
            rtc_interrupts: 0,
            rtc_flags: 0,
            prescaler_period: 4096,
            sync_polls: 0,
            wake_config: Vec::new(),
            wake_flags: WakeFlags::empty(),
            nvic_enabled: 0,
            nvic_pending: 0,
            masked: false,
            masked_sleeps: 0,
            entries: [0; 4],
            events: Vec::new(),
            fired: Vec::new(),
            late_wake: None,
            reset_cause: ResetCause::PowerOn,
            systick: None,
        }
    }

    /// Whether a wake-up source is able to end a sleep at a level
    fn wakes(&self, level: SleepLevel, source: &WakeSource) -> bool {
        match level {
            SleepLevel::Lp0 | SleepLevel::Lp1 => self.wake_config.iter().any(|configured| {
                configured.irq_line() == source.irq_line()
            }),
            SleepLevel::Lp2 => self.nvic_enabled & line_bit(source.irq_line()) != 0,
            SleepLevel::Lp3 => false,
        }
    }

    /// Whether an external event is able to end a sleep at a level
    fn detects(&self, level: SleepLevel, stimulus: Stimulus) -> bool {
        match level {
            SleepLevel::Lp0 | SleepLevel::Lp1 => self
                .wake_config
                .iter()
                .any(|configured| stimulus.detected_by(configured)),
            SleepLevel::Lp2 => self.nvic_enabled & line_bit(stimulus.irq_line()) != 0,
            SleepLevel::Lp3 => false,
        }
    }

    /// Counter ticks until an RTC event, if it can end a sleep at a level
    fn rtc_distance(&self, level: SleepLevel, event: RtcEvent) -> Option<u32> {
        let source = match event {
            RtcEvent::Compare0 => WakeSource::rtc_at(Comparator::Compare0, self.compare[0]),
            RtcEvent::Compare1 => WakeSource::rtc_at(Comparator::Compare1, self.compare[1]),
            RtcEvent::Prescaler => WakeSource::RtcPrescaler,
        };
        if !self.wakes(level, &source) {
            return None;
        }

        match event {
            RtcEvent::Compare0 => Some(self.compare[0].wrapping_sub(self.counter)),
            RtcEvent::Compare1 => Some(self.compare[1].wrapping_sub(self.counter)),
            RtcEvent::Prescaler => match self.prescaler_period {
                0 => None,
                period => Some(period - self.counter % period),
            },
        }
    }

    /// Let time pass, firing the external events due
    fn advance(&mut self, ticks: u32) {
        let mut due: Vec<(u32, Stimulus), MAX_EVENTS> = Vec::new();
        let counter = self.counter;
        self.events.retain(|event| {
            let distance = event.at.wrapping_sub(counter);
            if distance <= ticks {
                if due.push((distance, event.stimulus)).is_err() {
                    trace!("Drop due event {:?}", event.stimulus);
                }
                false
            } else {
                true
            }
        });
        due.sort_unstable_by_key(|&(distance, _)| distance);

        for (_, stimulus) in due {
            self.pend(stimulus.irq_line());
            if self.fired.push(stimulus).is_err() {
                trace!("Drop fired event {stimulus:?}");
            }
        }

        self.counter = self.counter.wrapping_add(ticks);
    }

    /// Sleep at a level until the first enabled wake-up source
    fn sleep(&mut self, level: SleepLevel) {
        let timers = [RtcEvent::Compare0, RtcEvent::Compare1, RtcEvent::Prescaler]
            .map(|event| (event, self.rtc_distance(level, event)));
        let mut distance = timers.iter().filter_map(|&(_, distance)| distance).min();
        for event in &self.events {
            if self.detects(level, event.stimulus) {
                let until = event.at.wrapping_sub(self.counter);
                distance = Some(distance.map_or(until, |current| current.min(until)));
            }
        }
        if let (SleepLevel::Lp2, Some(period)) = (level, self.systick) {
            distance = Some(distance.map_or(period, |current| current.min(period)));
        }

        let Some(distance) = distance else {
            trace!("No wake-up source enabled, return at once");
            return;
        };

        let timer_fires = timers
            .iter()
            .any(|&(event, until)| event == RtcEvent::Compare1 && until == Some(distance));
        if timer_fires {
            if let Some(late) = self.late_wake.take() {
                trace!("Wake up {late} ticks late without the timer flag");
                self.advance(distance.saturating_add(late));
                return;
            }
        }

        let mut flags = WakeFlags::empty();
        for &(event, until) in &timers {
            if until == Some(distance) {
                let bit = event_bit(event);
                self.rtc_flags |= bit;
                flags |= match event {
                    RtcEvent::Compare0 => WakeFlags::RTC_COMPARE0,
                    RtcEvent::Compare1 => WakeFlags::RTC_COMPARE1,
                    RtcEvent::Prescaler => WakeFlags::RTC_PRESCALER,
                };
                if self.rtc_interrupts & bit != 0 {
                    self.pend(rtc_line(event));
                }
            }
        }
        for event in &self.events {
            let due = event.at.wrapping_sub(self.counter) == distance;
            if due && self.detects(level, event.stimulus) {
                flags |= event.stimulus.flags();
            }
        }

        self.advance(distance);
        self.wake_flags |= flags;

        if level == SleepLevel::Lp0 {
            self.reset_cause = ResetCause::Lp0Wake;
        }
    }

    /// Mark an enabled interrupt line as pending
    fn pend(&mut self, line: IrqLine) {
        self.nvic_pending |= line_bit(line) & self.nvic_enabled;
    }
}

/// Bit of an RTC event in the enable and flag registers
const fn event_bit(event: RtcEvent) -> u8 {
    match event {
        RtcEvent::Compare0 => 1 << 0,
        RtcEvent::Compare1 => 1 << 1,
        RtcEvent::Prescaler => 1 << 2,
    }
}

/// Interrupt line of an RTC event
const fn rtc_line(event: RtcEvent) -> IrqLine {
    match event {
        RtcEvent::Compare0 => IrqLine::Rtc0,
        RtcEvent::Compare1 => IrqLine::Rtc1,
        RtcEvent::Prescaler => IrqLine::RtcPrescaler,
    }
}

/// Bit of an interrupt line in the controller registers
fn line_bit(line: IrqLine) -> u32 {
    let index: u32 = match line {
        IrqLine::Rtc0 => 0,
        IrqLine::Rtc1 => 1,
        IrqLine::RtcPrescaler => 2,
        IrqLine::Usb => 3,
        IrqLine::Watchdog => 4,
        IrqLine::Gpio(port) => 8 + u32::from(port % 24),
    };
    1 << index
}

/// Index of a sleep level in the entry counters
const fn level_index(level: SleepLevel) -> usize {
    match level {
        SleepLevel::Lp0 => 0,
        SleepLevel::Lp1 => 1,
        SleepLevel::Lp2 => 2,
        SleepLevel::Lp3 => 3,
    }
}

/// A simulated MAX32620
#[derive(Debug)]
pub struct SimChip {
    /// State shared by the peripheral handles
    state: RefCell<ChipState>,
}

impl SimChip {
    /// Create a chip fresh out of power-on reset
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RefCell::new(ChipState::new()),
        }
    }

    /// Return a handle to the RTC
    #[must_use]
    pub const fn rtc(&self) -> SimRtc<'_> {
        SimRtc { chip: self }
    }

    /// Return a handle to the power sequencer
    #[must_use]
    pub const fn power(&self) -> SimPower<'_> {
        SimPower { chip: self }
    }

    /// Return a handle to the interrupt controller
    #[must_use]
    pub const fn nvic(&self) -> SimNvic<'_> {
        SimNvic { chip: self }
    }

    /// Return a handle to the global interrupt mask
    #[must_use]
    pub const fn mask(&self) -> SimMask<'_> {
        SimMask { chip: self }
    }

    /// Return the RTC counter
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.state.borrow().counter
    }

    /// Run awake for a number of RTC ticks
    pub fn advance(&self, ticks: u32) {
        self.state.borrow_mut().advance(ticks);
    }

    /// Schedule an external event some RTC ticks from now
    ///
    /// # Errors
    ///
    /// Returns the event back if too many events are already scheduled.
    pub fn schedule(&self, after: u32, stimulus: Stimulus) -> Result<(), Stimulus> {
        let mut state = self.state.borrow_mut();
        let at = state.counter.wrapping_add(after);
        state
            .events
            .push(Event { at, stimulus })
            .map_err(|event| event.stimulus)
    }

    /// Return the number of external events not happened yet
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.state.borrow().events.len()
    }

    /// Take the external events that happened since the last call
    #[must_use]
    pub fn take_fired(&self) -> Vec<Stimulus, MAX_FIRED> {
        core::mem::take(&mut self.state.borrow_mut().fired)
    }

    /// Make the next timer wake-up happen late and without the timer flag
    pub fn inject_late_wake(&self, by: u32) {
        self.state.borrow_mut().late_wake = Some(by);
    }

    /// Change the number of RTC ticks between prescaler compare events
    pub fn set_prescaler_period(&self, ticks: u32) {
        self.state.borrow_mut().prescaler_period = ticks;
    }

    /// Change the cause of the last reset
    pub fn set_reset_cause(&self, cause: ResetCause) {
        self.state.borrow_mut().reset_cause = cause;
    }

    /// Return the number of sleeps entered at a level
    #[must_use]
    pub fn entries(&self, level: SleepLevel) -> u32 {
        self.state.borrow().entries[level_index(level)]
    }

    /// Return the number of sleeps entered with interrupts masked
    #[must_use]
    pub fn masked_while_sleeping(&self) -> u32 {
        self.state.borrow().masked_sleeps
    }

    /// Whether interrupts are masked
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.state.borrow().masked
    }

    /// Whether an interrupt line is enabled
    #[must_use]
    pub fn is_enabled(&self, line: IrqLine) -> bool {
        self.state.borrow().nvic_enabled & line_bit(line) != 0
    }

    /// Whether an interrupt line is pending
    #[must_use]
    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.state.borrow().nvic_pending & line_bit(line) != 0
    }

    /// Start or stop the core tick interrupt
    ///
    /// A running tick ends a [`SleepLevel::Lp2`] sleep after a period of RTC
    /// ticks. It stops in the deeper levels along with the core clock.
    pub fn set_systick(&self, period: Option<u32>) {
        self.state.borrow_mut().systick = period.filter(|&period| period > 0);
    }

    /// Raise an interrupt line regardless of its enable
    pub fn pend(&self, line: IrqLine) {
        self.state.borrow_mut().nvic_pending |= line_bit(line);
    }

    /// Latch wake-up flags as if they were left over from an earlier sleep
    pub fn latch_wake_flags(&self, flags: WakeFlags) {
        self.state.borrow_mut().wake_flags |= flags;
    }

    /// Whether an RTC event interrupt is enabled
    #[must_use]
    pub fn rtc_interrupt_enabled(&self, event: RtcEvent) -> bool {
        self.state.borrow().rtc_interrupts & event_bit(event) != 0
    }

    /// Return the number of configured wake-up detectors
    #[must_use]
    pub fn wake_config_len(&self) -> usize {
        self.state.borrow().wake_config.len()
    }

    /// Capture the peripheral configuration
    #[must_use]
    pub fn snapshot(&self) -> PeripheralSnapshot {
        let state = self.state.borrow();
        PeripheralSnapshot {
            compare: state.compare,
            rtc_interrupts: state.rtc_interrupts,
            rtc_flags: state.rtc_flags,
            nvic_enabled: state.nvic_enabled,
            nvic_pending: state.nvic_pending,
            wake_config: state.wake_config.clone(),
            wake_flags: state.wake_flags,
        }
    }

    /// Enter a sleep level
    fn sleep(&self, level: SleepLevel) {
        let mut state = self.state.borrow_mut();
        state.entries[level_index(level)] += 1;
        if state.masked {
            state.masked_sleeps += 1;
        }

        if level.is_run_mode() {
            return;
        }
        if state.nvic_enabled & state.nvic_pending != 0 {
            trace!("Interrupt pending, do not sleep");
            return;
        }

        state.sleep(level);
    }
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

/// RTC of a simulated chip
#[derive(Clone, Copy, Debug)]
pub struct SimRtc<'chip> {
    /// Chip
    chip: &'chip SimChip,
}

impl Rtc for SimRtc<'_> {
    fn count(&self) -> u32 {
        self.chip.counter()
    }

    fn compare(&self, comparator: Comparator) -> u32 {
        let state = self.chip.state.borrow();
        match comparator {
            Comparator::Compare0 => state.compare[0],
            Comparator::Compare1 => state.compare[1],
        }
    }

    fn set_compare(&mut self, comparator: Comparator, value: u32) {
        let mut state = self.chip.state.borrow_mut();
        match comparator {
            Comparator::Compare0 => state.compare[0] = value,
            Comparator::Compare1 => state.compare[1] = value,
        }
        state.sync_polls = SYNC_POLLS;
    }

    fn snooze(&mut self, ticks: u32) {
        let mut state = self.chip.state.borrow_mut();
        state.compare[1] = state.counter.wrapping_add(ticks);
        state.sync_polls = SYNC_POLLS;
    }

    fn enable_interrupt(&mut self, event: RtcEvent) {
        self.chip.state.borrow_mut().rtc_interrupts |= event_bit(event);
    }

    fn disable_interrupt(&mut self, event: RtcEvent) {
        self.chip.state.borrow_mut().rtc_interrupts &= !event_bit(event);
    }

    fn clear_flag(&mut self, event: RtcEvent) {
        self.chip.state.borrow_mut().rtc_flags &= !event_bit(event);
    }

    fn is_synchronising(&self) -> bool {
        let mut state = self.chip.state.borrow_mut();
        if state.sync_polls > 0 {
            state.sync_polls -= 1;
            true
        } else {
            false
        }
    }
}

/// Power sequencer of a simulated chip
#[derive(Clone, Copy, Debug)]
pub struct SimPower<'chip> {
    /// Chip
    chip: &'chip SimChip,
}

impl PowerSequencer for SimPower<'_> {
    fn clear_wake_config(&mut self) {
        self.chip.state.borrow_mut().wake_config.clear();
    }

    fn configure_wake(&mut self, source: &WakeSource) {
        if self.chip.state.borrow_mut().wake_config.push(*source).is_err() {
            trace!("No wake-up detector left for {source:?}");
        }
    }

    fn clear_wake_flags(&mut self) {
        self.chip.state.borrow_mut().wake_flags = WakeFlags::empty();
    }

    fn wake_flags(&self) -> WakeFlags {
        self.chip.state.borrow().wake_flags
    }

    fn enter(&mut self, level: SleepLevel) {
        self.chip.sleep(level);
    }

    fn reset_cause(&self) -> ResetCause {
        self.chip.state.borrow().reset_cause
    }
}

/// Interrupt controller of a simulated chip
#[derive(Clone, Copy, Debug)]
pub struct SimNvic<'chip> {
    /// Chip
    chip: &'chip SimChip,
}

impl InterruptController for SimNvic<'_> {
    fn enable(&mut self, line: IrqLine) {
        self.chip.state.borrow_mut().nvic_enabled |= line_bit(line);
    }

    fn disable(&mut self, line: IrqLine) {
        self.chip.state.borrow_mut().nvic_enabled &= !line_bit(line);
    }

    fn unpend(&mut self, line: IrqLine) {
        self.chip.state.borrow_mut().nvic_pending &= !line_bit(line);
    }

    fn is_pending(&self, line: IrqLine) -> bool {
        self.chip.is_pending(line)
    }

    fn is_enabled(&self, line: IrqLine) -> bool {
        self.chip.is_enabled(line)
    }
}

/// Global interrupt mask of a simulated chip
#[derive(Clone, Copy, Debug)]
pub struct SimMask<'chip> {
    /// Chip
    chip: &'chip SimChip,
}

impl InterruptMask for SimMask<'_> {
    fn mask(&self) {
        self.chip.state.borrow_mut().masked = true;
    }

    fn unmask(&self) {
        self.chip.state.borrow_mut().masked = false;
    }
}

/// A task scheduler counting ticks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimRtos {
    /// Tick count
    pub tick: u32,

    /// Answer to the next sleep confirmations
    pub status: SleepStatus,

    /// Counts left before the tick timer fires
    pub systick_remaining: u32,
}

impl SimRtos {
    /// Create a scheduler at tick zero with sleep allowed
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tick: 0,
            status: SleepStatus::Standard,
            systick_remaining: 1000,
        }
    }
}

impl Default for SimRtos {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for SimRtos {
    fn confirm_sleep(&self) -> SleepStatus {
        self.status
    }

    fn step_tick(&mut self, ticks: u32) {
        self.tick = self.tick.wrapping_add(ticks);
    }

    fn systick_remaining(&self) -> u32 {
        self.systick_remaining
    }
}
