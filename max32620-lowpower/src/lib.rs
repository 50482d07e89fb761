// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Tickless idle and wake-source coordination for MAX32620 low-power modes
//!
//! The crate decides whether, how deeply and for how long the processor may
//! sleep when the task scheduler has nothing to run, arms the hardware wake-up
//! sources, and folds the time actually spent asleep back into the scheduler
//! tick count.
//!
//! Peripheral drivers are consumed through the traits in [`driver`]. A
//! simulated chip implementing all of them is available with the `sim`
//! feature, and bindings for the Cortex-M global interrupt mask and NVIC with
//! the `cortex-m` feature.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod arbiter;
pub use self::arbiter::ArbiterState;
pub use self::arbiter::Wake;
pub use self::arbiter::WakeArbiter;
pub use self::arbiter::MAX_WAKE_SOURCES;

mod config;
pub use self::config::SchedulerConfig;
pub use self::config::MAX_EXTRA_WAKE_SOURCES;
pub use self::config::MAX_SNOOZE;
pub use self::config::MIN_RTC_TICKS;
pub use self::config::MIN_SYSTICK;
pub use self::config::RTC_TICK_RATE_HZ;
pub use self::config::TICK_RATE_HZ;

mod deadline;
pub use self::deadline::Deadline;
pub use self::deadline::DeadlineCalculator;

pub mod driver;

mod error;
pub use self::error::Error;

mod level;
pub use self::level::SleepLevel;

mod permission;
pub use self::permission::AlwaysPermit;
pub use self::permission::ConsolePermit;
pub use self::permission::DenyReason;
pub use self::permission::Permission;
pub use self::permission::PermissionGate;
pub use self::permission::PermitFn;
pub use self::permission::SleepPermit;

mod reconcile;
pub use self::reconcile::ArmedDeadline;
pub use self::reconcile::Reconciliation;
pub use self::reconcile::TickReconciler;
pub use self::reconcile::WakeTiming;

mod reset;
pub use self::reset::BootMode;
pub use self::reset::ResetCause;

mod scheduler;
pub use self::scheduler::SleepOutcome;
pub use self::scheduler::SleepScheduler;

mod signal;
pub use self::signal::BusyFlag;
pub use self::signal::EventFlag;
pub use self::signal::WakeSignal;

mod stats;
pub use self::stats::SleepCounters;
pub use self::stats::SleepStats;
pub use self::stats::WakeRecord;
pub use self::stats::HISTORY_LENGTH;

mod tick;
pub use self::tick::TickConfig;

mod wake;
pub use self::wake::Comparator;
pub use self::wake::GpioWake;
pub use self::wake::Polarity;
pub use self::wake::Pull;
pub use self::wake::RtcDeadline;
pub use self::wake::WakeFlags;
pub use self::wake::WakeSource;
pub use self::wake::GPIO_PINS_PER_PORT;
pub use self::wake::GPIO_PORTS;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(feature = "cortex-m")]
pub mod cortex;
