// Copyright Claudio Mattera 2024-2025.
//
// Distributed under the MIT License or the Apache 2.0 License at your option.
// See the accompanying files LICENSE-MIT.txt and LICENSE-APACHE-2.0.txt, or
// online at
// https://opensource.org/licenses/MIT
// https://opensource.org/licenses/Apache-2.0

//! Permission to enter deep sleep

use crate::driver::PrepareForSleep;
use crate::BusyFlag;

/// Reason for refusing deep sleep
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// The application vetoed deep sleep
    ApplicationBusy,

    /// A driver still has work in flight
    DriverBusy,

    /// A task became ready to run
    TaskReady,
}

/// Answer of a sleep permit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Deep sleep is allowed
    Permitted,

    /// Deep sleep is refused
    Denied(DenyReason),
}

/// A strategy deciding whether deep sleep is allowed right now
///
/// Permits are queried on the idle path, possibly with interrupts masked,
/// and must not block.
pub trait SleepPermit {
    /// Decide whether deep sleep is allowed
    fn permit(&mut self) -> Permission;
}

/// A permit that always allows deep sleep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlwaysPermit;

impl SleepPermit for AlwaysPermit {
    fn permit(&mut self) -> Permission {
        Permission::Permitted
    }
}

/// A permit backed by a closure
#[derive(Clone, Copy, Debug, Default)]
pub struct PermitFn<F>(pub F);

impl<F> SleepPermit for PermitFn<F>
where
    F: FnMut() -> Permission,
{
    fn permit(&mut self) -> Permission {
        (self.0)()
    }
}

impl SleepPermit for &BusyFlag {
    fn permit(&mut self) -> Permission {
        if self.is_busy() {
            Permission::Denied(DenyReason::ApplicationBusy)
        } else {
            Permission::Permitted
        }
    }
}

/// A permit waiting for a console to drain its transmit path
#[derive(Debug)]
pub struct ConsolePermit<C> {
    /// Console to prepare
    console: C,
}

impl<C> ConsolePermit<C>
where
    C: PrepareForSleep,
{
    /// Wrap a console
    pub const fn new(console: C) -> Self {
        Self { console }
    }

    /// Return the console
    pub const fn console(&self) -> &C {
        &self.console
    }

    /// Return the console mutably
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }
}

impl<C> SleepPermit for ConsolePermit<C>
where
    C: PrepareForSleep,
{
    fn permit(&mut self) -> Permission {
        match self.console.prepare_for_sleep() {
            Ok(()) => Permission::Permitted,
            Err(_) => Permission::Denied(DenyReason::DriverBusy),
        }
    }
}

/// Composition of an application permit and a platform permit
///
/// The application permit is asked first. The platform permit is only asked
/// once the application allows deep sleep.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionGate<A = AlwaysPermit, P = AlwaysPermit> {
    /// Application permit
    application: A,

    /// Platform permit
    platform: P,
}

impl PermissionGate {
    /// Create a gate that always allows deep sleep
    #[must_use]
    pub const fn new() -> Self {
        Self {
            application: AlwaysPermit,
            platform: AlwaysPermit,
        }
    }
}

impl<A, P> PermissionGate<A, P> {
    /// Replace the application permit
    pub fn with_application<B>(self, application: B) -> PermissionGate<B, P> {
        PermissionGate {
            application,
            platform: self.platform,
        }
    }

    /// Replace the platform permit
    pub fn with_platform<Q>(self, platform: Q) -> PermissionGate<A, Q> {
        PermissionGate {
            application: self.application,
            platform,
        }
    }

    /// Return the platform permit mutably
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }
}

impl<A, P> PermissionGate<A, P>
where
    A: SleepPermit,
    P: SleepPermit,
{
    /// Decide whether deep sleep is allowed right now
    pub fn check(&mut self) -> Permission {
        match self.application.permit() {
            Permission::Permitted => self.platform.permit(),
            denied @ Permission::Denied(_) => denied,
        }
    }
}
