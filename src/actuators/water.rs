//! Water valve with a fixed-duration safety cutoff.
//!
//! ```text
//!            command / arm ok
//!   ┌─────┐ ────────────────▶ ┌──────────────────┐
//!   │ OFF │                   │ ON, alarm armed  │
//!   └─────┘ ◀──────────────── └──────────────────┘
//!            command, or alarm fires
//! ```
//!
//! Both the remote command path and the alarm path take the same
//! non-blocking guard.  A command that loses the race backs off; the
//! winner leaves pin and state consistent.  A cutoff that loses the race
//! is deferred and delivered again through [`WaterValve::retry_deferred`].
//!
//! Readers never touch the guard.  Each completed transition publishes a
//! [`ValveSnapshot`] into a short blocking lock that `state` and
//! `armed_alarm` read.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal::digital::OutputPin;
use log::{debug, error, info, warn};

use super::{SwitchState, ToggleOutcome};
use crate::app::ports::{AlarmId, AlarmPort};

struct ValveInner<P, A> {
    pin: P,
    alarms: A,
    state: SwitchState,
    alarm: Option<AlarmId>,
}

impl<P: OutputPin, A: AlarmPort> ValveInner<P, A> {
    fn snapshot(&self) -> ValveSnapshot {
        ValveSnapshot {
            state: self.state,
            alarm: self.alarm,
        }
    }

    fn open(&mut self, watering_time_ms: u32) -> ToggleOutcome {
        if let Some(stale) = self.alarm.take() {
            self.alarms.cancel(stale);
        }
        let Some(id) = self.alarms.arm(watering_time_ms) else {
            warn!("Water: safety alarm unavailable, valve stays closed");
            return ToggleOutcome::ArmFailed;
        };
        if self.pin.set_high().is_err() {
            error!("Water: pin write failed, valve stays closed");
            self.alarms.cancel(id);
            return ToggleOutcome::PinFault;
        }
        self.alarm = Some(id);
        self.state = SwitchState::On;
        info!("Water: ON (cutoff in {} ms)", watering_time_ms);
        ToggleOutcome::Toggled(SwitchState::On)
    }

    fn close(&mut self) -> ToggleOutcome {
        if let Some(id) = self.alarm.take() {
            self.alarms.cancel(id);
        }
        if self.pin.set_low().is_err() {
            // Stay ON so the next command retries the close.
            error!("Water: pin write failed while closing");
            return ToggleOutcome::PinFault;
        }
        self.state = SwitchState::Off;
        info!("Water: OFF");
        ToggleOutcome::Toggled(SwitchState::Off)
    }
}

/// State and armed alarm as of the last completed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveSnapshot {
    pub state: SwitchState,
    pub alarm: Option<AlarmId>,
}

pub struct WaterValve<P, A> {
    inner: Mutex<CriticalSectionRawMutex, ValveInner<P, A>>,
    snapshot: BlockingMutex<CriticalSectionRawMutex, Cell<ValveSnapshot>>,
    deferred: BlockingMutex<CriticalSectionRawMutex, Cell<Option<AlarmId>>>,
    watering_time_ms: u32,
}

impl<P: OutputPin, A: AlarmPort> WaterValve<P, A> {
    pub fn new(pin: P, alarms: A, watering_time_ms: u32) -> Self {
        Self {
            inner: Mutex::new(ValveInner {
                pin,
                alarms,
                state: SwitchState::Off,
                alarm: None,
            }),
            snapshot: BlockingMutex::new(Cell::new(ValveSnapshot {
                state: SwitchState::Off,
                alarm: None,
            })),
            deferred: BlockingMutex::new(Cell::new(None)),
            watering_time_ms,
        }
    }

    /// Remote command: open if closed, close if open.
    pub fn toggle(&self) -> ToggleOutcome {
        let Ok(mut inner) = self.inner.try_lock() else {
            debug!("Water: busy, command dropped");
            return ToggleOutcome::Busy;
        };
        let outcome = match inner.state {
            SwitchState::Off => inner.open(self.watering_time_ms),
            SwitchState::On => inner.close(),
        };
        self.publish(&inner);
        outcome
    }

    /// Safety alarm expiry.  Only the alarm armed for the current ON period
    /// closes the valve; anything else is stale.  If the guard is held the
    /// id is kept for [`WaterValve::retry_deferred`].
    pub fn on_alarm(&self, id: AlarmId) -> ToggleOutcome {
        let Ok(mut inner) = self.inner.try_lock() else {
            debug!("Water: busy, alarm {} deferred", id.0);
            self.deferred.lock(|d| d.set(Some(id)));
            return ToggleOutcome::Busy;
        };
        if inner.state != SwitchState::On || inner.alarm != Some(id) {
            debug!("Water: stale alarm {}", id.0);
            return ToggleOutcome::Ignored;
        }
        // Already expired; nothing to cancel.
        inner.alarm = None;
        info!("Water: safety cutoff");
        let outcome = inner.close();
        self.publish(&inner);
        outcome
    }

    /// Deliver a cutoff that previously found the guard held.
    pub fn retry_deferred(&self) -> Option<ToggleOutcome> {
        let id = self.deferred.lock(Cell::take)?;
        Some(self.on_alarm(id))
    }

    pub fn snapshot(&self) -> ValveSnapshot {
        self.snapshot.lock(Cell::get)
    }

    pub fn state(&self) -> SwitchState {
        self.snapshot().state
    }

    pub fn armed_alarm(&self) -> Option<AlarmId> {
        self.snapshot().alarm
    }

    fn publish(&self, inner: &ValveInner<P, A>) {
        let snap = inner.snapshot();
        self.snapshot.lock(|s| s.set(snap));
    }
}
