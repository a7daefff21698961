//! Grow light: a plain toggle with no timer.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::digital::OutputPin;
use log::{error, info};

use super::{SwitchState, ToggleOutcome};

struct LightInner<P> {
    pin: P,
    state: SwitchState,
}

pub struct Light<P> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<LightInner<P>>>,
}

impl<P: OutputPin> Light<P> {
    pub fn new(pin: P) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(LightInner {
                pin,
                state: SwitchState::Off,
            })),
        }
    }

    /// Flip the light.  The recorded state only changes if the pin write
    /// succeeded.
    pub fn toggle(&self) -> ToggleOutcome {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            let next = inner.state.flipped();
            let driven = match next {
                SwitchState::On => inner.pin.set_high(),
                SwitchState::Off => inner.pin.set_low(),
            };
            if driven.is_err() {
                error!("Light: pin write failed, staying {}", inner.state);
                return ToggleOutcome::PinFault;
            }
            inner.state = next;
            info!("Light: {}", next);
            ToggleOutcome::Toggled(next)
        })
    }

    pub fn state(&self) -> SwitchState {
        self.inner.lock(|cell| cell.borrow().state)
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::drivers::hw_init::GpioOutput;

    #[test]
    fn toggle_flips_state_and_pin() {
        let pin = GpioOutput::new(7).unwrap();
        let probe = pin.probe();
        let light = Light::new(pin);

        assert_eq!(light.toggle(), ToggleOutcome::Toggled(SwitchState::On));
        assert!(probe.is_high());
        assert_eq!(light.toggle(), ToggleOutcome::Toggled(SwitchState::Off));
        assert!(!probe.is_high());
        assert_eq!(light.state(), SwitchState::Off);
    }
}
