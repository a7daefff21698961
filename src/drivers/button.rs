//! Boot-mode button.
//!
//! Active-low momentary switch on [`pins::MODE_BUTTON_GPIO`] with the
//! internal pull-up.  Sampled once at boot: held down selects the local
//! configuration portal, released selects broker mode.  A short debounce
//! requires the level to be stable across several samples.

use log::info;

use crate::app::ports::ModeButton;
use crate::drivers::hw_init::{GpioError, GpioInput};
use crate::pins;

/// Consecutive identical samples required to accept a level.
const DEBOUNCE_SAMPLES: u8 = 5;

pub struct BootButton {
    input: GpioInput,
}

impl BootButton {
    pub fn new() -> Result<Self, GpioError> {
        Ok(Self::from_input(GpioInput::pull_up(pins::MODE_BUTTON_GPIO)?))
    }

    pub fn from_input(input: GpioInput) -> Self {
        Self { input }
    }

    pub fn input(&self) -> &GpioInput {
        &self.input
    }
}

impl ModeButton for BootButton {
    fn is_pressed(&self) -> bool {
        let mut last = !self.input.is_high();
        let mut stable = 1;
        // Bounded: a line that never settles reads as released.
        for _ in 0..DEBOUNCE_SAMPLES * 4 {
            let now = !self.input.is_high();
            if now == last {
                stable += 1;
                if stable >= DEBOUNCE_SAMPLES {
                    if now {
                        info!("Button: GPIO{} held at boot", self.input.pin());
                    }
                    return now;
                }
            } else {
                last = now;
                stable = 1;
            }
        }
        false
    }
}
