//! GPIO bring-up and pin wrappers.
//!
//! [`GpioOutput`] implements `embedded_hal::digital::OutputPin` for the
//! actuator outputs; [`GpioInput`] reads the active-low boot button.
//! On simulation targets both keep their level in a shared atomic so tests
//! can observe and drive them through a [`PinProbe`].

use core::fmt;
#[cfg(not(target_os = "espidf"))]
use std::sync::Arc;
#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use log::info;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// GPIO driver failure carrying the ESP-IDF error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioError {
    ConfigFailed(i32),
    WriteFailed(i32),
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigFailed(rc) => write!(f, "gpio_config failed (rc={})", rc),
            Self::WriteFailed(rc) => write!(f, "gpio_set_level failed (rc={})", rc),
        }
    }
}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Shared view of a simulated pin level.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Default)]
pub struct PinProbe(Arc<AtomicBool>);

#[cfg(not(target_os = "espidf"))]
impl PinProbe {
    pub fn is_high(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, high: bool) {
        self.0.store(high, Ordering::Release);
    }
}

// ── Outputs ───────────────────────────────────────────────────

/// A push-pull output, driven low at construction.
pub struct GpioOutput {
    pin: i32,
    #[cfg(not(target_os = "espidf"))]
    level: PinProbe,
}

impl GpioOutput {
    #[cfg(target_os = "espidf")]
    pub fn new(pin: i32) -> Result<Self, GpioError> {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: configures a single board-owned pin from the boot task.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(GpioError::ConfigFailed(ret));
        }
        unsafe { gpio_set_level(pin, 0) };
        info!("hw_init: GPIO{} output, low", pin);
        Ok(Self { pin })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(pin: i32) -> Result<Self, GpioError> {
        info!("hw_init(sim): GPIO{} output, low", pin);
        Ok(Self {
            pin,
            level: PinProbe::default(),
        })
    }

    pub fn pin(&self) -> i32 {
        self.pin
    }

    /// Observe the simulated level.
    #[cfg(not(target_os = "espidf"))]
    pub fn probe(&self) -> PinProbe {
        self.level.clone()
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        // SAFETY: the pin was configured as an output in `new`.
        let ret = unsafe { gpio_set_level(self.pin, u32::from(high)) };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(GpioError::WriteFailed(ret)) }
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        self.level.set(high);
        Ok(())
    }
}

impl ErrorType for GpioOutput {
    type Error = GpioError;
}

impl OutputPin for GpioOutput {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

// ── Inputs ────────────────────────────────────────────────────

/// An input with the internal pull-up enabled.
pub struct GpioInput {
    pin: i32,
    #[cfg(not(target_os = "espidf"))]
    level: PinProbe,
}

impl GpioInput {
    #[cfg(target_os = "espidf")]
    pub fn pull_up(pin: i32) -> Result<Self, GpioError> {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: configures a single board-owned pin from the boot task.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(GpioError::ConfigFailed(ret));
        }
        info!("hw_init: GPIO{} input, pull-up", pin);
        Ok(Self { pin })
    }

    /// Simulated input; idles high like a pulled-up line.
    #[cfg(not(target_os = "espidf"))]
    pub fn pull_up(pin: i32) -> Result<Self, GpioError> {
        let level = PinProbe::default();
        level.set(true);
        Ok(Self { pin, level })
    }

    pub fn pin(&self) -> i32 {
        self.pin
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn probe(&self) -> PinProbe {
        self.level.clone()
    }

    #[cfg(target_os = "espidf")]
    pub fn is_high(&self) -> bool {
        // SAFETY: read-only register access on a configured input.
        (unsafe { gpio_get_level(self.pin) }) != 0
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn is_high(&self) -> bool {
        self.level.is_high()
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn output_starts_low_and_follows_writes() {
        let mut out = GpioOutput::new(16).unwrap();
        let probe = out.probe();
        assert!(!probe.is_high());
        out.set_high().unwrap();
        assert!(probe.is_high());
        out.set_low().unwrap();
        assert!(!probe.is_high());
    }

    #[test]
    fn input_idles_high() {
        let input = GpioInput::pull_up(10).unwrap();
        assert!(input.is_high());
        input.probe().set(false);
        assert!(!input.is_high());
    }
}
