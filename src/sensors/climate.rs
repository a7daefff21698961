//! Room humidity / temperature sensor (DHT22-class, single-wire).
//!
//! Text format: `{"r_humidity":H,"r_temperature":T}` with two decimals, or
//! both values `null` when the read fails.
//!
//! On ESP-IDF the 40-bit frame is bit-banged on [`pins::CLIMATE_DATA_GPIO`];
//! pulse widths are measured with interrupts masked.

use core::fmt::Write as _;

use log::{debug, warn};

use super::{SensorError, SensorText, write_value};
#[cfg(not(target_os = "espidf"))]
use super::SimSensor;

pub const TOPIC: &str = "climate";

/// Decoded frame: relative humidity (%) and temperature (°C).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub humidity: f32,
    pub temperature: f32,
}

/// Validate the checksum and decode a raw 5-byte frame.
pub fn decode_frame(frame: [u8; 5]) -> Result<ClimateReading, SensorError> {
    let sum = frame[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return Err(SensorError::Checksum);
    }
    let humidity = f32::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;
    let magnitude = f32::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]])) / 10.0;
    let temperature = if frame[2] & 0x80 != 0 { -magnitude } else { magnitude };
    Ok(ClimateReading {
        humidity,
        temperature,
    })
}

pub struct ClimateSensor {
    #[cfg(target_os = "espidf")]
    gpio: i32,
    #[cfg(not(target_os = "espidf"))]
    sim: SimSensor,
}

impl ClimateSensor {
    #[cfg(target_os = "espidf")]
    pub fn new(gpio: i32) -> Self {
        Self { gpio }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn simulated(sim: SimSensor) -> Self {
        Self { sim }
    }

    #[cfg(target_os = "espidf")]
    pub(super) fn init(&mut self) -> Result<(), SensorError> {
        bus::release(self.gpio);
        // A dead line never answers the start pulse.
        self.read_frame().map(|_| ())
    }

    #[cfg(not(target_os = "espidf"))]
    pub(super) fn init(&mut self) -> Result<(), SensorError> {
        self.sim.init()
    }

    /// The sensor samples on demand; nothing to trigger ahead of time.
    #[cfg(target_os = "espidf")]
    pub(super) fn prepare(&mut self) {}

    #[cfg(not(target_os = "espidf"))]
    pub(super) fn prepare(&mut self) {
        self.sim.prepare();
    }

    pub(super) fn collect(&mut self, out: &mut SensorText) {
        let reading = self.read();
        if let Err(e) = reading {
            warn!("Climate: read failed: {}", e);
        }
        let reading = reading.ok();
        let _ = out.write_str("{\"r_humidity\":");
        write_value(out, reading.map(|r| r.humidity));
        let _ = out.write_str(",\"r_temperature\":");
        write_value(out, reading.map(|r| r.temperature));
        let _ = out.write_char('}');
        debug!("Climate: {}", out);
    }

    #[cfg(target_os = "espidf")]
    pub(super) fn teardown(&mut self) {
        bus::release(self.gpio);
    }

    #[cfg(not(target_os = "espidf"))]
    pub(super) fn teardown(&mut self) {
        self.sim.teardown();
    }

    #[cfg(target_os = "espidf")]
    fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.read_frame().and_then(decode_frame)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.sim.values().map(|[humidity, temperature]| ClimateReading {
            humidity,
            temperature,
        })
    }

    #[cfg(target_os = "espidf")]
    fn read_frame(&mut self) -> Result<[u8; 5], SensorError> {
        bus::start_pulse(self.gpio);
        critical_section::with(|_| {
            // Response: low 80 µs, high 80 µs, then the first bit's low phase.
            bus::wait_while(self.gpio, true, 100).map_err(|_| SensorError::NoResponse)?;
            bus::wait_while(self.gpio, false, 100).map_err(|_| SensorError::NoResponse)?;
            bus::wait_while(self.gpio, true, 100)?;
            let mut frame = [0u8; 5];
            for bit in 0..40 {
                bus::wait_while(self.gpio, false, 70)?;
                let high_us = bus::wait_while(self.gpio, true, 100)?;
                // 26-28 µs high is a 0, 70 µs is a 1.
                if high_us > 40 {
                    frame[bit / 8] |= 1 << (7 - bit % 8);
                }
            }
            Ok(frame)
        })
    }
}

#[cfg(target_os = "espidf")]
mod bus {
    use esp_idf_svc::sys::*;

    use super::SensorError;

    /// Float the line (open-drain high, external pull-up).
    pub fn release(gpio: i32) {
        // SAFETY: board-owned pin, only touched by this driver.
        unsafe {
            gpio_set_direction(gpio, gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD);
            gpio_set_level(gpio, 1);
        }
    }

    /// Host start signal: hold low ≥1 ms, then release.
    pub fn start_pulse(gpio: i32) {
        // SAFETY: as above; busy-wait delays only.
        unsafe {
            gpio_set_direction(gpio, gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD);
            gpio_set_level(gpio, 0);
            esp_rom_delay_us(1200);
            gpio_set_level(gpio, 1);
            esp_rom_delay_us(30);
        }
    }

    /// Spin while the line reads `level`; returns the time spent in µs.
    pub fn wait_while(gpio: i32, level: bool, timeout_us: u32) -> Result<u32, SensorError> {
        let mut elapsed = 0;
        // SAFETY: read-only register access.
        while (unsafe { gpio_get_level(gpio) } != 0) == level {
            if elapsed >= timeout_us {
                return Err(SensorError::Timeout);
            }
            unsafe { esp_rom_delay_us(1) };
            elapsed += 1;
        }
        Ok(elapsed)
    }
}
