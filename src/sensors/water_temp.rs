//! Water temperature probe (DS18B20-class, 1-Wire, single drop).
//!
//! `prepare` starts a conversion so that by the time the sensor unit
//! collects, the result is ready.  Text format: `{"w_temp":T}` or
//! `{"w_temp":null}`.

use core::fmt::Write as _;

use log::{debug, warn};

use super::{SensorError, SensorText, write_value};
#[cfg(not(target_os = "espidf"))]
use super::SimSensor;

pub const TOPIC: &str = "w_temp";

#[cfg(target_os = "espidf")]
const SKIP_ROM: u8 = 0xCC;
#[cfg(target_os = "espidf")]
const CONVERT_T: u8 = 0x44;
#[cfg(target_os = "espidf")]
const READ_SCRATCHPAD: u8 = 0xBE;

/// Dallas/Maxim CRC-8 (polynomial 0x31, reflected).
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &byte| {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
        crc
    })
}

/// Validate a 9-byte scratchpad and return the temperature in °C.
pub fn decode_scratchpad(pad: [u8; 9]) -> Result<f32, SensorError> {
    if crc8(&pad[..8]) != pad[8] {
        return Err(SensorError::Checksum);
    }
    let raw = i16::from_le_bytes([pad[0], pad[1]]);
    Ok(f32::from(raw) / 16.0)
}

pub struct WaterTempSensor {
    #[cfg(target_os = "espidf")]
    gpio: i32,
    #[cfg(not(target_os = "espidf"))]
    sim: SimSensor,
}

impl WaterTempSensor {
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
        if onewire::reset(self.gpio) { Ok(()) } else { Err(SensorError::NoResponse) }
    }

    #[cfg(not(target_os = "espidf"))]
    pub(super) fn init(&mut self) -> Result<(), SensorError> {
        self.sim.init()
    }

    #[cfg(target_os = "espidf")]
    pub(super) fn prepare(&mut self) {
        if !onewire::reset(self.gpio) {
            warn!("WaterTemp: no presence pulse, conversion not started");
            return;
        }
        onewire::write_byte(self.gpio, SKIP_ROM);
        onewire::write_byte(self.gpio, CONVERT_T);
    }

    #[cfg(not(target_os = "espidf"))]
    pub(super) fn prepare(&mut self) {
        self.sim.prepare();
    }

    pub(super) fn collect(&mut self, out: &mut SensorText) {
        let reading = self.read();
        if let Err(e) = reading {
            warn!("WaterTemp: read failed: {}", e);
        }
        let _ = out.write_str("{\"w_temp\":");
        write_value(out, reading.ok());
        let _ = out.write_char('}');
        debug!("WaterTemp: {}", out);
    }

    #[cfg(target_os = "espidf")]
    pub(super) fn teardown(&mut self) {
        onewire::release(self.gpio);
    }

    #[cfg(not(target_os = "espidf"))]
    pub(super) fn teardown(&mut self) {
        self.sim.teardown();
    }

    #[cfg(target_os = "espidf")]
    fn read(&mut self) -> Result<f32, SensorError> {
        if !onewire::reset(self.gpio) {
            return Err(SensorError::NoResponse);
        }
        onewire::write_byte(self.gpio, SKIP_ROM);
        onewire::write_byte(self.gpio, READ_SCRATCHPAD);
        let mut pad = [0u8; 9];
        for b in &mut pad {
            *b = onewire::read_byte(self.gpio);
        }
        decode_scratchpad(pad)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&mut self) -> Result<f32, SensorError> {
        self.sim.values().map(|[t, _]| t)
    }
}

#[cfg(target_os = "espidf")]
mod onewire {
    use esp_idf_svc::sys::*;

    fn drive_low(gpio: i32) {
        // SAFETY: board-owned open-drain pin; register writes only.
        unsafe {
            gpio_set_direction(gpio, gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD);
            gpio_set_level(gpio, 0);
        }
    }

    pub fn release(gpio: i32) {
        // SAFETY: as above.
        unsafe { gpio_set_level(gpio, 1) };
    }

    fn sample(gpio: i32) -> bool {
        // SAFETY: read-only register access.
        unsafe { gpio_get_level(gpio) != 0 }
    }

    fn delay_us(us: u32) {
        // SAFETY: ROM busy-wait.
        unsafe { esp_rom_delay_us(us) };
    }

    /// Reset pulse; `true` if a device answered with a presence pulse.
    pub fn reset(gpio: i32) -> bool {
        critical_section::with(|_| {
            drive_low(gpio);
            delay_us(480);
            release(gpio);
            delay_us(70);
            let present = !sample(gpio);
            delay_us(410);
            present
        })
    }

    pub fn write_byte(gpio: i32, byte: u8) {
        critical_section::with(|_| {
            for i in 0..8 {
                drive_low(gpio);
                if byte & (1 << i) != 0 {
                    delay_us(6);
                    release(gpio);
                    delay_us(64);
                } else {
                    delay_us(60);
                    release(gpio);
                    delay_us(10);
                }
            }
        });
    }

    pub fn read_byte(gpio: i32) -> u8 {
        critical_section::with(|_| {
            let mut byte = 0u8;
            for i in 0..8 {
                drive_low(gpio);
                delay_us(3);
                release(gpio);
                delay_us(10);
                if sample(gpio) {
                    byte |= 1 << i;
                }
                delay_us(53);
            }
            byte
        })
    }
}
