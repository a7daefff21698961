//! Sensor subsystem: the closed set of sensor wrappers and the
//! aggregating [`SensorHub`].
//!
//! Each wrapper exposes the same four steps: `init`, `prepare`, `collect`
//! (as a short JSON text), `teardown`.  A wrapper whose `init` failed is
//! marked disconnected and skipped by every later step.
//!
//! ## Dual-target design
//!
//! On ESP-IDF the wrappers bit-bang their bus.  On host/test each wrapper
//! reads from a [`SimSensor`] handle so tests can inject values and
//! failures per instance.

pub mod climate;
pub mod water_temp;

use core::fmt;
use core::fmt::Write as _;

use log::{info, warn};

use crate::coordinator::{SENSOR_PAYLOAD_LEN, SensorQueueEntry};
pub use climate::ClimateSensor;
pub use water_temp::WaterTempSensor;

/// Maximum number of sensors on one node.
pub const MAX_SENSORS: usize = 4;

/// Text produced by one collection.
pub type SensorText = heapless::String<SENSOR_PAYLOAD_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The sensor did not answer its presence/handshake pulse.
    NoResponse,
    /// Bit timing was out of spec.
    Timeout,
    /// Checksum or CRC mismatch.
    Checksum,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no response"),
            Self::Timeout => write!(f, "bus timeout"),
            Self::Checksum => write!(f, "checksum mismatch"),
        }
    }
}

/// Format `value` with two decimals, or `null`.
fn write_value(out: &mut SensorText, value: Option<f32>) {
    // Capacity is far above the longest reading text.
    let _ = match value {
        Some(v) => write!(out, "{:.2}", v),
        None => out.write_str("null"),
    };
}

// ───────────────────────────────────────────────────────────────
// Closed wrapper set
// ───────────────────────────────────────────────────────────────

pub enum SensorSlot {
    Climate(ClimateSensor),
    WaterTemp(WaterTempSensor),
}

impl SensorSlot {
    /// Publish topic suffix for this sensor.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Climate(_) => climate::TOPIC,
            Self::WaterTemp(_) => water_temp::TOPIC,
        }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        match self {
            Self::Climate(s) => s.init(),
            Self::WaterTemp(s) => s.init(),
        }
    }

    fn prepare(&mut self) {
        match self {
            Self::Climate(s) => s.prepare(),
            Self::WaterTemp(s) => s.prepare(),
        }
    }

    fn collect(&mut self, out: &mut SensorText) {
        match self {
            Self::Climate(s) => s.collect(out),
            Self::WaterTemp(s) => s.collect(out),
        }
    }

    fn teardown(&mut self) {
        match self {
            Self::Climate(s) => s.teardown(),
            Self::WaterTemp(s) => s.teardown(),
        }
    }
}

struct Installed {
    slot: SensorSlot,
    connected: bool,
}

/// Owns every sensor wrapper on the node.
pub struct SensorHub {
    sensors: heapless::Vec<Installed, MAX_SENSORS>,
}

impl Default for SensorHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorHub {
    pub fn new() -> Self {
        Self {
            sensors: heapless::Vec::new(),
        }
    }

    /// Register a sensor.  Returns it back if the hub is full.
    pub fn add(&mut self, slot: SensorSlot) -> Result<(), SensorSlot> {
        self.sensors
            .push(Installed {
                slot,
                connected: false,
            })
            .map_err(|rejected| rejected.slot)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Topic suffix of the sensor at `index`.
    pub fn topic(&self, index: usize) -> Option<&'static str> {
        self.sensors.get(index).map(|s| s.slot.topic())
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.sensors.get(index).is_some_and(|s| s.connected)
    }

    /// Initialise every sensor; failures mark the sensor disconnected.
    /// Returns how many came up.
    pub fn init_all(&mut self) -> usize {
        let mut up = 0;
        for (i, s) in self.sensors.iter_mut().enumerate() {
            match s.slot.init() {
                Ok(()) => {
                    s.connected = true;
                    up += 1;
                    info!("Sensors: #{} '{}' ready", i, s.slot.topic());
                }
                Err(e) => {
                    s.connected = false;
                    warn!("Sensors: #{} '{}' init failed: {}, disconnected", i, s.slot.topic(), e);
                }
            }
        }
        up
    }

    pub fn prepare_all(&mut self) {
        for s in self.sensors.iter_mut().filter(|s| s.connected) {
            s.slot.prepare();
        }
    }

    /// Collect every connected sensor into a queue entry.
    pub fn collect_all(&mut self) -> heapless::Vec<SensorQueueEntry, MAX_SENSORS> {
        let mut entries = heapless::Vec::new();
        for (i, s) in self.sensors.iter_mut().enumerate() {
            if !s.connected {
                continue;
            }
            let mut text = SensorText::new();
            s.slot.collect(&mut text);
            // At most MAX_SENSORS entries, one per sensor.
            let _ = entries.push(SensorQueueEntry::new(i as u8, &text));
        }
        entries
    }

    pub fn teardown_all(&mut self) {
        for s in self.sensors.iter_mut().filter(|s| s.connected) {
            s.slot.teardown();
            s.connected = false;
        }
        info!("Sensors: all torn down");
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation handle
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimState {
    init_fails: bool,
    values: Option<[f32; 2]>,
    prepared: u32,
    torn_down: bool,
}

/// Per-instance injection point for simulated sensors.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Default)]
pub struct SimSensor(std::sync::Arc<std::sync::Mutex<SimState>>);

#[cfg(not(target_os = "espidf"))]
impl SimSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values returned by the next collections; `None` simulates a read
    /// failure.
    pub fn set_values(&self, values: Option<[f32; 2]>) {
        self.with(|s| s.values = values);
    }

    pub fn fail_init(&self) {
        self.with(|s| s.init_fails = true);
    }

    pub fn prepared_count(&self) -> u32 {
        self.with(|s| s.prepared)
    }

    pub fn is_torn_down(&self) -> bool {
        self.with(|s| s.torn_down)
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut guard = match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn init(&self) -> Result<(), SensorError> {
        self.with(|s| {
            s.torn_down = false;
            if s.init_fails { Err(SensorError::NoResponse) } else { Ok(()) }
        })
    }

    fn prepare(&self) {
        self.with(|s| s.prepared += 1);
    }

    fn values(&self) -> Result<[f32; 2], SensorError> {
        self.with(|s| s.values.ok_or(SensorError::Timeout))
    }

    fn teardown(&self) {
        self.with(|s| s.torn_down = true);
    }
}
