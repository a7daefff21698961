//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ domain (settings · broker · coordinator · actuators)
//! ```
//!
//! Every trait here has a real ESP-IDF implementation under `adapters/` or
//! `drivers/` and a host simulation twin, so both execution-unit loops run
//! unmodified in integration tests.

use crate::coordinator::LatestValues;

// ───────────────────────────────────────────────────────────────
// Raw flash (driven adapter: settings store ↔ NOR flash)
// ───────────────────────────────────────────────────────────────

/// Byte-addressed NOR flash with erase-before-program semantics.
///
/// Offsets are absolute within the flash address space.  `erase` must be
/// called with erase-unit aligned spans and `program` with write-unit
/// aligned offsets; implementations reject anything else with
/// [`FlashError::Misaligned`].
pub trait FlashPort {
    /// Total size of the flash address space in bytes.
    fn size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase `len` bytes starting at `offset` back to `0xFF`.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError>;

    /// Program `data` at `offset`.  No read-back verification is performed.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;
}

/// Keeps the other execution unit away from flash for the duration of `f`.
///
/// While flash is being erased or programmed it cannot be read, and it may
/// hold code the other core is executing.
pub trait CoreLockout {
    fn with_other_core_parked<R>(&mut self, f: impl FnOnce() -> R) -> R;
}

// ───────────────────────────────────────────────────────────────
// Alarms and restart (driven adapters: actuators / supervisor ↔ timers)
// ───────────────────────────────────────────────────────────────

/// Identifier of an armed one-shot alarm.  Never reused within a boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(pub u32);

/// One-shot alarm facility used by the water safety cutoff.
pub trait AlarmPort {
    /// Arm a one-shot alarm `delay_ms` from now.  `None` if no alarm slot
    /// is available.
    fn arm(&mut self, delay_ms: u32) -> Option<AlarmId>;

    /// Cancel a pending alarm.  Returns `false` if it already fired or was
    /// never armed.
    fn cancel(&mut self, id: AlarmId) -> bool;
}

/// Where expired alarms are collected.  Polled by the network loop so the
/// actuator reacts on that thread instead of in timer context.
pub trait AlarmSource {
    fn poll_fired(&self) -> Option<AlarmId>;
}

/// Forces a full-chip restart through the hardware watchdog.
pub trait RestartPort {
    /// Arm the watchdog with `timeout_ms` and stop feeding it.  The caller
    /// is expected to spin afterwards.
    fn arm_restart(&mut self, timeout_ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Time and local inputs
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

/// The boot-mode / default-settings push button.
pub trait ModeButton {
    /// `true` while the button is held down.
    fn is_pressed(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Configuration portal (driving adapter: portal → settings)
// ───────────────────────────────────────────────────────────────

/// One submission from the local configuration portal: untrusted
/// key/value pairs in the order they were received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub fields: Vec<(String, String)>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder helper used by portal adapters and tests.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }
}

/// Source of configuration submissions and sink for the readings the
/// portal page shows.  Request parsing and page templating live outside
/// the core; only parsed pairs and the latest readings cross this port.
pub trait PortalPort {
    /// Take the next pending submission, if any.
    fn poll_submission(&mut self) -> Option<Submission>;

    /// Replace the readings shown on the portal page.
    fn show_readings(&mut self, readings: &LatestValues);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`FlashPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// The requested span falls outside the flash address space.
    OutOfBounds,
    /// Offset or length is not aligned to the erase/write unit.
    Misaligned,
    /// The platform driver returned an error code.
    Device(i32),
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "flash access out of bounds"),
            Self::Misaligned => write!(f, "flash access misaligned"),
            Self::Device(code) => write!(f, "flash driver error {}", code),
        }
    }
}
