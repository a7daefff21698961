//! Unified error type for the node firmware.
//!
//! Every subsystem keeps its own small `Copy` error enum; this one wraps
//! them so boot code can use `?` across subsystem boundaries.

use core::fmt;

use crate::app::ports::FlashError;
use crate::broker::EngineError;
use crate::sensors::SensorError;
use crate::settings::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The settings record could not be loaded or saved.
    Settings(StoreError),
    /// The broker engine failed.
    Broker(EngineError),
    /// A sensor could not be read.
    Sensor(SensorError),
    /// Raw flash access failed outside the settings store.
    Flash(FlashError),
    /// Peripheral or task initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings(e) => write!(f, "settings: {e}"),
            Self::Broker(e) => write!(f, "broker: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Settings(e)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Self::Broker(e)
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
