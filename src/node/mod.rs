//! The two execution units.
//!
//! ```text
//!   core 1: SensorUnit ──push──► SensorQueue ──drain──► core 0: network unit
//!                 ▲                                          │
//!                 └──────── RestartHandshake ◄───────────────┘
//! ```
//!
//! The network unit boots into exactly one of [`PortalUnit`] or
//! [`BrokerUnit`], chosen by the mode button.  Both keep draining the queue
//! so the sensor unit never stalls for long.

pub mod network;
pub mod sensor_unit;

use log::info;

use crate::app::ports::ModeButton;
use crate::coordinator::{RestartHandshake, SensorQueue};

pub use network::{BrokerStep, BrokerUnit, PortalStep, PortalUnit};
pub use sensor_unit::{SensorStep, SensorUnit};

/// The only state shared between the two units.
#[derive(Clone, Copy)]
pub struct NodeLinks<'a> {
    pub queue: &'a SensorQueue,
    pub restart: &'a RestartHandshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Serve the configuration portal.
    Portal,
    /// Run the broker session.
    Broker,
}

/// Held button at boot selects the portal.
pub fn select_boot_mode(button: &impl ModeButton) -> BootMode {
    let mode = if button.is_pressed() {
        BootMode::Portal
    } else {
        BootMode::Broker
    };
    info!("Boot: {:?} mode", mode);
    mode
}
