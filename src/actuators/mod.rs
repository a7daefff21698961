//! Remotely controlled binary actuators.
//!
//! The set is closed: [`ActuatorId`] names every actuator and
//! [`ActuatorBank`] dispatches on it.  Control topic `i` of the broker
//! engine is `ActuatorId::ALL[i]`, so an arriving message maps straight to
//! a toggle.  Message content is not inspected; arrival alone toggles.

pub mod light;
pub mod water;

use core::fmt;

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::app::ports::{AlarmId, AlarmPort};
use crate::broker::{CommandHandler, TopicId};
pub use light::Light;
pub use water::WaterValve;

/// Recorded output state, published as `"ON"` / `"OFF"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Off,
    On,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a toggle or alarm delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Transition completed; the new state.
    Toggled(SwitchState),
    /// The reentrancy guard was held; nothing happened.
    Busy,
    /// No safety alarm could be armed, so the output stayed off.
    ArmFailed,
    /// The alarm did not belong to the current ON period.
    Ignored,
    /// The GPIO write failed; the recorded state is unchanged.
    PinFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorId {
    Water,
    Light,
}

impl ActuatorId {
    /// Subscription order: index `i` is control topic `i`.
    pub const ALL: [ActuatorId; 2] = [ActuatorId::Water, ActuatorId::Light];

    /// Control topic suffixes, in [`ActuatorId::ALL`] order.
    pub const NAMES: [&'static str; 2] = [Self::ALL[0].name(), Self::ALL[1].name()];

    /// Topic suffix under `<client-id>/control/` and `<client-id>/`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Light => "light",
        }
    }

    pub fn from_topic(topic: TopicId) -> Option<Self> {
        Self::ALL.get(topic).copied()
    }
}

/// Owns every actuator.  All methods take `&self`; each actuator guards its
/// own state, so the bank can be shared between the command path and the
/// alarm path.
pub struct ActuatorBank<LP, WP, A> {
    light: Light<LP>,
    water: WaterValve<WP, A>,
}

impl<LP: OutputPin, WP: OutputPin, A: AlarmPort> ActuatorBank<LP, WP, A> {
    pub fn new(light_pin: LP, water_pin: WP, alarms: A, watering_time_ms: u32) -> Self {
        Self {
            light: Light::new(light_pin),
            water: WaterValve::new(water_pin, alarms, watering_time_ms),
        }
    }

    pub fn toggle(&self, id: ActuatorId) -> ToggleOutcome {
        match id {
            ActuatorId::Water => self.water.toggle(),
            ActuatorId::Light => self.light.toggle(),
        }
    }

    pub fn state(&self, id: ActuatorId) -> SwitchState {
        match id {
            ActuatorId::Water => self.water.state(),
            ActuatorId::Light => self.light.state(),
        }
    }

    /// Deliver an expired safety alarm.
    pub fn on_alarm(&self, alarm: AlarmId) -> ToggleOutcome {
        self.water.on_alarm(alarm)
    }

    /// Redeliver a safety alarm that arrived while the valve was busy.
    pub fn retry_deferred(&self) -> Option<ToggleOutcome> {
        self.water.retry_deferred()
    }

    pub fn water(&self) -> &WaterValve<WP, A> {
        &self.water
    }

    pub fn light(&self) -> &Light<LP> {
        &self.light
    }
}

impl<LP: OutputPin, WP: OutputPin, A: AlarmPort> CommandHandler for ActuatorBank<LP, WP, A> {
    fn control_topics(&self) -> &[&'static str] {
        &ActuatorId::NAMES
    }

    fn on_command(&self, topic: TopicId, _payload: &[u8]) {
        match ActuatorId::from_topic(topic) {
            Some(id) => {
                self.toggle(id);
            }
            None => warn!("Actuators: no actuator for topic {}", topic),
        }
    }
}
