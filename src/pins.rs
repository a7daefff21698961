//! GPIO pin assignments for the greenhouse node board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// Digital output: water valve / pump relay (active HIGH).
pub const WATER_VALVE_GPIO: i32 = 16;
/// Digital output: grow light relay (active HIGH).
pub const LIGHT_GPIO: i32 = 7;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Digital input: boot-mode button, active LOW with internal pull-up.
/// Held at reset -> configuration portal.
pub const MODE_BUTTON_GPIO: i32 = 10;

// ---------------------------------------------------------------------------
// Sensor buses
// ---------------------------------------------------------------------------

/// Single-wire data line of the room humidity/temperature sensor.
pub const CLIMATE_DATA_GPIO: i32 = 15;
/// 1-Wire bus of the water temperature probe.
pub const WATER_PROBE_GPIO: i32 = 22;
