//! Application boundary.
//!
//! Domain modules (`settings`, `broker`, `coordinator`, `actuators`, `node`)
//! touch the outside world only through the **port traits** in [`ports`].

pub mod ports;
