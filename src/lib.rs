//! Greenhouse node firmware library.
//!
//! Everything except the binary entry point lives here so the host can run
//! both execution units against simulation adapters.  ESP-IDF specific code
//! is guarded by `#[cfg(target_os = "espidf")]` inside each module.

#![deny(unused_must_use)]

pub mod actuators;
pub mod adapters;
pub mod app;
pub mod broker;
pub mod config;
pub mod coordinator;
pub mod drivers;
pub mod error;
pub mod node;
pub mod pins;
pub mod sensors;
pub mod settings;
