//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one area against the simulation adapters and
//! the recording mocks in `mock_hw`.  Everything runs on the host.

#![cfg(not(target_os = "espidf"))]

mod engine_tests;
mod mock_hw;
mod node_tests;
mod settings_tests;
