//! Cross-core coordination.
//!
//! Exactly two constructs are shared between the sensor unit and the
//! network unit: the bounded [`SensorQueue`] and the [`RestartHandshake`].
//! The settings record never crosses; the sensor unit learns about new
//! settings only through the restart that follows.

pub mod queue;
pub mod restart;

pub use queue::{LatestValues, QUEUE_CAPACITY, SENSOR_PAYLOAD_LEN, SensorQueue, SensorQueueEntry};
pub use restart::{RestartHandshake, spin_until_reset};
