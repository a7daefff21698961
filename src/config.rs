//! Node configuration parameters.
//!
//! Compiled in, never persisted.  Everything a user can change at runtime
//! lives in the flash settings record instead.

use serde::{Deserialize, Serialize};

use crate::broker::{EngineConfig, QoS};

/// Access point the external configuration portal brings up.
pub const PORTAL_AP_SSID: &str = "greenhouse_node";
pub const PORTAL_AP_PASSWORD: &str = "password";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Network unit ---
    /// Interval between publish rounds (milliseconds)
    pub publish_interval_ms: u32,
    /// Sleep between loop iterations when idle (milliseconds)
    pub idle_poll_ms: u32,

    // --- Sensor unit ---
    /// Wait between `prepare` and `collect` (milliseconds)
    pub sensor_warmup_ms: u32,
    /// Wait between sensor cycles (milliseconds)
    pub sensor_period_ms: u32,

    // --- Actuators ---
    /// Water valve safety cutoff (milliseconds)
    pub watering_time_ms: u32,

    // --- Broker ---
    pub qos: QoS,
    pub keep_alive_secs: u16,
    pub tls: bool,
    /// Consecutive automatic reconnects; `None` retries forever
    pub reconnect_limit: Option<u32>,

    // --- Restart ---
    /// Watchdog timeout used to force a restart (milliseconds)
    pub restart_watchdog_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 3_000,
            idle_poll_ms: 200,

            sensor_warmup_ms: 2_000,
            sensor_period_ms: 3_000,

            watering_time_ms: 10_000,

            qos: QoS::AtLeastOnce,
            keep_alive_secs: 300,
            tls: true,
            reconnect_limit: None,

            restart_watchdog_ms: 100,
        }
    }
}

impl NodeConfig {
    /// The broker engine's slice of the configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            qos: self.qos,
            keep_alive_secs: self.keep_alive_secs,
            tls: self.tls,
            reconnect_limit: self.reconnect_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = NodeConfig::default();
        assert!(c.publish_interval_ms > c.idle_poll_ms);
        assert!(c.sensor_period_ms > 0);
        assert!(c.watering_time_ms > 0);
        assert!(c.restart_watchdog_ms > 0);
        assert_eq!(c.qos.level(), 1);
        assert_eq!(c.reconnect_limit, None);
    }

    #[test]
    fn engine_slice_matches() {
        let c = NodeConfig {
            tls: false,
            reconnect_limit: Some(3),
            ..NodeConfig::default()
        };
        let e = c.engine();
        assert!(!e.tls);
        assert_eq!(e.reconnect_limit, Some(3));
        assert_eq!(e.keep_alive_secs, 300);
    }

    #[test]
    fn serde_roundtrip() {
        let c = NodeConfig {
            reconnect_limit: Some(5),
            qos: QoS::ExactlyOnce,
            ..NodeConfig::default()
        };
        let json = serde_json::to_string(&c).unwrap();
        let c2: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }
}
