//! Restart watchdog.
//!
//! A restart is performed by arming the Task Watchdog Timer with a short
//! timeout, subscribing the calling task, and never feeding it.  The
//! caller then parks in [`spin_until_reset`](crate::coordinator::spin_until_reset).

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::{info, warn};

use crate::app::ports::RestartPort;

#[derive(Clone, Default)]
pub struct RestartWatchdog {
    #[cfg(not(target_os = "espidf"))]
    armed_ms: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

impl RestartWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout of the last arm request, if any.
    #[cfg(not(target_os = "espidf"))]
    pub fn armed_timeout_ms(&self) -> Option<u32> {
        match self.armed_ms.load(std::sync::atomic::Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }
}

impl RestartPort for RestartWatchdog {
    #[cfg(target_os = "espidf")]
    fn arm_restart(&mut self, timeout_ms: u32) {
        unsafe {
            let cfg = esp_task_wdt_config_t {
                timeout_ms,
                idle_core_mask: 0,
                trigger_panic: true,
            };
            let ret = esp_task_wdt_reconfigure(&cfg);
            if ret != ESP_OK as i32 {
                warn!("Watchdog: reconfigure returned {}, restarting directly", ret);
                esp_restart();
            }
            let ret = esp_task_wdt_add(core::ptr::null_mut());
            if ret != ESP_OK as i32 {
                warn!("Watchdog: subscribe returned {}, restarting directly", ret);
                esp_restart();
            }
        }
        info!("Watchdog: armed, reset in {} ms", timeout_ms);
    }

    #[cfg(not(target_os = "espidf"))]
    fn arm_restart(&mut self, timeout_ms: u32) {
        if timeout_ms == 0 {
            warn!("Watchdog(sim): zero timeout, treated as 1 ms");
        }
        self.armed_ms
            .store(timeout_ms.max(1), std::sync::atomic::Ordering::SeqCst);
        info!("Watchdog(sim): armed, reset in {} ms", timeout_ms);
    }
}
