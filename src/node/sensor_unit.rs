//! Sensor execution unit.
//!
//! One cycle: prepare every sensor, wait the warm-up, collect, push each
//! reading (blocking while the queue is full), then poll the restart
//! handshake before waiting out the period.

use log::{debug, info};

use super::NodeLinks;
use crate::adapters::time::pause_ms;
use crate::app::ports::RestartPort;
use crate::config::NodeConfig;
use crate::coordinator::spin_until_reset;
use crate::sensors::SensorHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStep {
    /// A full cycle ran; this many readings were queued.
    Pushed(usize),
    /// A restart was acknowledged and the watchdog armed.
    Restarting,
}

pub struct SensorUnit<'a, R> {
    hub: SensorHub,
    links: NodeLinks<'a>,
    watchdog: R,
    warmup_ms: u32,
    period_ms: u32,
    restart_watchdog_ms: u32,
}

impl<'a, R: RestartPort> SensorUnit<'a, R> {
    pub fn new(hub: SensorHub, links: NodeLinks<'a>, watchdog: R, config: &NodeConfig) -> Self {
        Self {
            hub,
            links,
            watchdog,
            warmup_ms: config.sensor_warmup_ms,
            period_ms: config.sensor_period_ms,
            restart_watchdog_ms: config.restart_watchdog_ms,
        }
    }

    pub fn hub(&self) -> &SensorHub {
        &self.hub
    }

    /// Bring every sensor up.  Returns how many are connected.
    pub fn init(&mut self) -> usize {
        let up = self.hub.init_all();
        info!("SensorUnit: {}/{} sensors connected", up, self.hub.len());
        up
    }

    /// Run one cycle.  `sleep` is called with the warm-up and then the
    /// period, both in milliseconds.
    pub fn cycle(&mut self, mut sleep: impl FnMut(u32)) -> SensorStep {
        self.hub.prepare_all();
        sleep(self.warmup_ms);

        let readings = self.hub.collect_all();
        let pushed = readings.len();
        for entry in readings {
            self.links.queue.push_blocking(entry);
        }
        debug!("SensorUnit: {} readings queued", pushed);

        if self.poll_restart() {
            return SensorStep::Restarting;
        }
        sleep(self.period_ms);
        SensorStep::Pushed(pushed)
    }

    /// Tear the sensors down and arm the watchdog if a restart is pending.
    fn poll_restart(&mut self) -> bool {
        let hub = &mut self.hub;
        if !self.links.restart.acknowledge_with(|| hub.teardown_all()) {
            return false;
        }
        info!("SensorUnit: restart acknowledged");
        self.watchdog.arm_restart(self.restart_watchdog_ms);
        true
    }

    /// Loop forever; parks the core once a restart has been armed.
    pub fn run(mut self) -> ! {
        self.init();
        loop {
            let step = self.cycle(pause_ms);
            if step == SensorStep::Restarting {
                spin_until_reset();
            }
        }
    }
}
