//! Network execution unit: configuration portal or broker session.

use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

use super::NodeLinks;
use crate::actuators::{ActuatorBank, ActuatorId};
use crate::adapters::time::pause_ms;
use crate::app::ports::{AlarmPort, AlarmSource, ClockPort, CoreLockout, FlashPort, PortalPort};
use crate::broker::{BrokerEngine, BrokerTransport, MAX_IN_FLIGHT};
use crate::config::NodeConfig;
use crate::coordinator::LatestValues;
use crate::sensors::MAX_SENSORS;
use crate::settings::{SettingsRecord, SettingsStore};

// One reporting round must fit even while the previous one is unsettled.
const _: () = assert!(MAX_IN_FLIGHT >= 2 * (MAX_SENSORS + ActuatorId::ALL.len()));

// ───────────────────────────────────────────────────────────────
// Portal mode
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalStep {
    /// No submission waiting.
    Idle,
    /// A submission arrived but changed nothing.
    Unchanged,
    /// New settings persisted; restart requested.
    Saved,
    /// New settings could not be persisted; nothing requested.
    SaveFailed,
    /// A restart is already on its way.
    RestartPending,
}

pub struct PortalUnit<'a, F, L, P> {
    store: SettingsStore<F, L>,
    settings: SettingsRecord,
    portal: P,
    links: NodeLinks<'a>,
    latest: LatestValues,
}

impl<'a, F: FlashPort, L: CoreLockout, P: PortalPort> PortalUnit<'a, F, L, P> {
    pub fn new(store: SettingsStore<F, L>, settings: SettingsRecord, portal: P, links: NodeLinks<'a>) -> Self {
        Self {
            store,
            settings,
            portal,
            links,
            latest: LatestValues::new(),
        }
    }

    pub fn settings(&self) -> &SettingsRecord {
        &self.settings
    }

    pub fn store(&self) -> &SettingsStore<F, L> {
        &self.store
    }

    /// Latest reading per sensor, as shown on the portal page.
    pub fn latest(&self) -> &LatestValues {
        &self.latest
    }

    /// Drain readings onto the portal page, then apply at most one
    /// submission.
    pub fn step(&mut self) -> PortalStep {
        if self.links.queue.drain_into(&mut self.latest) > 0 {
            self.portal.show_readings(&self.latest);
        }
        if self.links.restart.is_requested() {
            return PortalStep::RestartPending;
        }
        let Some(submission) = self.portal.poll_submission() else {
            return PortalStep::Idle;
        };

        let mut updated = self.settings.clone();
        for (key, value) in &submission.fields {
            updated.set_named_field(key, value);
        }
        if updated == self.settings {
            debug!("Portal: submission left settings unchanged");
            return PortalStep::Unchanged;
        }

        match self.store.save(&mut updated) {
            Ok(()) => {
                info!("Portal: settings saved, restarting");
                self.settings = updated;
                self.links.restart.request();
                PortalStep::Saved
            }
            Err(e) => {
                warn!("Portal: settings not saved: {}", e);
                PortalStep::SaveFailed
            }
        }
    }

    pub fn run(mut self, idle_poll_ms: u32) -> ! {
        info!("Portal: waiting for submissions");
        loop {
            self.step();
            pause_ms(idle_poll_ms);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Broker mode
// ───────────────────────────────────────────────────────────────

/// What one broker-mode iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStep {
    pub drained: usize,
    pub alarms: usize,
    pub events: usize,
    pub published: usize,
    /// A restart is on its way; the broker was left alone this round.
    pub restart_pending: bool,
}

type Bank<'a, LP, WP, A> = &'a ActuatorBank<LP, WP, A>;

pub struct BrokerUnit<'a, T, LP, WP, A, S, C> {
    engine: BrokerEngine<T, Bank<'a, LP, WP, A>>,
    bank: Bank<'a, LP, WP, A>,
    alarms: S,
    clock: C,
    links: NodeLinks<'a>,
    latest: LatestValues,
    sensor_topics: Vec<String>,
    actuator_topics: Vec<(ActuatorId, String)>,
    publish_interval_ms: u64,
    last_publish_ms: Option<u64>,
}

impl<'a, T, LP, WP, A, S, C> BrokerUnit<'a, T, LP, WP, A, S, C>
where
    T: BrokerTransport,
    LP: OutputPin,
    WP: OutputPin,
    A: AlarmPort,
    S: AlarmSource,
    C: ClockPort,
{
    /// Initialise the engine from `settings` and start connecting.
    ///
    /// A failure is logged and kept in the engine status; the unit still
    /// runs so readings keep draining and alarms keep firing.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        transport: T,
        bank: Bank<'a, LP, WP, A>,
        settings: &SettingsRecord,
        config: &NodeConfig,
        sensor_names: &[&str],
        alarms: S,
        clock: C,
        links: NodeLinks<'a>,
    ) -> Self {
        let mut engine = BrokerEngine::new(transport, config.engine());
        if let Err(e) = engine.init(settings, bank).and_then(|()| engine.connect()) {
            warn!("Node: broker session not started: {}", e);
        }

        let client_id = settings.client_id();
        Self {
            engine,
            bank,
            alarms,
            clock,
            links,
            latest: LatestValues::new(),
            sensor_topics: sensor_names.iter().map(|n| format!("{client_id}/{n}")).collect(),
            actuator_topics: ActuatorId::ALL
                .iter()
                .map(|&id| (id, format!("{client_id}/{}", id.name())))
                .collect(),
            publish_interval_ms: u64::from(config.publish_interval_ms),
            last_publish_ms: None,
        }
    }

    pub fn engine(&self) -> &BrokerEngine<T, Bank<'a, LP, WP, A>> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut BrokerEngine<T, Bank<'a, LP, WP, A>> {
        &mut self.engine
    }

    pub fn latest(&self) -> &LatestValues {
        &self.latest
    }

    pub fn step(&mut self) -> BrokerStep {
        let mut step = BrokerStep {
            drained: self.links.queue.drain_into(&mut self.latest),
            ..BrokerStep::default()
        };

        while let Some(alarm) = self.alarms.poll_fired() {
            self.bank.on_alarm(alarm);
            step.alarms += 1;
        }
        if let Some(outcome) = self.bank.retry_deferred() {
            debug!("Node: deferred cutoff -> {:?}", outcome);
        }

        // Readings and safety cutoffs keep flowing until the reset lands.
        if self.links.restart.is_requested() {
            debug!("Node: restart pending, broker idle");
            step.restart_pending = true;
            return step;
        }

        step.events = self.engine.service();

        let now = self.clock.now_ms();
        let due = self
            .last_publish_ms
            .is_none_or(|last| now.saturating_sub(last) >= self.publish_interval_ms);
        if due && self.engine.is_connected() {
            step.published = self.publish_all();
            self.last_publish_ms = Some(now);
        }
        step
    }

    /// Latest reading per sensor, then every actuator state.
    fn publish_all(&mut self) -> usize {
        let mut sent = 0;
        for (index, text) in self.latest.iter() {
            let Some(topic) = self.sensor_topics.get(index) else {
                continue;
            };
            if self.engine.publish(topic, text.as_bytes()).is_ok() {
                sent += 1;
            }
        }
        for (id, topic) in &self.actuator_topics {
            let state = self.bank.state(*id);
            if self.engine.publish(topic, state.as_str().as_bytes()).is_ok() {
                sent += 1;
            }
        }
        debug!("Node: {} values published", sent);
        sent
    }

    pub fn run(mut self, idle_poll_ms: u32) -> ! {
        loop {
            self.step();
            pause_ms(idle_poll_ms);
        }
    }
}
