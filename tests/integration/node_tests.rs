//! Both execution units wired together on host threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use greenhouse_node::actuators::{ActuatorBank, ActuatorId, SwitchState, ToggleOutcome};
use greenhouse_node::adapters::flash::{OtherCoreLockout, RawFlash};
use greenhouse_node::adapters::mqtt::{MqttTransport, SimBroker};
use greenhouse_node::adapters::portal::{PortalMailbox, parse_form};
use greenhouse_node::adapters::time::ManualClock;
use greenhouse_node::app::ports::AlarmSource;
use greenhouse_node::config::NodeConfig;
use greenhouse_node::coordinator::{QUEUE_CAPACITY, RestartHandshake, SensorQueue, SensorQueueEntry};
use greenhouse_node::node::{BrokerUnit, NodeLinks, PortalStep, PortalUnit, SensorStep, SensorUnit};
use greenhouse_node::sensors::{ClimateSensor, MAX_SENSORS, SensorHub, SensorSlot, SimSensor, WaterTempSensor};
use greenhouse_node::settings::{REGION_LEN, SettingsRecord, SettingsStore};

use crate::mock_hw::{ManualAlarms, RecordingPin, RecordingRestart};

fn hub(climate: &SimSensor, probe: &SimSensor) -> SensorHub {
    let mut hub = SensorHub::new();
    assert!(hub.add(SensorSlot::Climate(ClimateSensor::simulated(climate.clone()))).is_ok());
    assert!(hub.add(SensorSlot::WaterTemp(WaterTempSensor::simulated(probe.clone()))).is_ok());
    hub
}

#[test]
fn portal_save_restarts_sensor_unit() {
    let queue = SensorQueue::new();
    let restart = RestartHandshake::new();
    let links = NodeLinks { queue: &queue, restart: &restart };
    let mailbox = PortalMailbox::new();
    let (climate, probe) = (SimSensor::new(), SimSensor::new());
    climate.set_values(Some([48.0, 22.0]));
    probe.set_values(Some([17.5, 0.0]));
    let watchdog = RecordingRestart::default();

    let mut store = SettingsStore::new(RawFlash::simulated(REGION_LEN * 2), OtherCoreLockout::new());
    let settings = store.load_or_default(true);
    let mut portal = PortalUnit::new(store, settings, &mailbox, links);
    let mut sensors = SensorUnit::new(hub(&climate, &probe), links, watchdog.clone(), &NodeConfig::default());
    assert_eq!(sensors.init(), 2);

    let done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            while sensors.cycle(|_| thread::sleep(Duration::from_millis(1))) != SensorStep::Restarting {}
            done.store(true, Ordering::SeqCst);
        });

        assert!(mailbox.submit(parse_form("wifi_ssid=Greenhouse+2&wifi_pass=growgrowgrow")));
        let mut saved = false;
        while !done.load(Ordering::SeqCst) {
            saved |= portal.step() == PortalStep::Saved;
            thread::sleep(Duration::from_millis(1));
        }
        assert!(saved);
    });

    assert_eq!(watchdog.armed(), [100]);
    assert!(climate.is_torn_down());
    assert!(probe.is_torn_down());
    assert!(!restart.is_requested());
    let stored = portal.store().load().unwrap();
    assert_eq!(stored.wifi_ssid(), "Greenhouse 2");
    assert_eq!(stored.wifi_pass(), "growgrowgrow");
}

#[test]
fn full_queue_blocks_producer_until_drained() {
    let queue: SensorQueue = SensorQueue::new();
    for i in 0..QUEUE_CAPACITY {
        assert!(queue.try_push(SensorQueueEntry::new(0, &i.to_string())).is_ok());
    }
    assert!(queue.try_push(SensorQueueEntry::new(0, "overflow")).is_err());

    let pushed = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            queue.push_blocking(SensorQueueEntry::new(1, "late"));
            pushed.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));

        let first = queue.try_pop().unwrap();
        assert_eq!(first.text(), "0");
        while !pushed.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    });

    let mut rest = Vec::new();
    while let Some(e) = queue.try_pop() {
        rest.push(e.text().to_string());
    }
    assert_eq!(rest.len(), QUEUE_CAPACITY);
    assert_eq!(rest.last().map(String::as_str), Some("late"));
}

#[test]
fn command_and_alarm_race_keeps_pin_and_state_consistent() {
    let water = RecordingPin::new();
    let alarms = ManualAlarms::new();
    let bank = ActuatorBank::new(RecordingPin::new(), water.clone(), alarms.clone(), 10_000);

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..500 {
                bank.toggle(ActuatorId::Water);
            }
        });
        s.spawn(|| {
            for _ in 0..500 {
                alarms.fire_all();
                while let Some(id) = alarms.poll_fired() {
                    bank.on_alarm(id);
                }
            }
        });
    });

    let on = bank.state(ActuatorId::Water) == SwitchState::On;
    assert_eq!(on, water.is_high());
    assert_eq!(on, bank.water().armed_alarm().is_some());
    assert!(alarms.armed().len() <= 1);
}

#[test]
fn state_reports_never_cost_a_safety_cutoff() {
    let water = RecordingPin::new();
    let alarms = ManualAlarms::new();
    let bank = ActuatorBank::new(RecordingPin::new(), water.clone(), alarms.clone(), 10_000);
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                let _ = bank.state(ActuatorId::Water);
            }
        });
        for _ in 0..500 {
            assert_eq!(bank.toggle(ActuatorId::Water), ToggleOutcome::Toggled(SwitchState::On));
            alarms.fire_all();
            let id = alarms.poll_fired().unwrap();
            assert_eq!(bank.on_alarm(id), ToggleOutcome::Toggled(SwitchState::Off));
            assert!(!water.is_high());
        }
        stop.store(true, Ordering::Relaxed);
    });
    assert_eq!(bank.retry_deferred(), None);
}

#[test]
fn broker_unit_runs_commands_alarms_and_reports() {
    let queue = SensorQueue::new();
    let restart = RestartHandshake::new();
    let links = NodeLinks { queue: &queue, restart: &restart };
    let (light, water) = (RecordingPin::new(), RecordingPin::new());
    let alarms = ManualAlarms::new();
    let bank = ActuatorBank::new(light.clone(), water.clone(), alarms.clone(), 10_000);
    let broker = SimBroker::new();
    let clock = ManualClock::new();

    let mut settings = SettingsRecord::compiled_defaults(false);
    settings.set_named_field("client_id", "gh1");
    let config = NodeConfig {
        tls: false,
        ..NodeConfig::default()
    };
    let mut unit = BrokerUnit::start(
        MqttTransport::simulated(broker.clone()),
        &bank,
        &settings,
        &config,
        &["climate", "w_temp"],
        alarms.clone(),
        clock.clone(),
        links,
    );
    for _ in 0..4 {
        unit.step();
    }
    assert_eq!(broker.subscriptions(), ["gh1/control/water", "gh1/control/light"]);

    broker.deliver("gh1/control/water", b"1");
    unit.step();
    assert!(water.is_high());
    assert_eq!(alarms.armed()[0].1, 10_000);

    assert!(queue.try_push(SensorQueueEntry::new(1, "{\"w_temp\":17.50}")).is_ok());
    clock.advance(3_000);
    unit.step();
    assert_eq!(broker.published_on("gh1/w_temp").last().map(Vec::as_slice), Some(&b"{\"w_temp\":17.50}"[..]));
    assert_eq!(broker.published_on("gh1/water").last().map(Vec::as_slice), Some(&b"ON"[..]));
    assert!(broker.published_on("gh1/climate").is_empty());

    alarms.fire_all();
    assert_eq!(unit.step().alarms, 1);
    assert!(!water.is_high());
    assert_eq!(bank.state(ActuatorId::Water), SwitchState::Off);
    assert!(!light.is_high());
}

#[test]
fn fully_populated_node_publishes_every_value_each_round() {
    let queue = SensorQueue::new();
    let restart = RestartHandshake::new();
    let links = NodeLinks { queue: &queue, restart: &restart };
    let alarms = ManualAlarms::new();
    let bank = ActuatorBank::new(RecordingPin::new(), RecordingPin::new(), alarms.clone(), 10_000);
    let broker = SimBroker::new();
    let clock = ManualClock::new();
    let settings = SettingsRecord::compiled_defaults(false);
    let config = NodeConfig {
        tls: false,
        ..NodeConfig::default()
    };
    let names = ["climate", "w_temp", "soil", "lux"];
    assert_eq!(names.len(), MAX_SENSORS);

    let mut unit = BrokerUnit::start(
        MqttTransport::simulated(broker.clone()),
        &bank,
        &settings,
        &config,
        &names,
        alarms,
        clock.clone(),
        links,
    );
    for (i, name) in names.iter().enumerate() {
        assert!(queue.try_push(SensorQueueEntry::new(i as u8, name)).is_ok());
    }
    while !unit.engine().is_connected() {
        unit.step();
    }
    broker.hold_publish_acks(true);

    let round = MAX_SENSORS + ActuatorId::ALL.len();
    assert_eq!(broker.published().len(), round);
    clock.advance(3_000);
    assert_eq!(unit.step().published, round);
    assert_eq!(unit.engine().status(), None);
    assert_eq!(broker.published().len(), 2 * round);
}

#[test]
fn stale_alarm_does_not_close_new_watering_period() {
    let water = RecordingPin::new();
    let alarms = ManualAlarms::new();
    let bank = ActuatorBank::new(RecordingPin::new(), water.clone(), alarms.clone(), 10_000);

    bank.toggle(ActuatorId::Water);
    let first = alarms.armed()[0].0;
    bank.toggle(ActuatorId::Water);
    bank.toggle(ActuatorId::Water);
    assert_eq!(alarms.cancelled(), [first]);

    assert_eq!(bank.on_alarm(first), ToggleOutcome::Ignored);
    assert!(water.is_high());
}

#[test]
fn exhausted_alarms_keep_valve_closed() {
    let water = RecordingPin::new();
    let alarms = ManualAlarms::new();
    alarms.exhaust();
    let bank = ActuatorBank::new(RecordingPin::new(), water.clone(), alarms, 10_000);

    assert_eq!(bank.toggle(ActuatorId::Water), ToggleOutcome::ArmFailed);
    assert!(water.levels().is_empty());
    assert_eq!(bank.state(ActuatorId::Water), SwitchState::Off);
}
