//! Greenhouse node firmware entry point.
//!
//! ```text
//! ┌──────────────────────── core 0 (network unit) ────────────────────────┐
//! │  settings load ─▶ mode button ─▶ radio ─┬─▶ PortalUnit (HTTP form)    │
//! │                                         └─▶ BrokerUnit (MQTT/TLS)     │
//! │                     ▲ SensorQueue           │ RestartHandshake        │
//! └─────────────────────┼───────────────────────┼─────────────────────────┘
//! ┌─────────────────────┼─ core 1 (sensor unit) ▼─────────────────────────┐
//! │  prepare ─▶ warm-up ─▶ collect ─▶ push ─▶ restart? ─▶ period          │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use greenhouse_node::actuators::ActuatorBank;
use greenhouse_node::adapters::flash::{OtherCoreLockout, RawFlash};
use greenhouse_node::adapters::mqtt::MqttTransport;
use greenhouse_node::adapters::portal::{self, PortalMailbox};
use greenhouse_node::adapters::time::MonotonicClock;
use greenhouse_node::adapters::wifi::{Radio, RadioMode};
use greenhouse_node::config::NodeConfig;
use greenhouse_node::coordinator::{RestartHandshake, SensorQueue};
use greenhouse_node::drivers::button::BootButton;
use greenhouse_node::drivers::hw_init::GpioOutput;
use greenhouse_node::drivers::hw_timer::HwAlarms;
use greenhouse_node::drivers::task_pin::{Core, spawn_on_core};
use greenhouse_node::drivers::watchdog::RestartWatchdog;
use greenhouse_node::error::Error;
use greenhouse_node::node::{BootMode, BrokerUnit, NodeLinks, PortalUnit, SensorUnit, select_boot_mode};
use greenhouse_node::pins;
use greenhouse_node::sensors::{ClimateSensor, SensorHub, SensorSlot, WaterTempSensor};
use greenhouse_node::settings::SettingsStore;

static QUEUE: SensorQueue = SensorQueue::new();
static RESTART: RestartHandshake = RestartHandshake::new();
static PORTAL: PortalMailbox = PortalMailbox::new();

const SENSOR_TASK_PRIORITY: u8 = 5;
const SENSOR_TASK_STACK_KB: usize = 8;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Greenhouse node v{}              ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = NodeConfig::default();
    let links = NodeLinks {
        queue: &QUEUE,
        restart: &RESTART,
    };

    // ── 2. Settings and boot mode ─────────────────────────────
    let mut store = SettingsStore::new(RawFlash::new().map_err(Error::from)?, OtherCoreLockout::new());
    let settings = store.load_or_default(config.tls);
    let button = BootButton::new().map_err(|_| Error::Init("mode button"))?;
    let mode = select_boot_mode(&button);

    // ── 3. Radio ──────────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = match EspDefaultNvsPartition::take() {
        Ok(nvs) => Some(nvs),
        Err(e) => {
            warn!("NVS partition unavailable ({}), radio calibration not cached", e);
            None
        }
    };
    let radio_mode = match mode {
        BootMode::Portal => RadioMode::portal(),
        BootMode::Broker => RadioMode::station(&settings),
    }
    .map_err(|e| anyhow::anyhow!("radio: {e}"))?;
    let _radio = Radio::bring_up(peripherals.modem, sysloop, nvs, &radio_mode)
        .map_err(|e| anyhow::anyhow!("radio: {e}"))?;

    // ── 4. Sensor unit on core 1 ──────────────────────────────
    let mut hub = SensorHub::new();
    for slot in [
        SensorSlot::Climate(ClimateSensor::new(pins::CLIMATE_DATA_GPIO)),
        SensorSlot::WaterTemp(WaterTempSensor::new(pins::WATER_PROBE_GPIO)),
    ] {
        if hub.add(slot).is_err() {
            warn!("Sensor table full, slot dropped");
        }
    }
    let sensor_names: Vec<&'static str> = (0..hub.len()).filter_map(|i| hub.topic(i)).collect();
    let sensor_config = config.clone();
    spawn_on_core(Core::App, SENSOR_TASK_PRIORITY, SENSOR_TASK_STACK_KB, "sensors\0", move || {
        SensorUnit::new(hub, links, RestartWatchdog::new(), &sensor_config).run()
    })?;

    // ── 5. Network unit on this core ──────────────────────────
    match mode {
        BootMode::Portal => {
            let _server = portal::serve(&PORTAL, sensor_names)?;
            PortalUnit::new(store, settings, &PORTAL, links).run(config.idle_poll_ms)
        }
        BootMode::Broker => {
            let alarms = HwAlarms::new();
            let bank = ActuatorBank::new(
                GpioOutput::new(pins::LIGHT_GPIO).map_err(|_| Error::Init("light output"))?,
                GpioOutput::new(pins::WATER_VALVE_GPIO).map_err(|_| Error::Init("water output"))?,
                alarms.clone(),
                config.watering_time_ms,
            );
            BrokerUnit::start(
                MqttTransport::new(),
                &bank,
                &settings,
                &config,
                &sensor_names,
                alarms,
                MonotonicClock::new(),
                links,
            )
            .run(config.idle_poll_ms)
        }
    }
}
