//! Settings store and portal persistence against faulty flash.

use greenhouse_node::adapters::portal::PortalMailbox;
use greenhouse_node::app::ports::Submission;
use greenhouse_node::coordinator::{RestartHandshake, SensorQueue};
use greenhouse_node::node::{NodeLinks, PortalStep, PortalUnit};
use greenhouse_node::settings::{REGION_LEN, SettingsRecord, SettingsStore, StoreError};

use crate::mock_hw::{CountingLockout, FaultyFlash};

const FLASH_LEN: usize = REGION_LEN * 4;

#[test]
fn first_boot_persists_defaults_under_lockout() {
    let lockout = CountingLockout::default();
    let mut store = SettingsStore::new(FaultyFlash::new(FLASH_LEN), lockout.clone());
    assert_eq!(store.load(), Err(StoreError::NotFound));

    let record = store.load_or_default(true);
    assert!(record.is_valid());
    assert_eq!(record.wifi_ssid(), "SSID");
    assert_eq!(lockout.sections(), 1);
    assert_eq!(store.load().unwrap().broker_port(), "8883");
}

#[test]
fn every_erase_and_program_runs_inside_lockout() {
    let lockout = CountingLockout::default();
    let mut store = SettingsStore::new(FaultyFlash::watching(FLASH_LEN, &lockout), lockout.clone());
    let mut record = SettingsRecord::compiled_defaults(false);
    store.save(&mut record).unwrap();
    record.set_named_field("client_id", "gh2");
    store.save(&mut record).unwrap();

    assert_eq!(lockout.sections(), 2);
    assert!(!lockout.is_active());
    assert_eq!(store.flash().stray_writes(), 0);
    assert_eq!(store.load().unwrap().client_id(), "gh2");
}

#[test]
fn interrupted_program_reads_back_corrupt() {
    let mut store = SettingsStore::new(FaultyFlash::new(FLASH_LEN), CountingLockout::default());
    let mut record = SettingsRecord::compiled_defaults(false);
    store.flash_mut().fail_after(1);

    assert!(matches!(store.save(&mut record), Err(StoreError::Flash(_))));
    assert_eq!(store.load(), Err(StoreError::Corrupt));
}

#[test]
fn failure_before_any_program_reads_back_empty() {
    let mut store = SettingsStore::new(FaultyFlash::new(FLASH_LEN), CountingLockout::default());
    let mut good = SettingsRecord::compiled_defaults(true);
    store.save(&mut good).unwrap();

    store.flash_mut().fail_after(0);
    assert!(store.save(&mut good).is_err());
    assert_eq!(store.load(), Err(StoreError::NotFound));

    let fallback = store.load_or_default(true);
    assert_eq!(fallback.client_id(), "GreenhouseNode1");
    assert_eq!(fallback.broker_host(), "192.168.0.2");
}

#[test]
fn failed_portal_save_does_not_restart() {
    let queue = SensorQueue::new();
    let restart = RestartHandshake::new();
    let links = NodeLinks { queue: &queue, restart: &restart };
    let mailbox = PortalMailbox::new();

    let mut store = SettingsStore::new(FaultyFlash::new(FLASH_LEN), CountingLockout::default());
    let settings = store.load_or_default(true);
    store.flash_mut().fail_after(0);
    let mut unit = PortalUnit::new(store, settings, &mailbox, links);

    assert!(mailbox.submit(Submission::new().with("client_id", "gh9")));
    assert_eq!(unit.step(), PortalStep::SaveFailed);
    assert!(!restart.is_requested());
    assert_eq!(unit.settings().client_id(), "GreenhouseNode1");
}

#[test]
fn oversized_and_unknown_fields_are_ignored() {
    let queue = SensorQueue::new();
    let restart = RestartHandshake::new();
    let links = NodeLinks { queue: &queue, restart: &restart };
    let mailbox = PortalMailbox::new();
    let mut store = SettingsStore::new(FaultyFlash::new(FLASH_LEN), CountingLockout::default());
    let settings = store.load_or_default(true);
    let mut unit = PortalUnit::new(store, settings, &mailbox, links);

    let long_ssid = "s".repeat(33);
    assert!(mailbox.submit(
        Submission::new()
            .with("wifi_ssid", &long_ssid)
            .with("ca_cert", "-----BEGIN")
            .with("broker_port", "")
    ));
    assert_eq!(unit.step(), PortalStep::Unchanged);

    assert!(mailbox.submit(Submission::new().with("wifi_ssid", &long_ssid[..32])));
    assert_eq!(unit.step(), PortalStep::Saved);
    assert_eq!(unit.store().load().unwrap().wifi_ssid(), &long_ssid[..32]);
}
