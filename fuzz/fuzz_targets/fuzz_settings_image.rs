//! Fuzz target: `SettingsStore::load` over an arbitrary flash image.
//!
//! Invariants checked:
//! - No panics under any byte sequence, including invalid UTF-8 fields
//! - `load` succeeds only when both bookends hold the sentinel
//!
//! cargo fuzz run fuzz_settings_image

#![no_main]

use greenhouse_node::adapters::flash::{OtherCoreLockout, RawFlash};
use greenhouse_node::app::ports::FlashPort;
use greenhouse_node::settings::{REGION_LEN, SettingsStore, WRITE_UNIT};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut flash = RawFlash::simulated(REGION_LEN);
    let image = &data[..data.len().min(REGION_LEN)];
    for (i, page) in image.chunks(WRITE_UNIT).enumerate() {
        if flash.program(i * WRITE_UNIT, page).is_err() {
            return;
        }
    }

    let store = SettingsStore::new(flash, OtherCoreLockout::new());
    if let Ok(record) = store.load() {
        assert!(record.is_valid());
        let _ = (record.wifi_ssid(), record.broker_port_number(), record.client_key());
    }
});
