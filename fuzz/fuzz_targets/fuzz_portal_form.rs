//! Fuzz target: portal form decoding and named-field updates.
//!
//! Arbitrary request bodies are parsed and applied to a default record.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - Every field still fits its capacity after the update
//! - Certificate material is never touched through named fields
//!
//! cargo fuzz run fuzz_portal_form

#![no_main]

use greenhouse_node::adapters::portal::parse_form;
use greenhouse_node::settings::{SETTABLE_FIELDS, SettingsRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data);
    let submission = parse_form(&body);

    let mut record = SettingsRecord::compiled_defaults(true);
    for (key, value) in &submission.fields {
        record.set_named_field(key, value);
    }

    let lengths = [
        record.wifi_ssid().len(),
        record.wifi_pass().len(),
        record.broker_host().len(),
        record.broker_port().len(),
        record.broker_cn().len(),
        record.client_id().len(),
        record.client_name().len(),
        record.client_password().len(),
    ];
    for (field, len) in SETTABLE_FIELDS.iter().zip(lengths) {
        assert!(len < field.size, "{} overran its field", field.name);
    }
    assert!(record.ca_cert().is_empty());
    assert!(record.client_key().is_empty());
});
