//! Fixed-layout settings record and its field descriptor table.
//!
//! The record is kept as the exact byte image that goes to flash, so a
//! save/load cycle is bit-identical by construction.  Typed accessors read
//! the NUL-terminated text fields straight out of the image.
//!
//! ```text
//! ┌──────────┬──────────┬─────────┬─────┬──────────┬──────────┐
//! │ sentinel │ wifi_ssid│wifi_pass│ ... │client_key│ sentinel │
//! │  u32 LE  │   [33]   │  [64]   │     │  [2048]  │  u32 LE  │
//! └──────────┴──────────┴─────────┴─────┴──────────┴──────────┘
//! ```

use log::warn;

/// Value both bookends must hold for a record to be accepted.
pub const SETTINGS_SENTINEL: u32 = 0x00A5_A5A5;

const SENTINEL_LEN: usize = core::mem::size_of::<u32>();

/// Location of one text field inside the record image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// External key used by the configuration portal.
    pub name: &'static str,
    /// Byte offset from the start of the record image.
    pub offset: usize,
    /// Field capacity in bytes, terminator included.
    pub size: usize,
}

impl FieldDescriptor {
    const fn new(name: &'static str, offset: usize, size: usize) -> Self {
        Self { name, offset, size }
    }

    const fn end(&self) -> usize {
        self.offset + self.size
    }
}

// ── Layout ────────────────────────────────────────────────────

pub const WIFI_SSID: FieldDescriptor = FieldDescriptor::new("wifi_ssid", SENTINEL_LEN, 33);
pub const WIFI_PASS: FieldDescriptor = FieldDescriptor::new("wifi_pass", WIFI_SSID.end(), 64);
pub const BROKER_HOST: FieldDescriptor =
    FieldDescriptor::new("broker_host", WIFI_PASS.end(), 200);
pub const BROKER_PORT: FieldDescriptor =
    FieldDescriptor::new("broker_port", BROKER_HOST.end(), 6);
pub const BROKER_CN: FieldDescriptor = FieldDescriptor::new("broker_cn", BROKER_PORT.end(), 200);
pub const CLIENT_ID: FieldDescriptor = FieldDescriptor::new("client_id", BROKER_CN.end(), 100);
pub const CLIENT_NAME: FieldDescriptor =
    FieldDescriptor::new("client_name", CLIENT_ID.end(), 100);
pub const CLIENT_PASSWORD: FieldDescriptor =
    FieldDescriptor::new("client_password", CLIENT_NAME.end(), 100);
pub const CA_CERT: FieldDescriptor = FieldDescriptor::new("ca_cert", CLIENT_PASSWORD.end(), 2048);
pub const CLIENT_CERT: FieldDescriptor =
    FieldDescriptor::new("client_cert", CA_CERT.end(), 2048);
pub const CLIENT_KEY: FieldDescriptor =
    FieldDescriptor::new("client_key", CLIENT_CERT.end(), 2048);

const END_SENTINEL_OFFSET: usize = CLIENT_KEY.end();

/// Size of the persisted record image in bytes.
pub const RECORD_LEN: usize = END_SENTINEL_OFFSET + SENTINEL_LEN;

/// Fields that may be changed through [`SettingsRecord::set_named_field`].
/// Certificate material is deliberately absent.
pub const SETTABLE_FIELDS: [FieldDescriptor; 8] = [
    WIFI_SSID,
    WIFI_PASS,
    BROKER_HOST,
    BROKER_PORT,
    BROKER_CN,
    CLIENT_ID,
    CLIENT_NAME,
    CLIENT_PASSWORD,
];

// ── Compiled-in defaults ──────────────────────────────────────

pub const DEFAULT_WIFI_SSID: &str = "SSID";
pub const DEFAULT_WIFI_PASS: &str = "11111111";
pub const DEFAULT_BROKER_HOST: &str = "192.168.0.2";
pub const DEFAULT_BROKER_PORT_TLS: &str = "8883";
pub const DEFAULT_BROKER_PORT_PLAIN: &str = "1883";
pub const DEFAULT_CLIENT_ID: &str = "GreenhouseNode1";

// ───────────────────────────────────────────────────────────────
// SettingsRecord
// ───────────────────────────────────────────────────────────────

/// Network and broker credentials, exactly as laid out in flash.
#[derive(Clone, PartialEq, Eq)]
pub struct SettingsRecord {
    image: Box<[u8]>,
}

impl core::fmt::Debug for SettingsRecord {
    // Passwords and key material stay out of logs.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SettingsRecord")
            .field("wifi_ssid", &self.wifi_ssid())
            .field("broker_host", &self.broker_host())
            .field("broker_port", &self.broker_port())
            .field("client_id", &self.client_id())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self::compiled_defaults(true)
    }
}

impl SettingsRecord {
    /// An all-zero record: every field empty, bookends unstamped.
    pub fn zeroed() -> Self {
        Self {
            image: vec![0u8; RECORD_LEN].into_boxed_slice(),
        }
    }

    /// The fallback record used on first boot or after corruption.
    ///
    /// Bookends are left unstamped; the store stamps them on save.
    pub fn compiled_defaults(tls: bool) -> Self {
        let mut record = Self::zeroed();
        let port = if tls {
            DEFAULT_BROKER_PORT_TLS
        } else {
            DEFAULT_BROKER_PORT_PLAIN
        };
        record.write_text(WIFI_SSID, DEFAULT_WIFI_SSID);
        record.write_text(WIFI_PASS, DEFAULT_WIFI_PASS);
        record.write_text(BROKER_HOST, DEFAULT_BROKER_HOST);
        record.write_text(BROKER_PORT, port);
        record.write_text(BROKER_CN, DEFAULT_BROKER_HOST);
        record.write_text(CLIENT_ID, DEFAULT_CLIENT_ID);
        record
    }

    /// Rebuild a record from a raw image.  `None` if the length is wrong.
    pub fn from_image(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == RECORD_LEN).then(|| Self {
            image: bytes.into(),
        })
    }

    /// The exact bytes persisted to flash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    // ── Bookends ──────────────────────────────────────────────

    pub fn leading_sentinel(&self) -> u32 {
        self.read_u32(0)
    }

    pub fn trailing_sentinel(&self) -> u32 {
        self.read_u32(END_SENTINEL_OFFSET)
    }

    /// Write the validity constant into both bookends.
    pub fn stamp(&mut self) {
        self.write_u32(0, SETTINGS_SENTINEL);
        self.write_u32(END_SENTINEL_OFFSET, SETTINGS_SENTINEL);
    }

    /// `true` iff both bookends hold [`SETTINGS_SENTINEL`].
    pub fn is_valid(&self) -> bool {
        self.leading_sentinel() == SETTINGS_SENTINEL
            && self.trailing_sentinel() == SETTINGS_SENTINEL
    }

    // ── Named-field update ────────────────────────────────────

    /// Apply an untrusted `key = value` pair.
    ///
    /// Writes `value` plus terminator into the matching field iff
    /// `0 < value.len() < field.size`.  Unknown keys, empty values and
    /// oversized values leave the record untouched.
    pub fn set_named_field(&mut self, key: &str, value: &str) {
        let Some(field) = SETTABLE_FIELDS.iter().find(|f| f.name == key) else {
            return;
        };
        if value.is_empty() || value.len() >= field.size {
            return;
        }
        self.write_text(*field, value);
    }

    /// Replace the transport credential material.  Oversized inputs are
    /// rejected as a whole so a half-updated trio is never stored.
    pub fn set_security_material(&mut self, ca_cert: &str, client_cert: &str, client_key: &str) -> bool {
        let fits = [(CA_CERT, ca_cert), (CLIENT_CERT, client_cert), (CLIENT_KEY, client_key)]
            .iter()
            .all(|(field, value)| value.len() < field.size);
        if !fits {
            warn!("Settings: security material exceeds field capacity, ignored");
            return false;
        }
        self.write_text(CA_CERT, ca_cert);
        self.write_text(CLIENT_CERT, client_cert);
        self.write_text(CLIENT_KEY, client_key);
        true
    }

    // ── Typed accessors ───────────────────────────────────────

    pub fn wifi_ssid(&self) -> &str {
        self.text(WIFI_SSID)
    }

    pub fn wifi_pass(&self) -> &str {
        self.text(WIFI_PASS)
    }

    pub fn broker_host(&self) -> &str {
        self.text(BROKER_HOST)
    }

    pub fn broker_port(&self) -> &str {
        self.text(BROKER_PORT)
    }

    /// Broker port parsed as a number.  `None` if the stored text is not a
    /// valid TCP port.
    pub fn broker_port_number(&self) -> Option<u16> {
        self.broker_port().parse().ok()
    }

    /// Expected broker certificate common name (also used for SNI).
    pub fn broker_cn(&self) -> &str {
        self.text(BROKER_CN)
    }

    pub fn client_id(&self) -> &str {
        self.text(CLIENT_ID)
    }

    pub fn client_name(&self) -> &str {
        self.text(CLIENT_NAME)
    }

    pub fn client_password(&self) -> &str {
        self.text(CLIENT_PASSWORD)
    }

    pub fn ca_cert(&self) -> &str {
        self.text(CA_CERT)
    }

    pub fn client_cert(&self) -> &str {
        self.text(CLIENT_CERT)
    }

    pub fn client_key(&self) -> &str {
        self.text(CLIENT_KEY)
    }

    /// Raw bytes of a field, terminator and padding included.
    pub fn field_bytes(&self, field: FieldDescriptor) -> &[u8] {
        &self.image[field.offset..field.end()]
    }

    // ── Internals ─────────────────────────────────────────────

    fn text(&self, field: FieldDescriptor) -> &str {
        let raw = self.field_bytes(field);
        let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        match core::str::from_utf8(&raw[..len]) {
            Ok(s) => s,
            Err(_) => {
                warn!("Settings: field '{}' is not valid UTF-8", field.name);
                ""
            }
        }
    }

    /// Caller guarantees `value.len() < field.size`.  The tail of the field
    /// past the terminator is zeroed.
    fn write_text(&mut self, field: FieldDescriptor, value: &str) {
        let dst = &mut self.image[field.offset..field.end()];
        dst[..value.len()].copy_from_slice(value.as_bytes());
        dst[value.len()..].fill(0);
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; SENTINEL_LEN];
        raw.copy_from_slice(&self.image[offset..offset + SENTINEL_LEN]);
        u32::from_le_bytes(raw)
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.image[offset..offset + SENTINEL_LEN].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_contiguous() {
        let mut cursor = SENTINEL_LEN;
        for f in SETTABLE_FIELDS.iter().chain([CA_CERT, CLIENT_CERT, CLIENT_KEY].iter()) {
            assert_eq!(f.offset, cursor, "gap before {}", f.name);
            cursor = f.end();
        }
        assert_eq!(cursor + SENTINEL_LEN, RECORD_LEN);
        assert_eq!(RECORD_LEN, 6955);
    }

    #[test]
    fn defaults_are_readable() {
        let r = SettingsRecord::compiled_defaults(true);
        assert_eq!(r.wifi_ssid(), DEFAULT_WIFI_SSID);
        assert_eq!(r.wifi_pass(), DEFAULT_WIFI_PASS);
        assert_eq!(r.broker_port_number(), Some(8883));
        assert_eq!(r.broker_cn(), r.broker_host());
        assert_eq!(r.client_name(), "");
        assert!(!r.is_valid(), "defaults are stamped by the store, not here");

        let plain = SettingsRecord::compiled_defaults(false);
        assert_eq!(plain.broker_port_number(), Some(1883));
    }

    #[test]
    fn stamp_makes_record_valid() {
        let mut r = SettingsRecord::default();
        r.stamp();
        assert!(r.is_valid());
        assert_eq!(r.leading_sentinel(), SETTINGS_SENTINEL);
        assert_eq!(r.trailing_sentinel(), SETTINGS_SENTINEL);
    }

    #[test]
    fn set_named_field_accepts_in_bounds_value() {
        let mut r = SettingsRecord::default();
        r.set_named_field("wifi_ssid", "greenhouse");
        assert_eq!(r.wifi_ssid(), "greenhouse");
    }

    #[test]
    fn set_named_field_ignores_empty_unknown_and_oversized() {
        let before = SettingsRecord::default();
        let mut r = before.clone();
        r.set_named_field("wifi_ssid", "");
        r.set_named_field("no_such_key", "value");
        r.set_named_field("wifi_ssid", &"x".repeat(WIFI_SSID.size));
        r.set_named_field("ca_cert", "-----BEGIN CERTIFICATE-----");
        assert_eq!(r, before);
    }

    #[test]
    fn set_named_field_max_length_fits_with_terminator() {
        let mut r = SettingsRecord::default();
        let value = "p".repeat(BROKER_PORT.size - 1);
        r.set_named_field("broker_port", &value);
        assert_eq!(r.broker_port(), value);
        assert_eq!(r.field_bytes(BROKER_PORT)[BROKER_PORT.size - 1], 0);
    }

    #[test]
    fn shorter_value_clears_stale_tail() {
        let mut r = SettingsRecord::default();
        r.set_named_field("client_id", "a-long-client-identifier");
        r.set_named_field("client_id", "short");
        assert_eq!(r.client_id(), "short");
        assert!(r.field_bytes(CLIENT_ID)[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn security_material_is_all_or_nothing() {
        let mut r = SettingsRecord::default();
        assert!(r.set_security_material("ca", "cert", "key"));
        assert_eq!(r.ca_cert(), "ca");

        let huge = "k".repeat(CLIENT_KEY.size);
        assert!(!r.set_security_material("ca2", "cert2", &huge));
        assert_eq!(r.ca_cert(), "ca");
        assert_eq!(r.client_key(), "key");
    }

    #[test]
    fn from_image_rejects_wrong_length() {
        assert!(SettingsRecord::from_image(&[0u8; 16]).is_none());
        let r = SettingsRecord::default();
        assert_eq!(SettingsRecord::from_image(r.as_bytes()), Some(r));
    }

    #[test]
    fn non_utf8_field_reads_as_empty() {
        let mut image = SettingsRecord::default().as_bytes().to_vec();
        image[WIFI_SSID.offset] = 0xFF;
        let r = SettingsRecord::from_image(&image).unwrap();
        assert_eq!(r.wifi_ssid(), "");
    }
}
