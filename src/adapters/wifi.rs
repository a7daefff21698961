//! Radio bring-up.
//!
//! The network unit runs the radio in exactly one mode per boot: station
//! mode towards the configured network for broker mode, or a local access
//! point for the configuration portal.  There is no in-place switch; new
//! credentials take effect through a restart.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::BlockingWifi`.
//! - **all other targets**: records the requested mode for tests.
//!
//! ## Station retry policy
//!
//! A failed station join is retried after an exponential backoff (2 s, 4 s,
//! 8 s ... capped at 60 s) until it succeeds.

use core::fmt;
use log::{info, warn};

use crate::config::{PORTAL_AP_PASSWORD, PORTAL_AP_SSID};
use crate::settings::SettingsRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    InvalidSsid,
    InvalidPassword,
    /// The driver rejected a call (ESP error code).
    Driver(i32),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-63 bytes, or empty for open)"),
            Self::Driver(code) => write!(f, "WiFi driver error {}", code),
        }
    }
}

const INITIAL_BACKOFF_SECS: u32 = 2;
const MAX_BACKOFF_SECS: u32 = 60;

/// Next wait after a failed station join.
pub fn next_backoff(current_secs: u32) -> u32 {
    (current_secs * 2).clamp(INITIAL_BACKOFF_SECS, MAX_BACKOFF_SECS)
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), RadioError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(RadioError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), RadioError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 63 {
        return Err(RadioError::InvalidPassword);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioMode {
    /// Join the network stored in the settings record.
    Station {
        ssid: heapless::String<32>,
        password: heapless::String<64>,
    },
    /// Serve the configuration portal's access point.
    AccessPoint {
        ssid: heapless::String<32>,
        password: heapless::String<64>,
    },
}

impl RadioMode {
    pub fn station(settings: &SettingsRecord) -> Result<Self, RadioError> {
        let (ssid, password) = credentials(settings.wifi_ssid(), settings.wifi_pass())?;
        Ok(Self::Station { ssid, password })
    }

    pub fn portal() -> Result<Self, RadioError> {
        let (ssid, password) = credentials(PORTAL_AP_SSID, PORTAL_AP_PASSWORD)?;
        Ok(Self::AccessPoint { ssid, password })
    }
}

fn credentials(ssid: &str, password: &str) -> Result<(heapless::String<32>, heapless::String<64>), RadioError> {
    validate_ssid(ssid)?;
    validate_password(password)?;
    let ssid = heapless::String::try_from(ssid).map_err(|_| RadioError::InvalidSsid)?;
    let password = heapless::String::try_from(password).map_err(|_| RadioError::InvalidPassword)?;
    Ok((ssid, password))
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct Radio {
    _wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
}

#[cfg(target_os = "espidf")]
impl Radio {
    pub fn bring_up(
        modem: esp_idf_hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
        nvs: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
        mode: &RadioMode,
    ) -> Result<Self, RadioError> {
        use esp_idf_svc::wifi::{
            AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi,
        };

        let driver = |e: esp_idf_svc::sys::EspError| RadioError::Driver(e.code());
        let mut wifi =
            BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), nvs).map_err(driver)?, sysloop).map_err(driver)?;

        let auth = |password: &str| {
            if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            }
        };
        let configuration = match mode {
            RadioMode::Station { ssid, password } => Configuration::Client(ClientConfiguration {
                ssid: ssid.clone(),
                password: password.clone(),
                auth_method: auth(password),
                ..Default::default()
            }),
            RadioMode::AccessPoint { ssid, password } => Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid.clone(),
                password: password.clone(),
                auth_method: auth(password),
                ..Default::default()
            }),
        };
        wifi.set_configuration(&configuration).map_err(driver)?;
        wifi.start().map_err(driver)?;

        match mode {
            RadioMode::Station { ssid, .. } => {
                let mut backoff = INITIAL_BACKOFF_SECS;
                loop {
                    info!("WiFi: joining '{}'", ssid);
                    match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                        Ok(()) => break,
                        Err(e) => {
                            warn!("WiFi: join failed ({}), retry in {}s", e, backoff);
                            std::thread::sleep(std::time::Duration::from_secs(u64::from(backoff)));
                            backoff = next_backoff(backoff);
                        }
                    }
                }
                info!("WiFi: station up");
            }
            RadioMode::AccessPoint { ssid, .. } => {
                wifi.wait_netif_up().map_err(driver)?;
                info!("WiFi: access point '{}' up", ssid);
            }
        }
        Ok(Self { _wifi: wifi })
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct Radio {
    mode: RadioMode,
}

#[cfg(not(target_os = "espidf"))]
impl Radio {
    pub fn bring_up(mode: &RadioMode) -> Result<Self, RadioError> {
        match mode {
            RadioMode::Station { ssid, .. } => info!("WiFi(sim): station joined '{}'", ssid),
            RadioMode::AccessPoint { ssid, .. } => info!("WiFi(sim): access point '{}' up", ssid),
        }
        Ok(Self { mode: mode.clone() })
    }

    pub fn mode(&self) -> &RadioMode {
        &self.mode
    }
}
