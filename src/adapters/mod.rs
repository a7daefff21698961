//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter   | Implements              | Connects to                 |
//! |-----------|-------------------------|-----------------------------|
//! | `flash`   | FlashPort, CoreLockout  | raw SPI flash, other core   |
//! | `mqtt`    | BrokerTransport         | esp-mqtt client (TLS)       |
//! | `portal`  | PortalPort              | HTTP settings form          |
//! | `time`    | ClockPort               | esp_timer                   |
//! | `wifi`    | (radio bring-up)        | ESP-IDF WiFi STA / AP       |

pub mod flash;
pub mod mqtt;
pub mod portal;
pub mod time;
pub mod wifi;
