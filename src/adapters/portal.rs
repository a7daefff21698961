//! Configuration portal mailbox.
//!
//! The portal's HTTP side parses each form post into a [`Submission`] and
//! drops it into a [`PortalMailbox`]; the network unit takes it out through
//! [`PortalPort`].  In the other direction the network unit posts the
//! latest readings, which [`PortalMailbox::render_page`] shows above the
//! form.  The mailbox is `const`-constructible so it can live in a
//! `static` shared between the HTTP handler task and the network unit.
//!
//! On ESP-IDF, [`serve`] runs the HTTP side on `EspHttpServer`.

use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::ports::{PortalPort, Submission};
use crate::coordinator::LatestValues;

/// Submissions buffered between the HTTP handler and the network unit.
const MAILBOX_DEPTH: usize = 2;

const FORM: &str = concat!(
    "<form method=\"post\" action=\"/\">",
    "SSID <input name=\"wifi_ssid\"><br>Password <input name=\"wifi_pass\" type=\"password\"><br>",
    "Broker host <input name=\"broker_host\"><br>Broker port <input name=\"broker_port\"><br>",
    "Broker CN <input name=\"broker_cn\"><br>Client id <input name=\"client_id\"><br>",
    "Client name <input name=\"client_name\"><br>",
    "Client password <input name=\"client_password\" type=\"password\"><br>",
    "<input type=\"submit\" value=\"Save\"></form>"
);

pub struct PortalMailbox {
    channel: Channel<CriticalSectionRawMutex, Submission, MAILBOX_DEPTH>,
    readings: Mutex<CriticalSectionRawMutex, RefCell<LatestValues>>,
}

impl Default for PortalMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalMailbox {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            readings: Mutex::new(RefCell::new(LatestValues::new())),
        }
    }

    /// Hand a parsed submission to the network unit.  Returns `false` if the
    /// mailbox is full and the submission was discarded.
    pub fn submit(&self, submission: Submission) -> bool {
        let fields = submission.fields.len();
        match self.channel.try_send(submission) {
            Ok(()) => {
                info!("Portal: submission with {} fields queued", fields);
                true
            }
            Err(_) => {
                warn!("Portal: mailbox full, submission discarded");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.channel.len()
    }

    pub fn readings(&self) -> LatestValues {
        self.readings.lock(|r| r.borrow().clone())
    }

    /// Status page: one line per sensor in `names` order, then the form.
    pub fn render_page(&self, names: &[&str]) -> String {
        let readings = self.readings();
        let mut page = String::from("<!DOCTYPE html><html><body><h3>Greenhouse node</h3><ul>");
        for (index, name) in names.iter().enumerate() {
            let value = readings.get(index).unwrap_or("no reading yet");
            let _ = write!(page, "<li>{}: {}</li>", escape(name), escape(value));
        }
        page.push_str("</ul>");
        page.push_str(FORM);
        page.push_str("</body></html>");
        page
    }
}

impl PortalPort for &PortalMailbox {
    fn poll_submission(&mut self) -> Option<Submission> {
        self.channel.try_receive().ok()
    }

    fn show_readings(&mut self, readings: &LatestValues) {
        self.readings.lock(|r| r.borrow_mut().clone_from(readings));
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Parse an `application/x-www-form-urlencoded` body into a submission.
///
/// Pairs without `=` are skipped; `+` decodes to a space and `%XX` escapes
/// are decoded.  Malformed escapes are kept literally.
pub fn parse_form(body: &str) -> Submission {
    let mut submission = Submission::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        submission = submission.with(&decode(key), &decode(value));
    }
    submission
}

fn decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|d| d as u8)
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF HTTP front end
// ───────────────────────────────────────────────────────────────

/// Largest form body accepted; anything past it is ignored.
#[cfg(target_os = "espidf")]
const MAX_FORM_LEN: usize = 2048;

/// Serve the status page and settings form, and feed posted bodies into
/// `mailbox`.  `sensor_names` labels the readings in topic index order.
///
/// The returned server must be kept alive for the portal to stay up.
#[cfg(target_os = "espidf")]
pub fn serve(
    mailbox: &'static PortalMailbox,
    sensor_names: Vec<&'static str>,
) -> Result<esp_idf_svc::http::server::EspHttpServer<'static>, esp_idf_svc::sys::EspError> {
    use esp_idf_svc::http::Method;
    use esp_idf_svc::http::server::{Configuration, EspHttpServer};
    use esp_idf_svc::io::{Read, Write};

    let mut server = EspHttpServer::new(&Configuration::default())?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        let page = mailbox.render_page(&sensor_names);
        req.into_ok_response()?.write_all(page.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Post, move |mut req| {
        let mut body = Vec::with_capacity(512);
        let mut chunk = [0u8; 256];
        while body.len() < MAX_FORM_LEN {
            let n = req.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(MAX_FORM_LEN);

        let accepted = mailbox.submit(parse_form(&String::from_utf8_lossy(&body)));
        let reply: &[u8] = if accepted {
            b"Saved. The node restarts if anything changed."
        } else {
            b"Busy, try again."
        };
        req.into_ok_response()?.write_all(reply)?;
        Ok(())
    })?;

    info!("Portal: HTTP server listening");
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_is_fifo_and_bounded() {
        let mailbox = PortalMailbox::new();
        assert!(mailbox.submit(Submission::new().with("wifi_ssid", "a")));
        assert!(mailbox.submit(Submission::new().with("wifi_ssid", "b")));
        assert!(!mailbox.submit(Submission::new().with("wifi_ssid", "c")));

        let mut port = &mailbox;
        assert_eq!(port.poll_submission().unwrap().fields[0].1, "a");
        assert_eq!(port.poll_submission().unwrap().fields[0].1, "b");
        assert!(port.poll_submission().is_none());
    }

    #[test]
    fn page_lists_latest_readings_escaped() {
        use crate::coordinator::SensorQueueEntry;

        let mailbox = PortalMailbox::new();
        let mut latest = LatestValues::new();
        latest.store(SensorQueueEntry::new(1, "{\"w_temp\":17.50}"));
        let mut port = &mailbox;
        port.show_readings(&latest);

        let page = mailbox.render_page(&["climate", "w_temp"]);
        assert!(page.contains("<li>climate: no reading yet</li>"));
        assert!(page.contains("<li>w_temp: {&quot;w_temp&quot;:17.50}</li>"));
        assert!(page.contains("name=\"client_password\""));
    }

    #[test]
    fn form_body_is_decoded() {
        let s = parse_form("wifi_ssid=My+Net&wifi_pass=p%40ss&junk&broker_port=8883");
        assert_eq!(
            s.fields,
            vec![
                ("wifi_ssid".to_string(), "My Net".to_string()),
                ("wifi_pass".to_string(), "p@ss".to_string()),
                ("broker_port".to_string(), "8883".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_escape_is_literal() {
        let s = parse_form("client_id=a%zzb&x=%4");
        assert_eq!(s.fields[0].1, "a%zzb");
        assert_eq!(s.fields[1].1, "%4");
    }
}
