//! esp-mqtt backed transport.
//!
//! esp-mqtt owns the socket, TLS session and keep-alive on its own task.
//! Its callback translates each client event into a [`TransportEvent`] and
//! pushes it into a bounded channel; message ids returned by the client are
//! mapped back to the engine's request tokens.
//!
//! esp-tls takes SNI and the certificate name check from the URI host, so
//! the broker CN, when set, is used as the host and the resolved address
//! only as a fallback.

use core::cell::RefCell;
use core::net::IpAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EventPayload, MessageId, MqttClientConfiguration, MqttProtocolVersion, QoS as EspQoS,
};
use esp_idf_svc::sys::EspError;
use esp_idf_svc::tls::X509;
use log::{debug, info, warn};

use super::{chunk_events, header_event};
use crate::broker::{
    BrokerTransport, ConnectParams, ConnectionStatus, MAX_IN_FLIGHT, MAX_TOPICS, QoS, RequestToken,
    SecurityMaterial, TransportError, TransportEvent,
};

const MAX_OUTSTANDING: usize = MAX_IN_FLIGHT + MAX_TOPICS;
const EVENT_DEPTH: usize = 2 * MAX_OUTSTANDING;
const SERVICE_TICK: Duration = Duration::from_millis(10);
const CLIENT_TASK_STACK: usize = 6 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Subscribe,
    Publish,
}

struct Outstanding {
    id: MessageId,
    kind: RequestKind,
    token: RequestToken,
}

struct Shared {
    events: Channel<CriticalSectionRawMutex, TransportEvent, EVENT_DEPTH>,
    outstanding: Mutex<CriticalSectionRawMutex, RefCell<heapless::Vec<Outstanding, MAX_OUTSTANDING>>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.try_send(event).is_err() {
            warn!("MQTT: event queue full, event dropped");
        }
    }

    fn track(&self, id: MessageId, kind: RequestKind, token: RequestToken) {
        self.outstanding.lock(|o| {
            if o.borrow_mut().push(Outstanding { id, kind, token }).is_err() {
                warn!("MQTT: too many outstanding requests, msg {} untracked", id);
            }
        });
    }

    fn complete(&self, id: MessageId, ok: bool) {
        let done = self.outstanding.lock(|o| {
            let mut o = o.borrow_mut();
            let at = o.iter().position(|r| r.id == id)?;
            Some(o.swap_remove(at))
        });
        match done {
            Some(Outstanding { kind: RequestKind::Subscribe, token, .. }) => {
                self.emit(TransportEvent::SubscribeDone { token, ok })
            }
            Some(Outstanding { kind: RequestKind::Publish, token, .. }) => {
                self.emit(TransportEvent::PublishDone { token, ok })
            }
            None => debug!("MQTT: completion for untracked msg {}", id),
        }
    }

    /// Fail everything still outstanding.
    fn abandon_all(&self) {
        let abandoned = self.outstanding.lock(|o| core::mem::take(&mut *o.borrow_mut()));
        for r in abandoned {
            match r.kind {
                RequestKind::Subscribe => self.emit(TransportEvent::SubscribeDone { token: r.token, ok: false }),
                RequestKind::Publish => self.emit(TransportEvent::PublishDone { token: r.token, ok: false }),
            }
        }
    }

    fn on_event(&self, payload: EventPayload<'_, EspError>) {
        match payload {
            EventPayload::BeforeConnect => debug!("MQTT: connecting"),
            EventPayload::Connected(_) => self.emit(TransportEvent::Connection(ConnectionStatus::Accepted)),
            EventPayload::Disconnected => {
                self.abandon_all();
                self.emit(TransportEvent::Connection(ConnectionStatus::Disconnected));
            }
            EventPayload::Subscribed(id) | EventPayload::Unsubscribed(id) => self.complete(id, true),
            EventPayload::Published(id) => self.complete(id, true),
            EventPayload::Deleted(id) => self.complete(id, false),
            EventPayload::Received {
                topic, data, details, ..
            } => match details {
                Details::Complete => {
                    self.emit(header_event(topic.unwrap_or(""), data.len()));
                    chunk_events(data, true, |e| self.emit(e));
                }
                Details::InitialChunk(first) => {
                    self.emit(header_event(topic.unwrap_or(""), first.total_data_size));
                    chunk_events(data, data.len() >= first.total_data_size, |e| self.emit(e));
                }
                Details::SubsequentChunk(next) => {
                    let end = next.current_data_offset + data.len();
                    chunk_events(data, end >= next.total_data_size, |e| self.emit(e));
                }
            },
            EventPayload::Error(e) => warn!("MQTT: client error: {}", e),
        }
    }
}

/// PEM material handed to esp-tls.  esp-mqtt keeps raw pointers to it for
/// the life of the client, so it is leaked once per configuration.
struct Credentials {
    ca: X509<'static>,
    cert: X509<'static>,
    key: X509<'static>,
}

fn leak_pem(pem: &str) -> &'static [u8] {
    let mut bytes = Vec::with_capacity(pem.len() + 1);
    bytes.extend_from_slice(pem.as_bytes());
    bytes.push(0);
    Box::leak(bytes.into_boxed_slice())
}

fn esp_qos(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
        QoS::ExactlyOnce => EspQoS::ExactlyOnce,
    }
}

fn rejected(e: EspError) -> TransportError {
    TransportError::Rejected(e.code())
}

pub struct MqttTransport {
    shared: Arc<Shared>,
    client: Option<EspMqttClient<'static>>,
    credentials: Option<Credentials>,
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Channel::new(),
                outstanding: Mutex::new(RefCell::new(heapless::Vec::new())),
            }),
            client: None,
            credentials: None,
        }
    }

    fn client(&mut self) -> Result<&mut EspMqttClient<'static>, TransportError> {
        self.client.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl BrokerTransport for MqttTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        // esp-mqtt allocates on connect; nothing to reserve up front.
        Ok(())
    }

    fn close(&mut self) {
        self.disconnect();
        self.credentials = None;
        while self.shared.events.try_receive().is_ok() {}
    }

    fn start_resolve(&mut self, host: &str) -> Result<Option<IpAddr>, TransportError> {
        let mut addrs = (host, 0u16).to_socket_addrs().map_err(|e| {
            warn!("MQTT: getaddrinfo({}) failed: {}", host, e);
            TransportError::Rejected(-1)
        })?;
        Ok(Some(addrs.next().map(|a| a.ip()).ok_or(TransportError::Rejected(-1))?))
    }

    fn configure_security(&mut self, material: &SecurityMaterial<'_>) -> Result<(), TransportError> {
        if material.ca_cert.is_empty() || material.client_cert.is_empty() || material.client_key.is_empty() {
            return Err(TransportError::BadCredentials);
        }
        self.credentials = Some(Credentials {
            ca: X509::pem_until_nul(leak_pem(material.ca_cert)),
            cert: X509::pem_until_nul(leak_pem(material.client_cert)),
            key: X509::pem_until_nul(leak_pem(material.client_key)),
        });
        Ok(())
    }

    fn connect(&mut self, addr: IpAddr, port: u16, params: &ConnectParams) -> Result<(), TransportError> {
        // A fresh client per attempt; the old one is destroyed first.
        self.client = None;

        let scheme = if self.credentials.is_some() { "mqtts" } else { "mqtt" };
        let host = params.server_name.clone().unwrap_or_else(|| addr.to_string());
        let url = format!("{}://{}:{}", scheme, host, port);

        let conf = MqttClientConfiguration {
            protocol_version: Some(MqttProtocolVersion::V3_1_1),
            client_id: Some(&params.client_id),
            username: params.username.as_deref(),
            password: params.password.as_deref(),
            keep_alive_interval: Some(Duration::from_secs(u64::from(params.keep_alive_secs))),
            server_certificate: self.credentials.as_ref().map(|c| c.ca),
            client_certificate: self.credentials.as_ref().map(|c| c.cert),
            private_key: self.credentials.as_ref().map(|c| c.key),
            task_stack: CLIENT_TASK_STACK,
            ..Default::default()
        };

        let shared = Arc::clone(&self.shared);
        let client = EspMqttClient::new_cb(&url, &conf, move |event| shared.on_event(event.payload()))
            .map_err(|e| {
                warn!("MQTT: client init for {} failed: {}", url, e);
                TransportError::OutOfMemory
            })?;
        info!("MQTT: client started for {}", url);
        self.client = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.client.take().is_some() {
            self.shared.abandon_all();
            self.shared
                .emit(TransportEvent::Connection(ConnectionStatus::Disconnected));
        }
    }

    fn subscribe(&mut self, topic: &str, qos: QoS, token: RequestToken) -> Result<(), TransportError> {
        let id = self.client()?.subscribe(topic, esp_qos(qos)).map_err(rejected)?;
        self.shared.track(id, RequestKind::Subscribe, token);
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str, token: RequestToken) -> Result<(), TransportError> {
        let id = self.client()?.unsubscribe(topic).map_err(rejected)?;
        self.shared.track(id, RequestKind::Subscribe, token);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, token: RequestToken) -> Result<(), TransportError> {
        let id = self
            .client()?
            .enqueue(topic, esp_qos(qos), false, payload)
            .map_err(rejected)?;
        if qos == QoS::AtMostOnce {
            // No acknowledgement exists at QoS 0.
            self.shared.emit(TransportEvent::PublishDone { token, ok: true });
        } else {
            self.shared.track(id, RequestKind::Publish, token);
        }
        Ok(())
    }

    fn service(&mut self) {
        std::thread::sleep(SERVICE_TICK);
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.shared.events.try_receive().ok()
    }
}
