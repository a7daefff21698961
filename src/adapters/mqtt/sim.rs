//! Loopback broker for host builds.
//!
//! [`SimBroker`] is a cloneable handle on the broker's state, so a test can
//! keep one while the engine owns the [`MqttTransport`].  Requests are
//! answered on the next service tick, never inside the call that made them.

use core::net::IpAddr;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use super::{chunk_events, header_event};
use crate::broker::{
    BrokerTransport, ConnectParams, ConnectionStatus, QoS, RequestToken, SecurityMaterial, TransportError,
    TransportEvent,
};

#[derive(Debug)]
struct BrokerState {
    known_hosts: Vec<(String, IpAddr)>,
    connect_reply: ConnectionStatus,
    subscribe_ok: bool,
    hold_publish_acks: bool,
    reject_publishes: bool,
    fail_open: bool,
    reject_security: bool,

    open_handles: usize,
    connected: bool,
    server_name: Option<String>,
    connects: Vec<(IpAddr, u16, ConnectParams)>,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbound: VecDeque<(String, Vec<u8>)>,
    drop_pending: Option<ConnectionStatus>,
    chunk_len: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            known_hosts: Vec::new(),
            connect_reply: ConnectionStatus::Accepted,
            subscribe_ok: true,
            hold_publish_acks: false,
            reject_publishes: false,
            fail_open: false,
            reject_security: false,
            open_handles: 0,
            connected: false,
            server_name: None,
            connects: Vec::new(),
            subscriptions: Vec::new(),
            published: Vec::new(),
            inbound: VecDeque::new(),
            drop_pending: None,
            chunk_len: 32,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl SimBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Scripting ─────────────────────────────────────────────

    /// Make `host` resolvable.  Literal addresses always resolve.
    pub fn add_host(&self, host: &str, addr: IpAddr) {
        self.lock().known_hosts.push((host.to_owned(), addr));
    }

    /// Reply to every following connect attempt with `status`.
    pub fn set_connect_reply(&self, status: ConnectionStatus) {
        self.lock().connect_reply = status;
    }

    pub fn set_subscribe_ok(&self, ok: bool) {
        self.lock().subscribe_ok = ok;
    }

    /// Keep publishes unacknowledged until the session drops.
    pub fn hold_publish_acks(&self, hold: bool) {
        self.lock().hold_publish_acks = hold;
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn reject_security(&self, reject: bool) {
        self.lock().reject_security = reject;
    }

    /// Inbound payloads are delivered in pieces of this size.
    pub fn set_chunk_len(&self, len: usize) {
        self.lock().chunk_len = len.max(1);
    }

    /// Queue a message from the broker.  Delivered only if subscribed.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.lock().inbound.push_back((topic.to_owned(), payload.to_vec()));
    }

    /// Drop the live session on the next tick.
    pub fn drop_session(&self, status: ConnectionStatus) {
        self.lock().drop_pending = Some(status);
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects.len()
    }

    pub fn last_connect(&self) -> Option<(IpAddr, u16, ConnectParams)> {
        self.lock().connects.last().cloned()
    }

    pub fn server_name(&self) -> Option<String> {
        self.lock().server_name.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

pub struct MqttTransport {
    broker: SimBroker,
    staged: VecDeque<TransportEvent>,
    events: VecDeque<TransportEvent>,
    in_flight: Vec<RequestToken>,
    open: bool,
}

impl MqttTransport {
    pub fn simulated(broker: SimBroker) -> Self {
        Self {
            broker,
            staged: VecDeque::new(),
            events: VecDeque::new(),
            in_flight: Vec::new(),
            open: false,
        }
    }

    pub fn broker(&self) -> &SimBroker {
        &self.broker
    }

    fn settle_in_flight(&mut self, ok: bool) {
        for token in self.in_flight.drain(..) {
            self.staged.push_back(TransportEvent::PublishDone { token, ok });
        }
    }
}

impl BrokerTransport for MqttTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut b = self.broker.lock();
        if b.fail_open {
            return Err(TransportError::OutOfMemory);
        }
        b.open_handles += 1;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.staged.clear();
        self.events.clear();
        self.in_flight.clear();
        let mut b = self.broker.lock();
        b.open_handles = b.open_handles.saturating_sub(1);
        b.connected = false;
    }

    fn start_resolve(&mut self, host: &str) -> Result<Option<IpAddr>, TransportError> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(Some(addr));
        }
        let found = self
            .broker
            .lock()
            .known_hosts
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, a)| *a);
        self.staged.push_back(TransportEvent::Resolved(found));
        Ok(None)
    }

    fn configure_security(&mut self, material: &SecurityMaterial<'_>) -> Result<(), TransportError> {
        let mut b = self.broker.lock();
        if b.reject_security {
            return Err(TransportError::BadCredentials);
        }
        b.server_name = Some(material.server_name.to_owned());
        Ok(())
    }

    fn connect(&mut self, addr: IpAddr, port: u16, params: &ConnectParams) -> Result<(), TransportError> {
        let mut b = self.broker.lock();
        b.connects.push((addr, port, params.clone()));
        let reply = b.connect_reply;
        b.connected = reply == ConnectionStatus::Accepted;
        if !b.connected {
            b.subscriptions.clear();
        }
        drop(b);
        debug!("SimBroker: connect from {} answered {:?}", params.client_id, reply);
        self.staged.push_back(TransportEvent::Connection(reply));
        Ok(())
    }

    fn disconnect(&mut self) {
        {
            let mut b = self.broker.lock();
            b.connected = false;
            b.subscriptions.clear();
        }
        self.settle_in_flight(false);
        self.staged.push_back(TransportEvent::Connection(ConnectionStatus::Disconnected));
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS, token: RequestToken) -> Result<(), TransportError> {
        let mut b = self.broker.lock();
        if !b.connected {
            return Err(TransportError::NotConnected);
        }
        let ok = b.subscribe_ok;
        if ok && !b.subscriptions.iter().any(|t| t == topic) {
            b.subscriptions.push(topic.to_owned());
        }
        drop(b);
        self.staged.push_back(TransportEvent::SubscribeDone { token, ok });
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str, token: RequestToken) -> Result<(), TransportError> {
        let mut b = self.broker.lock();
        if !b.connected {
            return Err(TransportError::NotConnected);
        }
        b.subscriptions.retain(|t| t != topic);
        drop(b);
        self.staged.push_back(TransportEvent::SubscribeDone { token, ok: true });
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _qos: QoS, token: RequestToken) -> Result<(), TransportError> {
        let mut b = self.broker.lock();
        if !b.connected {
            return Err(TransportError::NotConnected);
        }
        if b.reject_publishes {
            return Err(TransportError::Rejected(-1));
        }
        b.published.push((topic.to_owned(), payload.to_vec()));
        let hold = b.hold_publish_acks;
        drop(b);
        if hold {
            self.in_flight.push(token);
        } else {
            self.staged.push_back(TransportEvent::PublishDone { token, ok: true });
        }
        Ok(())
    }

    fn service(&mut self) {
        self.events.append(&mut self.staged);

        let (dropped, inbound, chunk_len) = {
            let mut b = self.broker.lock();
            let dropped = if b.connected { b.drop_pending.take() } else { None };
            if dropped.is_some() {
                b.connected = false;
                b.subscriptions.clear();
            }
            let mut inbound = Vec::new();
            while let Some((topic, payload)) = b.inbound.pop_front() {
                if b.connected && b.subscriptions.iter().any(|t| *t == topic) {
                    inbound.push((topic, payload));
                } else {
                    debug!("SimBroker: no subscriber for {}", topic);
                }
            }
            (dropped, inbound, b.chunk_len)
        };

        if let Some(status) = dropped {
            info!("SimBroker: session dropped ({:?})", status);
            self.settle_in_flight(false);
            self.events.append(&mut self.staged);
            self.events.push_back(TransportEvent::Connection(status));
        }
        for (topic, payload) in inbound {
            self.events.push_back(header_event(&topic, payload.len()));
            let mut pieces = payload.chunks(chunk_len).peekable();
            if pieces.peek().is_none() {
                chunk_events(&[], true, |e| self.events.push_back(e));
            }
            while let Some(piece) = pieces.next() {
                let last = pieces.peek().is_none();
                chunk_events(piece, last, |e| self.events.push_back(e));
            }
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::net::Ipv4Addr;

    fn params() -> ConnectParams {
        ConnectParams {
            client_id: "node".into(),
            username: None,
            password: None,
            keep_alive_secs: 300,
            server_name: None,
        }
    }

    fn drain(t: &mut MqttTransport) -> Vec<TransportEvent> {
        t.service();
        std::iter::from_fn(|| t.poll_event()).collect()
    }

    #[test]
    fn replies_arrive_on_next_tick() {
        let broker = SimBroker::new();
        let mut t = MqttTransport::simulated(broker.clone());
        t.open().unwrap();
        t.connect(IpAddr::V4(Ipv4Addr::LOCALHOST), 1883, &params()).unwrap();
        assert!(t.poll_event().is_none());
        assert_eq!(
            drain(&mut t),
            [TransportEvent::Connection(ConnectionStatus::Accepted)]
        );
        assert!(broker.is_connected());
    }

    #[test]
    fn names_resolve_through_host_table() {
        let broker = SimBroker::new();
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        broker.add_host("broker.local", addr);
        let mut t = MqttTransport::simulated(broker);
        assert_eq!(t.start_resolve("10.0.0.1").unwrap(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(t.start_resolve("broker.local").unwrap(), None);
        assert_eq!(drain(&mut t), [TransportEvent::Resolved(Some(addr))]);
        t.start_resolve("nowhere").unwrap();
        assert_eq!(drain(&mut t), [TransportEvent::Resolved(None)]);
    }

    #[test]
    fn held_publishes_fail_on_disconnect() {
        let broker = SimBroker::new();
        broker.hold_publish_acks(true);
        let mut t = MqttTransport::simulated(broker);
        t.open().unwrap();
        t.connect(IpAddr::V4(Ipv4Addr::LOCALHOST), 1883, &params()).unwrap();
        drain(&mut t);
        t.publish("a", b"x", QoS::AtLeastOnce, RequestToken(5)).unwrap();
        assert!(drain(&mut t).is_empty());
        t.disconnect();
        let events = drain(&mut t);
        assert!(events.contains(&TransportEvent::PublishDone {
            token: RequestToken(5),
            ok: false
        }));
    }

    #[test]
    fn inbound_only_for_subscribed_topics() {
        let broker = SimBroker::new();
        broker.set_chunk_len(2);
        let mut t = MqttTransport::simulated(broker.clone());
        t.open().unwrap();
        t.connect(IpAddr::V4(Ipv4Addr::LOCALHOST), 1883, &params()).unwrap();
        drain(&mut t);
        t.subscribe("node/control/water", QoS::AtLeastOnce, RequestToken(1)).unwrap();
        drain(&mut t);

        broker.deliver("node/control/light", b"x");
        broker.deliver("node/control/water", b"abc");
        let events = drain(&mut t);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], TransportEvent::IncomingHeader { total_len: 3, .. }));
        assert!(matches!(&events[2], TransportEvent::IncomingChunk { last: true, .. }));
    }
}
