//! Broker client engine.
//!
//! Drives one MQTT session over a [`BrokerTransport`]: resolve, optional
//! mutual TLS, connect, subscribe the control topics, reassemble inbound
//! commands, track outbound publishes, reconnect on drops, and tear the
//! whole thing down again.  Everything runs on the caller's thread; the
//! only place the engine waits is inside [`BrokerEngine::service`].
//!
//! ```text
//!  Uninitialized ──init──► Disconnected ──connect──► Connecting
//!                              ▲   ▲                      │
//!                  refused ────┘   └── drop/timeout ◄─ Connected
//!                  (no retry)          (reconnect)   ◄────┘ accepted
//! ```

pub mod error;
pub mod publish;
pub mod session;
pub mod transport;

use core::net::IpAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::settings::SettingsRecord;

pub use error::EngineError;
pub use publish::{MAX_IN_FLIGHT, PendingPublish, PublishTable};
pub use session::{MAX_MESSAGE_LEN, TOPIC_BUFFER_LEN, TopicSession};
use session::{Feed, SubRequest};
pub use transport::{
    BrokerTransport, ConnectParams, ConnectionStatus, MAX_CHUNK_LEN, MAX_TOPIC_LEN, QoS,
    RequestToken, SecurityMaterial, TransportError, TransportEvent,
};

/// Index of a control topic in the handler's table.
pub type TopicId = usize;

/// Control topics one engine can track.
pub const MAX_TOPICS: usize = 4;

/// Service ticks to wait for a name resolution before giving up.
const RESOLVE_TICK_LIMIT: u32 = 10_000;

/// Receives complete inbound commands.
pub trait CommandHandler {
    /// Topic suffixes this handler serves, indexed by [`TopicId`].
    fn control_topics(&self) -> &[&'static str];

    fn on_command(&self, topic: TopicId, payload: &[u8]);
}

impl<T: CommandHandler + ?Sized> CommandHandler for &T {
    fn control_topics(&self) -> &[&'static str] {
        (**self).control_topics()
    }

    fn on_command(&self, topic: TopicId, payload: &[u8]) {
        (**self).on_command(topic, payload)
    }
}

impl<T: CommandHandler + ?Sized> CommandHandler for Arc<T> {
    fn control_topics(&self) -> &[&'static str] {
        (**self).control_topics()
    }

    fn on_command(&self, topic: TopicId, payload: &[u8]) {
        (**self).on_command(topic, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    Resolving,
    Configuring,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub qos: QoS,
    pub keep_alive_secs: u16,
    pub tls: bool,
    /// Consecutive automatic reconnects allowed after drops; `None` is
    /// unbounded.
    pub reconnect_limit: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            keep_alive_secs: 300,
            tls: true,
            reconnect_limit: None,
        }
    }
}

/// Everything the engine knows about its session.
#[derive(Debug)]
pub struct ClientState {
    phase: EnginePhase,
    address: Option<IpAddr>,
    port: u16,
    params: Option<ConnectParams>,
    status: Option<EngineError>,
    reconfigure: Option<EngineError>,
    sessions: heapless::Vec<TopicSession, MAX_TOPICS>,
    active: Option<TopicId>,
    drops: u32,
}

impl ClientState {
    fn empty() -> Self {
        Self {
            phase: EnginePhase::Uninitialized,
            address: None,
            port: 0,
            params: None,
            status: None,
            reconfigure: None,
            sessions: heapless::Vec::new(),
            active: None,
            drops: 0,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn params(&self) -> Option<&ConnectParams> {
        self.params.as_ref()
    }

    pub fn sessions(&self) -> &[TopicSession] {
        &self.sessions
    }

    /// Topic whose message is being reassembled.
    pub fn active_topic(&self) -> Option<TopicId> {
        self.active
    }
}

pub struct BrokerEngine<T, H> {
    transport: T,
    handler: Option<H>,
    config: EngineConfig,
    state: ClientState,
    publishes: PublishTable,
    next_token: u16,
}

impl<T: BrokerTransport, H: CommandHandler> BrokerEngine<T, H> {
    pub fn new(transport: T, config: EngineConfig) -> Self {
        Self {
            transport,
            handler: None,
            config,
            state: ClientState::empty(),
            publishes: PublishTable::new(),
            next_token: 0,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn phase(&self) -> EnginePhase {
        self.state.phase
    }

    pub fn is_connected(&self) -> bool {
        self.state.phase == EnginePhase::Connected
    }

    /// Most recent error, cleared when a session is accepted.
    pub fn status(&self) -> Option<EngineError> {
        self.state.status
    }

    /// Set after a refusal; reconnecting is blocked until cleared by the
    /// matching `reconfigure_*` call.
    pub fn reconfiguration_required(&self) -> Option<EngineError> {
        self.state.reconfigure
    }

    pub fn pending_publishes(&self) -> usize {
        self.publishes.len()
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Allocate the client, build the control topic table, resolve the
    /// broker and load credentials.  Leaves the engine `Disconnected`,
    /// ready for [`connect`](Self::connect).  On failure everything
    /// acquired so far is released.
    pub fn init(&mut self, settings: &SettingsRecord, handler: H) -> Result<(), EngineError> {
        if self.state.phase != EnginePhase::Uninitialized {
            return self.fail(EngineError::InvalidState);
        }
        if let Err(e) = self.transport.open() {
            warn!("Broker: client allocation failed: {}", e);
            return self.fail(EngineError::Alloc);
        }

        match self.setup(settings, &handler) {
            Ok(()) => {
                self.handler = Some(handler);
                self.state.phase = EnginePhase::Disconnected;
                info!(
                    "Broker: initialised for {}:{} ({} control topics)",
                    settings.broker_host(),
                    self.state.port,
                    self.state.sessions.len()
                );
                Ok(())
            }
            Err(e) => {
                self.transport.close();
                self.state = ClientState::empty();
                self.fail(e)
            }
        }
    }

    fn setup(&mut self, settings: &SettingsRecord, handler: &H) -> Result<(), EngineError> {
        self.state.sessions = build_sessions(settings.client_id(), handler.control_topics())?;
        let port = settings
            .broker_port_number()
            .ok_or(EngineError::ReconfigureClient)?;

        self.state.phase = EnginePhase::Resolving;
        let addr = self.resolve(settings.broker_host())?;

        if self.config.tls {
            self.state.phase = EnginePhase::Configuring;
            self.apply_security(settings)?;
        }

        self.state.address = Some(addr);
        self.state.port = port;
        self.state.params = Some(connect_params(settings, &self.config));
        Ok(())
    }

    fn resolve(&mut self, host: &str) -> Result<IpAddr, EngineError> {
        match self.transport.start_resolve(host) {
            Ok(Some(addr)) => return Ok(addr),
            Ok(None) => {}
            Err(e) => {
                warn!("Broker: lookup of {} failed: {}", host, e);
                return Err(EngineError::Resolve);
            }
        }
        for _ in 0..RESOLVE_TICK_LIMIT {
            self.transport.service();
            while let Some(event) = self.transport.poll_event() {
                match event {
                    TransportEvent::Resolved(Some(addr)) => {
                        info!("Broker: {} resolved to {}", host, addr);
                        return Ok(addr);
                    }
                    TransportEvent::Resolved(None) => return Err(EngineError::Resolve),
                    other => debug!("Broker: {:?} ignored while resolving", other),
                }
            }
        }
        warn!("Broker: lookup of {} timed out", host);
        Err(EngineError::Resolve)
    }

    fn apply_security(&mut self, settings: &SettingsRecord) -> Result<(), EngineError> {
        let material = SecurityMaterial {
            ca_cert: settings.ca_cert(),
            client_cert: settings.client_cert(),
            client_key: settings.client_key(),
            server_name: settings.broker_cn(),
        };
        if material.ca_cert.is_empty() || material.client_cert.is_empty() || material.client_key.is_empty() {
            warn!("Broker: TLS enabled but credential material is missing");
            return Err(EngineError::Certificates);
        }
        self.transport.configure_security(&material).map_err(|e| {
            warn!("Broker: credential material rejected: {}", e);
            EngineError::Certificates
        })
    }

    /// Start a connect attempt.  A no-op while one is already outstanding
    /// or the session is up.
    pub fn connect(&mut self) -> Result<(), EngineError> {
        match self.state.phase {
            EnginePhase::Connecting | EnginePhase::Connected => {
                debug!("Broker: connect already outstanding");
                return Ok(());
            }
            EnginePhase::Disconnected => {}
            _ => return self.fail(EngineError::InvalidState),
        }
        if let Some(hint) = self.state.reconfigure {
            return self.fail(hint);
        }
        let (Some(addr), Some(params)) = (self.state.address, self.state.params.as_ref()) else {
            return self.fail(EngineError::InvalidState);
        };
        let port = self.state.port;
        match self.transport.connect(addr, port, params) {
            Ok(()) => {
                self.state.phase = EnginePhase::Connecting;
                info!("Broker: connecting to {}:{}", addr, port);
                Ok(())
            }
            Err(e) => {
                warn!("Broker: connect to {}:{} failed: {}", addr, port, e);
                self.fail(EngineError::Connect)
            }
        }
    }

    /// Unsubscribe, disconnect, settle outstanding publishes and release
    /// the client.  Safe to call in any phase.
    pub fn teardown(&mut self) {
        if self.state.phase == EnginePhase::Uninitialized {
            return;
        }
        if self.state.phase == EnginePhase::Connected {
            self.subscribe_all(false);
        }
        if matches!(self.state.phase, EnginePhase::Connecting | EnginePhase::Connected) {
            self.transport.disconnect();
        }

        // Only completions matter now; connection events must not trigger
        // a reconnect.
        self.transport.service();
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::PublishDone { token, ok } => self.on_publish_done(token, ok),
                other => debug!("Broker: {:?} discarded during teardown", other),
            }
        }
        let leftover = self.publishes.release_all();
        if leftover > 0 {
            warn!("Broker: {} publishes force-released at teardown", leftover);
        }

        self.transport.close();
        self.handler = None;
        self.state = ClientState::empty();
        info!("Broker: torn down");
    }

    /// Reload credential material and login after a credentials refusal.
    pub fn reconfigure_security(&mut self, settings: &SettingsRecord) -> Result<(), EngineError> {
        let result = self.apply_credentials(settings);
        self.settle(result)
    }

    fn apply_credentials(&mut self, settings: &SettingsRecord) -> Result<(), EngineError> {
        if self.state.phase != EnginePhase::Disconnected {
            return Err(EngineError::InvalidState);
        }
        if self.config.tls {
            self.state.phase = EnginePhase::Configuring;
            let applied = self.apply_security(settings);
            self.state.phase = EnginePhase::Disconnected;
            applied?;
        }
        let fresh = connect_params(settings, &self.config);
        if let Some(params) = self.state.params.as_mut() {
            params.username = fresh.username;
            params.password = fresh.password;
            params.server_name = fresh.server_name;
        }
        if self.state.reconfigure == Some(EngineError::ReconfigureCertificates) {
            self.state.reconfigure = None;
        }
        self.state.drops = 0;
        info!("Broker: credentials reconfigured");
        Ok(())
    }

    /// Reload broker address and client identity after a refusal that
    /// blamed them.
    pub fn reconfigure_client(&mut self, settings: &SettingsRecord) -> Result<(), EngineError> {
        let result = self.apply_client(settings);
        self.settle(result)
    }

    fn apply_client(&mut self, settings: &SettingsRecord) -> Result<(), EngineError> {
        if self.state.phase != EnginePhase::Disconnected {
            return Err(EngineError::InvalidState);
        }
        let Some(handler) = self.handler.as_ref() else {
            return Err(EngineError::InvalidState);
        };
        let sessions = build_sessions(settings.client_id(), handler.control_topics())?;
        let port = settings
            .broker_port_number()
            .ok_or(EngineError::ReconfigureClient)?;

        self.state.phase = EnginePhase::Resolving;
        let resolved = self.resolve(settings.broker_host());
        self.state.phase = EnginePhase::Disconnected;
        let addr = resolved?;

        self.state.sessions = sessions;
        self.state.active = None;
        self.state.address = Some(addr);
        self.state.port = port;
        self.state.params = Some(connect_params(settings, &self.config));
        if self.state.reconfigure == Some(EngineError::ReconfigureClient) {
            self.state.reconfigure = None;
        }
        self.state.drops = 0;
        info!("Broker: client reconfigured for {}:{}", settings.broker_host(), port);
        Ok(())
    }

    // ── Service ───────────────────────────────────────────────

    /// Run one transport tick and dispatch every event it produced.
    /// Returns how many events were handled.
    pub fn service(&mut self) -> usize {
        if self.state.phase == EnginePhase::Uninitialized {
            return 0;
        }
        self.transport.service();
        let mut handled = 0;
        while let Some(event) = self.transport.poll_event() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Resolved(_) => debug!("Broker: late resolution ignored"),
            TransportEvent::Connection(status) => self.on_connection_status(status),
            TransportEvent::IncomingHeader { topic, total_len } => self.on_message_header(&topic, total_len),
            TransportEvent::IncomingChunk { data, last } => self.on_message_chunk(&data, last),
            TransportEvent::SubscribeDone { token, ok } => self.on_subscribe_done(token, ok),
            TransportEvent::PublishDone { token, ok } => self.on_publish_done(token, ok),
        }
    }

    pub fn on_connection_status(&mut self, status: ConnectionStatus) {
        if self.state.phase == EnginePhase::Uninitialized {
            debug!("Broker: connection event with no client, ignored");
            return;
        }
        let Some(err) = connection_error(status) else {
            self.state.phase = EnginePhase::Connected;
            self.state.status = None;
            self.state.drops = 0;
            info!("Broker: session accepted");
            self.subscribe_all(true);
            return;
        };

        self.mark_dropped();
        self.record(err);

        if let Some(hint) = err.reconfiguration_hint() {
            self.state.reconfigure = Some(hint);
            warn!("Broker: {}", hint);
            return;
        }

        self.state.drops = self.state.drops.saturating_add(1);
        if let Some(limit) = self.config.reconnect_limit {
            if self.state.drops > limit {
                warn!("Broker: reconnect limit of {} reached, staying down", limit);
                return;
            }
        }
        if self.connect().is_err() {
            warn!("Broker: reconnect attempt could not be started");
        }
    }

    fn mark_dropped(&mut self) {
        self.state.phase = EnginePhase::Disconnected;
        self.state.active = None;
        for session in self.state.sessions.iter_mut() {
            session.set_subscribed(false);
            session.request = None;
            session.reset();
        }
    }

    // ── Subscriptions ─────────────────────────────────────────

    /// Bring every control topic to `want`, issuing requests only for
    /// topics whose flag differs and that have nothing outstanding.
    pub fn subscribe_all(&mut self, want: bool) {
        if self.state.phase != EnginePhase::Connected {
            debug!("Broker: not connected, subscription change deferred");
            return;
        }
        for index in 0..self.state.sessions.len() {
            let session = &self.state.sessions[index];
            if session.is_subscribed() == want || session.request.is_some() {
                continue;
            }
            self.issue_subscription(index, want, false);
        }
    }

    fn issue_subscription(&mut self, index: usize, want: bool, retried: bool) {
        let token = self.next_token();
        let qos = self.config.qos;
        let Some(session) = self.state.sessions.get_mut(index) else {
            return;
        };
        let issued = if want {
            self.transport.subscribe(session.name(), qos, token)
        } else {
            self.transport.unsubscribe(session.name(), token)
        };
        session.request = None;
        match issued {
            Ok(()) => {
                session.request = Some(SubRequest { token, want, retried });
                return;
            }
            Err(e) if !retried => {
                warn!("Broker: {} {} not issued ({}), retrying once", verb(want), session.name(), e);
            }
            Err(e) => {
                error!("Broker: {} {} not issued twice, giving up: {}", verb(want), session.name(), e);
                return;
            }
        }
        self.issue_subscription(index, want, true);
    }

    pub fn on_subscribe_done(&mut self, token: RequestToken, ok: bool) {
        let Some(index) = self
            .state
            .sessions
            .iter()
            .position(|s| s.request.is_some_and(|r| r.token == token))
        else {
            debug!("Broker: completion for unknown subscription {:?}", token);
            return;
        };
        let session = &mut self.state.sessions[index];
        let Some(request) = session.request.take() else {
            return;
        };
        if ok {
            session.set_subscribed(request.want);
            info!("Broker: {} {}", verb(request.want), session.name());
        } else if !request.retried {
            warn!("Broker: {} {} failed, retrying once", verb(request.want), session.name());
            self.issue_subscription(index, request.want, true);
        } else {
            error!("Broker: {} {} failed twice, giving up", verb(request.want), session.name());
        }
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Start of an inbound message.  Any message in progress is abandoned.
    pub fn on_message_header(&mut self, topic: &str, total_len: usize) {
        self.state.active = None;
        let Some(index) = self.state.sessions.iter().position(|s| s.name() == topic) else {
            warn!("Broker: message on unknown topic '{}'", topic);
            self.record(EngineError::TopicUndefined);
            return;
        };
        if self.state.sessions[index].begin(total_len) {
            self.state.active = Some(index);
        } else {
            warn!("Broker: {} byte message on {} dropped", total_len, topic);
            self.record(EngineError::LengthExceeded);
        }
    }

    /// Next chunk of the message in progress.  The handler runs once the
    /// declared length is reached on a final chunk.
    pub fn on_message_chunk(&mut self, data: &[u8], last: bool) {
        let Some(index) = self.state.active else {
            debug!("Broker: {} byte chunk with no accepted header dropped", data.len());
            return;
        };
        let Some(session) = self.state.sessions.get_mut(index) else {
            self.state.active = None;
            return;
        };
        match session.feed(data, last) {
            Feed::Partial => {}
            Feed::Complete => {
                let session = &self.state.sessions[index];
                debug!("Broker: {} byte command on {}", session.payload().len(), session.name());
                if let Some(handler) = self.handler.as_ref() {
                    handler.on_command(session.id(), session.payload());
                }
                self.state.sessions[index].reset();
                self.state.active = None;
            }
            Feed::Unterminated => {
                self.state.active = None;
                self.record(EngineError::Unterminated);
            }
            Feed::Overflow => {
                self.state.active = None;
                self.record(EngineError::LengthExceeded);
            }
        }
    }

    // ── Outbound ──────────────────────────────────────────────

    /// Publish `payload` on `topic`.  Silently skipped, allocating
    /// nothing, while disconnected or when either argument is empty.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), EngineError> {
        if self.state.phase != EnginePhase::Connected || topic.is_empty() || payload.is_empty() {
            debug!("Broker: publish to '{}' skipped", topic);
            return Ok(());
        }
        if self.publishes.is_full() {
            warn!("Broker: {} publishes already in flight", self.publishes.len());
            return self.fail(EngineError::Alloc);
        }
        let token = self.next_token();
        let record = PendingPublish::new(token, topic, payload);
        if let Err(e) = self
            .transport
            .publish(record.topic(), record.payload(), self.config.qos, token)
        {
            warn!("Broker: publish to {} failed: {}", topic, e);
            return self.fail(EngineError::Publish);
        }
        if self.publishes.insert(record).is_err() {
            return self.fail(EngineError::Alloc);
        }
        Ok(())
    }

    pub fn on_publish_done(&mut self, token: RequestToken, ok: bool) {
        match self.publishes.release(token) {
            Some(record) if ok => {
                debug!("Broker: {} bytes delivered to {}", record.payload().len(), record.topic())
            }
            Some(record) => warn!("Broker: publish to {} not confirmed", record.topic()),
            None => debug!("Broker: completion for unknown publish {:?}", token),
        }
    }

    // ── Helpers ───────────────────────────────────────────────

    fn next_token(&mut self) -> RequestToken {
        self.next_token = self.next_token.wrapping_add(1);
        RequestToken(self.next_token)
    }

    fn record(&mut self, err: EngineError) {
        error!("Broker: {}", err);
        self.state.status = Some(err);
    }

    fn fail<R>(&mut self, err: EngineError) -> Result<R, EngineError> {
        self.record(err);
        Err(err)
    }

    fn settle(&mut self, result: Result<(), EngineError>) -> Result<(), EngineError> {
        if let Err(e) = result {
            self.record(e);
        }
        result
    }
}

fn build_sessions(
    client_id: &str,
    topics: &[&'static str],
) -> Result<heapless::Vec<TopicSession, MAX_TOPICS>, EngineError> {
    let mut sessions = heapless::Vec::new();
    for (id, suffix) in topics.iter().enumerate() {
        let session = TopicSession::new(client_id, suffix, id).ok_or(EngineError::Alloc)?;
        sessions.push(session).map_err(|_| EngineError::Alloc)?;
    }
    Ok(sessions)
}

fn connect_params(settings: &SettingsRecord, config: &EngineConfig) -> ConnectParams {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());
    ConnectParams {
        client_id: settings.client_id().to_owned(),
        username: non_empty(settings.client_name()),
        password: non_empty(settings.client_password()),
        keep_alive_secs: config.keep_alive_secs,
        server_name: if config.tls {
            non_empty(settings.broker_cn())
        } else {
            None
        },
    }
}

fn connection_error(status: ConnectionStatus) -> Option<EngineError> {
    Some(match status {
        ConnectionStatus::Accepted => return None,
        ConnectionStatus::RefusedProtocolVersion => EngineError::RefusedProtocolVersion,
        ConnectionStatus::RefusedIdentifier => EngineError::RefusedIdentifier,
        ConnectionStatus::RefusedServer => EngineError::RefusedServer,
        ConnectionStatus::RefusedCredentials => EngineError::RefusedCredentials,
        ConnectionStatus::RefusedNotAuthorized => EngineError::RefusedNotAuthorized,
        ConnectionStatus::Disconnected => EngineError::Disconnected,
        ConnectionStatus::Timeout => EngineError::Timeout,
    })
}

fn verb(want: bool) -> &'static str {
    if want { "subscribe to" } else { "unsubscribe from" }
}
