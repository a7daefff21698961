//! Broker transport port.
//!
//! Abstracts the MQTT/TLS client library below the engine.  Requests are
//! fire-and-forget; their outcomes come back as [`TransportEvent`]s after
//! a [`BrokerTransport::service`] tick.  Requests carry an engine-chosen
//! [`RequestToken`] so completions can be matched without the transport
//! knowing anything about topics or sessions.

use core::fmt;
use core::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Longest topic name the engine handles.
pub const MAX_TOPIC_LEN: usize = 128;
/// Largest inbound data chunk a transport may deliver at once.
pub const MAX_CHUNK_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Engine-assigned correlation id for subscribe/unsubscribe/publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(pub u16);

/// Outcome of a connect attempt, or a later drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Accepted,
    RefusedProtocolVersion,
    RefusedIdentifier,
    RefusedServer,
    RefusedCredentials,
    RefusedNotAuthorized,
    Disconnected,
    Timeout,
}

/// Session parameters sent in CONNECT.  No last-will is ever set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    /// Name the broker certificate must carry; also sent as SNI.
    pub server_name: Option<String>,
}

/// PEM credential material for mutual TLS.
#[derive(Clone, Copy)]
pub struct SecurityMaterial<'a> {
    pub ca_cert: &'a str,
    pub client_cert: &'a str,
    pub client_key: &'a str,
    pub server_name: &'a str,
}

impl fmt::Debug for SecurityMaterial<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityMaterial")
            .field("ca_cert_len", &self.ca_cert.len())
            .field("client_cert_len", &self.client_cert.len())
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Name resolution finished; `None` on failure or timeout.
    Resolved(Option<IpAddr>),
    Connection(ConnectionStatus),
    /// Start of an inbound message.
    IncomingHeader {
        topic: heapless::String<MAX_TOPIC_LEN>,
        total_len: usize,
    },
    /// Next slice of the current inbound message.
    IncomingChunk {
        data: heapless::Vec<u8, MAX_CHUNK_LEN>,
        last: bool,
    },
    SubscribeDone { token: RequestToken, ok: bool },
    PublishDone { token: RequestToken, ok: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The library could not allocate a handle or buffer.
    OutOfMemory,
    /// The request needs a live session.
    NotConnected,
    /// Bad or unusable credential material.
    BadCredentials,
    /// Any other library error code.
    Rejected(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NotConnected => write!(f, "not connected"),
            Self::BadCredentials => write!(f, "bad credential material"),
            Self::Rejected(code) => write!(f, "rejected (rc={})", code),
        }
    }
}

/// The MQTT/TLS client library, seen from the engine.
pub trait BrokerTransport {
    /// Allocate the client handle.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Release the client handle and everything it owns.
    fn close(&mut self);

    /// Begin resolving `host`.  `Ok(Some)` if the answer is already known
    /// (literal address or cache hit); otherwise a
    /// [`TransportEvent::Resolved`] follows.
    fn start_resolve(&mut self, host: &str) -> Result<Option<IpAddr>, TransportError>;

    fn configure_security(&mut self, material: &SecurityMaterial<'_>) -> Result<(), TransportError>;

    fn connect(&mut self, addr: IpAddr, port: u16, params: &ConnectParams) -> Result<(), TransportError>;

    /// Drop the session.  Every publish still in flight must complete with
    /// `ok: false` on a following tick.
    fn disconnect(&mut self);

    fn subscribe(&mut self, topic: &str, qos: QoS, token: RequestToken) -> Result<(), TransportError>;

    fn unsubscribe(&mut self, topic: &str, token: RequestToken) -> Result<(), TransportError>;

    /// Publish with retain off.  The transport copies what it needs.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, token: RequestToken) -> Result<(), TransportError>;

    /// Run the network stack for one tick.
    fn service(&mut self);

    /// Next event produced by earlier ticks.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
