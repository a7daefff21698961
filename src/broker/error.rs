//! Broker engine error taxonomy.
//!
//! Closed set; every variant maps to one fixed diagnostic string.  The
//! engine records the most recent one as its status.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    // ── Setup ─────────────────────────────────────────────────
    Alloc,
    Resolve,
    Certificates,
    Connect,
    InvalidState,
    // ── Connection refusals (terminal until reconfigured) ─────
    RefusedProtocolVersion,
    RefusedIdentifier,
    RefusedServer,
    RefusedCredentials,
    RefusedNotAuthorized,
    // ── Transport drops (auto-reconnect) ──────────────────────
    Disconnected,
    Timeout,
    // ── Inbound reassembly ────────────────────────────────────
    TopicUndefined,
    LengthExceeded,
    Unterminated,
    // ── Outbound ──────────────────────────────────────────────
    Publish,
    // ── Reconfiguration required ──────────────────────────────
    ReconfigureCertificates,
    ReconfigureClient,
}

impl EngineError {
    pub fn diagnostic(self) -> &'static str {
        match self {
            Self::Alloc => "Error allocating dynamic memory",
            Self::Resolve => "Error retrieving server's IP during DNS lookup",
            Self::Certificates => "Error parsing certificates",
            Self::Connect => "Error establishing connection",
            Self::InvalidState => "Error uninitialized state",
            Self::RefusedProtocolVersion => "Connection refused: wrong protocol version",
            Self::RefusedIdentifier => "Connection refused: wrong ID",
            Self::RefusedServer => "Connection refused: server",
            Self::RefusedCredentials => "Connection refused: wrong credentials",
            Self::RefusedNotAuthorized => "Connection refused: not authorized",
            Self::Disconnected => "Disconnected - common error",
            Self::Timeout => "Disconnected - timeout",
            Self::TopicUndefined => "Subscription topic is undefined",
            Self::LengthExceeded => "Message from the broker exceeded buffer length",
            Self::Unterminated => "Message ended without a final chunk",
            Self::Publish => "Error publishing message",
            Self::ReconfigureCertificates => "Certs should be reconfigured",
            Self::ReconfigureClient => "Client information should be reconfigured",
        }
    }

    /// Broker refused the session; retrying with the same parameters is
    /// pointless.
    pub fn is_refusal(self) -> bool {
        matches!(
            self,
            Self::RefusedProtocolVersion
                | Self::RefusedIdentifier
                | Self::RefusedServer
                | Self::RefusedCredentials
                | Self::RefusedNotAuthorized
        )
    }

    /// Which reconfiguration a refusal calls for.
    pub fn reconfiguration_hint(self) -> Option<Self> {
        match self {
            Self::RefusedCredentials | Self::RefusedNotAuthorized => Some(Self::ReconfigureCertificates),
            Self::RefusedProtocolVersion | Self::RefusedIdentifier | Self::RefusedServer => {
                Some(Self::ReconfigureClient)
            }
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.diagnostic())
    }
}
