//! Per-topic subscription state and inbound message reassembly.

use core::fmt::Write as _;

use super::TopicId;
use super::transport::{MAX_TOPIC_LEN, RequestToken};

/// Reassembly buffer size.  One byte is reserved, so the longest message
/// accepted is one less.
pub const TOPIC_BUFFER_LEN: usize = 128;
pub const MAX_MESSAGE_LEN: usize = TOPIC_BUFFER_LEN - 1;

/// An outstanding subscribe or unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubRequest {
    pub token: RequestToken,
    pub want: bool,
    pub retried: bool,
}

/// Result of feeding one chunk into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Feed {
    /// More bytes still expected.
    Partial,
    /// All bytes received and the transport marked the chunk final.
    Complete,
    /// All declared bytes arrived but the final marker did not.
    Unterminated,
    /// The chunk would overrun the declared length.
    Overflow,
}

#[derive(Debug)]
pub struct TopicSession {
    name: heapless::String<MAX_TOPIC_LEN>,
    id: TopicId,
    buffer: heapless::Vec<u8, TOPIC_BUFFER_LEN>,
    remaining: usize,
    subscribed: bool,
    pub(crate) request: Option<SubRequest>,
}

impl TopicSession {
    /// Session for `<client_id>/control/<suffix>`.  `None` if the full name
    /// does not fit.
    pub fn new(client_id: &str, suffix: &str, id: TopicId) -> Option<Self> {
        let mut name = heapless::String::new();
        write!(name, "{}/control/{}", client_id, suffix).ok()?;
        Some(Self {
            name,
            id,
            buffer: heapless::Vec::new(),
            remaining: 0,
            subscribed: false,
            request: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> TopicId {
        self.id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub(crate) fn set_subscribed(&mut self, subscribed: bool) {
        self.subscribed = subscribed;
    }

    /// Bytes still expected for the message in progress.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    /// Start a new message of `total_len` bytes.  Returns `false`, leaving
    /// the session empty, if it cannot fit.
    pub(crate) fn begin(&mut self, total_len: usize) -> bool {
        self.reset();
        if total_len > MAX_MESSAGE_LEN {
            return false;
        }
        self.remaining = total_len;
        true
    }

    /// Append a chunk.  An overflowing chunk is rejected whole and leaves
    /// the session empty.
    pub(crate) fn feed(&mut self, data: &[u8], last: bool) -> Feed {
        if data.len() > self.remaining || self.buffer.extend_from_slice(data).is_err() {
            self.reset();
            return Feed::Overflow;
        }
        self.remaining -= data.len();
        match (self.remaining, last) {
            (0, true) => Feed::Complete,
            (0, false) => Feed::Unterminated,
            _ => Feed::Partial,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.remaining = 0;
    }
}
