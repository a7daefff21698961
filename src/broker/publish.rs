//! In-flight publish bookkeeping.
//!
//! Each accepted publish owns a copy of its topic and payload until the
//! transport reports completion.  Release is by value: removing a record
//! from the table drops it, so it cannot be released twice.

use log::warn;

use super::transport::RequestToken;

/// Publishes that may be awaiting completion at once.  Completions land
/// on a later service tick, so this covers two full reporting rounds of a
/// node with every sensor slot and actuator populated.
pub const MAX_IN_FLIGHT: usize = 12;

#[derive(Debug)]
pub struct PendingPublish {
    token: RequestToken,
    topic: String,
    payload: Vec<u8>,
}

impl PendingPublish {
    pub fn new(token: RequestToken, topic: &str, payload: &[u8]) -> Self {
        Self {
            token,
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        }
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[derive(Debug, Default)]
pub struct PublishTable {
    records: heapless::Vec<PendingPublish, MAX_IN_FLIGHT>,
}

impl PublishTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.is_full()
    }

    /// Track a record.  Gives it back if the table is full.
    pub fn insert(&mut self, record: PendingPublish) -> Result<(), PendingPublish> {
        self.records.push(record)
    }

    /// Remove and return the record for `token`.
    pub fn release(&mut self, token: RequestToken) -> Option<PendingPublish> {
        let at = self.records.iter().position(|r| r.token == token)?;
        Some(self.records.swap_remove(at))
    }

    /// Drop everything still tracked.  Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let n = self.records.len();
        for r in self.records.iter() {
            warn!("Broker: releasing unfinished publish on {}", r.topic);
        }
        self.records.clear();
        n
    }
}
