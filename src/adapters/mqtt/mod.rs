//! MQTT transport adapters.
//!
//! Implements [`BrokerTransport`](crate::broker::BrokerTransport) on top of
//! a concrete client.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: esp-mqtt through `esp_idf_svc::mqtt`.  The
//!   client runs its own task; its callback forwards events into a bounded
//!   channel which the engine drains on each service tick.
//! - **all other targets**: an in-process loopback broker ([`SimBroker`])
//!   that tests can script and inspect.
//!
//! Both sides split inbound payloads into [`MAX_CHUNK_LEN`] pieces so the
//! engine sees the same header/chunk sequence regardless of how the client
//! library fragments them.

use log::warn;

use crate::broker::{MAX_CHUNK_LEN, TransportEvent};

#[cfg(target_os = "espidf")]
mod esp_impl;
#[cfg(target_os = "espidf")]
pub use esp_impl::MqttTransport;

#[cfg(not(target_os = "espidf"))]
mod sim;
#[cfg(not(target_os = "espidf"))]
pub use sim::{MqttTransport, SimBroker};

/// Header event for an inbound message.  A topic too long to hold can
/// never match a control topic, so it is reported as empty.
pub(crate) fn header_event(topic: &str, total_len: usize) -> TransportEvent {
    let topic = heapless::String::try_from(topic).unwrap_or_else(|_| {
        warn!("MQTT: inbound topic of {} bytes truncated", topic.len());
        heapless::String::new()
    });
    TransportEvent::IncomingHeader { topic, total_len }
}

/// Split `data` into chunk events.  Only the final piece carries `last`,
/// and an empty slice still yields one (empty) chunk.
pub(crate) fn chunk_events(data: &[u8], last: bool, mut emit: impl FnMut(TransportEvent)) {
    let mut pieces = data.chunks(MAX_CHUNK_LEN).peekable();
    if pieces.peek().is_none() {
        emit(TransportEvent::IncomingChunk {
            data: heapless::Vec::new(),
            last,
        });
        return;
    }
    while let Some(piece) = pieces.next() {
        let mut buf = heapless::Vec::new();
        // `chunks` never yields more than MAX_CHUNK_LEN bytes.
        let _ = buf.extend_from_slice(piece);
        emit(TransportEvent::IncomingChunk {
            data: buf,
            last: last && pieces.peek().is_none(),
        });
    }
}
