//! Fuzz target: inbound message reassembly.
//!
//! Drives the engine's header/chunk entry points with an arbitrary event
//! sequence on a live session.
//!
//! Invariants checked:
//! - No panics under any event sequence
//! - The handler never sees more than the buffer can hold
//!
//! cargo fuzz run fuzz_inbound_message

#![no_main]

use std::cell::Cell;

use greenhouse_node::adapters::mqtt::{MqttTransport, SimBroker};
use greenhouse_node::broker::{BrokerEngine, CommandHandler, EngineConfig, MAX_MESSAGE_LEN, TopicId};
use greenhouse_node::settings::SettingsRecord;
use libfuzzer_sys::fuzz_target;

struct LengthCheck(Cell<usize>);

impl CommandHandler for LengthCheck {
    fn control_topics(&self) -> &[&'static str] {
        &["water", "light"]
    }

    fn on_command(&self, _topic: TopicId, payload: &[u8]) {
        assert!(payload.len() <= MAX_MESSAGE_LEN);
        self.0.set(self.0.get() + 1);
    }
}

const TOPICS: [&str; 3] = ["GreenhouseNode1/control/water", "GreenhouseNode1/control/light", "other"];

fuzz_target!(|data: &[u8]| {
    let handler = LengthCheck(Cell::new(0));
    let config = EngineConfig {
        tls: false,
        ..EngineConfig::default()
    };
    let mut engine = BrokerEngine::new(MqttTransport::simulated(SimBroker::new()), config);
    if engine.init(&SettingsRecord::compiled_defaults(false), &handler).is_err() {
        return;
    }

    let mut rest = data;
    while let [op, arg, tail @ ..] = rest {
        match op % 3 {
            0 => engine.on_message_header(TOPICS[usize::from(*arg) % TOPICS.len()], usize::from(*arg)),
            _ => {
                let len = usize::from(*arg).min(tail.len());
                engine.on_message_chunk(&tail[..len], op & 0x80 != 0);
                rest = &tail[len..];
                continue;
            }
        }
        rest = tail;
    }
});
