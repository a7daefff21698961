//! Broker engine against the simulated esp-mqtt transport.

use std::net::{IpAddr, Ipv4Addr};

use greenhouse_node::adapters::mqtt::{MqttTransport, SimBroker};
use greenhouse_node::broker::{BrokerEngine, ConnectionStatus, EngineConfig, EngineError, EnginePhase};
use greenhouse_node::settings::SettingsRecord;

use crate::mock_hw::RecordingHandler;

const BROKER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));

fn tls_settings() -> SettingsRecord {
    let mut s = SettingsRecord::compiled_defaults(true);
    s.set_named_field("broker_host", "broker.local");
    s.set_named_field("broker_cn", "broker.greenhouse");
    s.set_named_field("client_id", "gh7");
    s.set_named_field("client_name", "grower");
    s.set_named_field("client_password", "hunter22");
    assert!(s.set_security_material("CA PEM", "CERT PEM", "KEY PEM"));
    s
}

fn broker() -> SimBroker {
    let b = SimBroker::new();
    b.add_host("broker.local", BROKER_IP);
    b
}

fn connected<'h>(
    b: &SimBroker,
    handler: &'h RecordingHandler,
    config: EngineConfig,
) -> BrokerEngine<MqttTransport, &'h RecordingHandler> {
    let mut engine = BrokerEngine::new(MqttTransport::simulated(b.clone()), config);
    engine.init(&tls_settings(), handler).unwrap();
    engine.connect().unwrap();
    for _ in 0..4 {
        engine.service();
    }
    assert!(engine.is_connected());
    engine
}

#[test]
fn session_comes_up_with_credentials_and_subscriptions() {
    let b = broker();
    let handler = RecordingHandler::new(&["water", "light"]);
    let engine = connected(&b, &handler, EngineConfig::default());

    let (addr, port, params) = b.last_connect().unwrap();
    assert_eq!(addr, BROKER_IP);
    assert_eq!(port, 8883);
    assert_eq!(params.client_id, "gh7");
    assert_eq!(params.username.as_deref(), Some("grower"));
    assert_eq!(params.password.as_deref(), Some("hunter22"));
    assert_eq!(params.keep_alive_secs, 300);
    assert_eq!(b.server_name().as_deref(), Some("broker.greenhouse"));
    assert_eq!(b.subscriptions(), ["gh7/control/water", "gh7/control/light"]);
    assert!(engine.state().sessions().iter().all(|s| s.is_subscribed()));
}

#[test]
fn chunked_command_reaches_handler_once() {
    let b = broker();
    let handler = RecordingHandler::new(&["water", "light"]);
    let mut engine = connected(&b, &handler, EngineConfig::default());

    b.set_chunk_len(3);
    b.deliver("gh7/control/light", b"toggle please");
    engine.service();

    assert_eq!(handler.commands(), vec![(1, b"toggle please".to_vec())]);
    assert_eq!(engine.status(), None);
}

#[test]
fn oversized_command_is_dropped() {
    let b = broker();
    let handler = RecordingHandler::new(&["water"]);
    let mut engine = connected(&b, &handler, EngineConfig::default());

    b.deliver("gh7/control/water", &[b'x'; 200]);
    engine.service();

    assert!(handler.commands().is_empty());
    assert_eq!(engine.status(), Some(EngineError::LengthExceeded));

    b.deliver("gh7/control/water", b"ok");
    engine.service();
    assert_eq!(handler.commands(), vec![(0, b"ok".to_vec())]);
}

#[test]
fn missing_certificates_fail_init_and_release_client() {
    let b = broker();
    let handler = RecordingHandler::new(&["water"]);
    let mut settings = tls_settings();
    assert!(settings.set_security_material("", "", ""));
    let mut engine = BrokerEngine::new(MqttTransport::simulated(b.clone()), EngineConfig::default());

    assert_eq!(engine.init(&settings, &handler), Err(EngineError::Certificates));
    assert_eq!(engine.phase(), EnginePhase::Uninitialized);
    assert_eq!(b.open_handles(), 0);
}

#[test]
fn unknown_host_fails_resolution() {
    let b = SimBroker::new();
    let handler = RecordingHandler::new(&["water"]);
    let mut engine = BrokerEngine::new(MqttTransport::simulated(b.clone()), EngineConfig::default());
    assert_eq!(engine.init(&tls_settings(), &handler), Err(EngineError::Resolve));
    assert_eq!(b.open_handles(), 0);
}

#[test]
fn dropped_session_reconnects_and_resubscribes() {
    let b = broker();
    let handler = RecordingHandler::new(&["water", "light"]);
    let mut engine = connected(&b, &handler, EngineConfig::default());

    b.drop_session(ConnectionStatus::Timeout);
    engine.service();
    assert_eq!(engine.status(), Some(EngineError::Timeout));
    assert_eq!(b.connect_count(), 2);

    for _ in 0..3 {
        engine.service();
    }
    assert!(engine.is_connected());
    assert_eq!(b.subscriptions().len(), 2);
}

#[test]
fn reconnect_limit_stops_retrying() {
    let b = broker();
    let handler = RecordingHandler::new(&["water"]);
    let config = EngineConfig {
        reconnect_limit: Some(2),
        ..EngineConfig::default()
    };
    let mut engine = connected(&b, &handler, config);

    b.set_connect_reply(ConnectionStatus::Disconnected);
    b.drop_session(ConnectionStatus::Disconnected);
    for _ in 0..10 {
        engine.service();
    }
    assert_eq!(b.connect_count(), 3);
    assert_eq!(engine.phase(), EnginePhase::Disconnected);
}

#[test]
fn credential_refusal_blocks_until_reconfigured() {
    let b = broker();
    b.set_connect_reply(ConnectionStatus::RefusedCredentials);
    let handler = RecordingHandler::new(&["water"]);
    let mut engine = BrokerEngine::new(MqttTransport::simulated(b.clone()), EngineConfig::default());
    engine.init(&tls_settings(), &handler).unwrap();
    engine.connect().unwrap();
    engine.service();

    assert_eq!(engine.status(), Some(EngineError::RefusedCredentials));
    assert_eq!(engine.reconfiguration_required(), Some(EngineError::ReconfigureCertificates));
    assert_eq!(engine.connect(), Err(EngineError::ReconfigureCertificates));
    assert_eq!(b.connect_count(), 1);

    b.set_connect_reply(ConnectionStatus::Accepted);
    let mut fixed = tls_settings();
    fixed.set_named_field("client_password", "correct-horse");
    engine.reconfigure_security(&fixed).unwrap();
    engine.connect().unwrap();
    engine.service();

    assert!(engine.is_connected());
    assert_eq!(b.last_connect().unwrap().2.password.as_deref(), Some("correct-horse"));
}

#[test]
fn identifier_refusal_needs_client_reconfiguration() {
    let b = broker();
    b.set_connect_reply(ConnectionStatus::RefusedIdentifier);
    let handler = RecordingHandler::new(&["water"]);
    let mut engine = BrokerEngine::new(MqttTransport::simulated(b.clone()), EngineConfig::default());
    engine.init(&tls_settings(), &handler).unwrap();
    engine.connect().unwrap();
    engine.service();
    assert_eq!(engine.reconfiguration_required(), Some(EngineError::ReconfigureClient));

    b.set_connect_reply(ConnectionStatus::Accepted);
    let mut renamed = tls_settings();
    renamed.set_named_field("client_id", "gh8");
    engine.reconfigure_client(&renamed).unwrap();
    engine.connect().unwrap();
    for _ in 0..3 {
        engine.service();
    }
    assert_eq!(b.subscriptions(), ["gh8/control/water"]);
}

#[test]
fn publish_is_skipped_while_down_and_settled_at_teardown() {
    let b = broker();
    let handler = RecordingHandler::new(&["water"]);
    let mut engine = BrokerEngine::new(MqttTransport::simulated(b.clone()), EngineConfig::default());
    engine.init(&tls_settings(), &handler).unwrap();

    assert_eq!(engine.publish("gh7/climate", b"{}"), Ok(()));
    assert_eq!(engine.pending_publishes(), 0);
    assert!(b.published().is_empty());

    engine.connect().unwrap();
    for _ in 0..3 {
        engine.service();
    }
    b.hold_publish_acks(true);
    engine.publish("gh7/climate", b"{\"r_humidity\":40.00}").unwrap();
    engine.publish("gh7/water", b"OFF").unwrap();
    assert_eq!(engine.pending_publishes(), 2);

    engine.teardown();
    assert_eq!(engine.phase(), EnginePhase::Uninitialized);
    assert_eq!(engine.pending_publishes(), 0);
    assert_eq!(b.open_handles(), 0);
    assert_eq!(b.connect_count(), 1);
    assert!(b.subscriptions().is_empty());
}

#[test]
fn in_flight_table_is_bounded() {
    let b = broker();
    let handler = RecordingHandler::new(&["water"]);
    let mut engine = connected(&b, &handler, EngineConfig::default());
    b.hold_publish_acks(true);

    for _ in 0..greenhouse_node::broker::MAX_IN_FLIGHT {
        engine.publish("gh7/light", b"ON").unwrap();
    }
    assert_eq!(engine.publish("gh7/light", b"ON"), Err(EngineError::Alloc));

    b.hold_publish_acks(false);
    b.drop_session(ConnectionStatus::Disconnected);
    engine.service();
    engine.teardown();
    assert_eq!(engine.pending_publishes(), 0);
}
