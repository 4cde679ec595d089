//! Connection lifecycle integration tests.
//!
//! Drives the socket manager through mock engines on a paused Tokio clock:
//! connect/disconnect transitions, health checks, reconnection backoff,
//! heartbeat timeouts, server errors and event batching.

mod common;

use std::time::Duration;

use common::{EngineCall, FixedDelayStrategy, Harness};
use sc_socket::{
    ConnectionState, ConnectionStatus, DisconnectionSource, EngineError, EngineErrorKind,
    Endpoint, ErrorPayload, Event, SocketError,
};

fn transport_error() -> EngineError {
    EngineError::new(EngineErrorKind::Protocol, "connection reset by peer")
}

fn connected(id: &str) -> ConnectionState {
    ConnectionState::Connected {
        connection_id: id.into(),
    }
}

// ---- Connect ----

#[tokio::test(start_paused = true)]
async fn e2e_connect_without_endpoint_is_noop() {
    let harness = Harness::build(|builder| builder);

    harness.manager.connect();
    harness.settle().await;

    assert_eq!(harness.state(), ConnectionState::Initialized);
    assert_eq!(harness.engine_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn e2e_connect_reaches_connected_through_health_check() {
    let harness = Harness::new();

    harness.manager.connect();
    assert_eq!(harness.state(), ConnectionState::Connecting);
    harness.settle().await;
    assert_eq!(harness.engine().calls(), vec![EngineCall::Connect]);

    harness.engine().simulate_open();
    harness.settle().await;
    assert_eq!(harness.state(), ConnectionState::WaitingForConnectionId);

    harness.engine().simulate_health_check("abc123");
    harness.settle().await;
    assert_eq!(harness.state(), connected("abc123"));
    assert_eq!(harness.manager.connection_id().as_deref(), Some("abc123"));
    assert!(harness.manager.last_pong_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn e2e_connect_is_noop_while_active() {
    let harness = Harness::new();

    harness.manager.connect();
    harness.manager.connect();
    assert_eq!(harness.state(), ConnectionState::Connecting);
    harness.settle().await;

    harness.engine().simulate_open();
    harness.settle().await;
    harness.manager.connect();
    harness.settle().await;
    assert_eq!(harness.state(), ConnectionState::WaitingForConnectionId);

    harness.engine().simulate_health_check("abc123");
    harness.settle().await;
    harness.manager.connect();
    harness.settle().await;
    assert_eq!(harness.state(), connected("abc123"));

    assert_eq!(harness.engine_count(), 1);
    assert_eq!(harness.engine().count(EngineCall::Connect), 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_state_receiver_sees_latest_state() {
    let harness = Harness::new();
    let receiver = harness.manager.state_receiver();

    harness.connect_fully("abc123").await;

    assert_eq!(*receiver.borrow(), connected("abc123"));
}

// ---- Disconnect ----

#[tokio::test(start_paused = true)]
async fn e2e_disconnect_is_synchronous_and_final() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    assert_eq!(
        harness.state(),
        ConnectionState::Disconnecting {
            source: DisconnectionSource::UserInitiated
        }
    );

    harness.settle().await;
    assert_eq!(
        harness.state(),
        ConnectionState::Disconnected {
            source: DisconnectionSource::UserInitiated
        }
    );

    harness.advance(Duration::from_secs(60)).await;
    assert_eq!(harness.engine().count(EngineCall::Connect), 1);
    assert_eq!(
        harness.statuses().last(),
        Some(&ConnectionStatus::Disconnected { error: None })
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_disconnect_flushes_events_before_closing() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;
    harness.advance(Duration::from_millis(600)).await;

    harness.engine().simulate_event("message.new");
    harness.settle().await;
    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    harness.settle().await;

    let journal = harness.journal.lock().clone();
    let flushed = journal
        .iter()
        .position(|entry| entry.starts_with("batch[") && entry.contains("message.new"))
        .expect("message.new was never flushed");
    let closed = journal
        .iter()
        .position(|entry| entry == "engine.disconnect")
        .expect("engine was never closed");
    assert!(flushed < closed, "journal: {journal:?}");
}

#[tokio::test(start_paused = true)]
async fn e2e_disconnect_without_connection_completes() {
    let harness = Harness::new();

    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    harness.settle().await;

    assert_eq!(
        harness.state(),
        ConnectionState::Disconnected {
            source: DisconnectionSource::UserInitiated
        }
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_disconnect_cancels_pending_reconnection() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.engine().simulate_close(Some(transport_error()));
    harness.settle().await;
    assert!(matches!(
        harness.state(),
        ConnectionState::WaitingForReconnect { .. }
    ));

    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    harness.settle().await;
    assert_eq!(
        harness.state(),
        ConnectionState::Disconnected {
            source: DisconnectionSource::UserInitiated
        }
    );

    harness.advance(Duration::from_secs(30)).await;
    assert_eq!(harness.engine().count(EngineCall::Connect), 1);
}

// ---- Events ----

#[tokio::test(start_paused = true)]
async fn e2e_health_check_is_never_batched() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.engine().simulate_event("message.new");
    harness.engine().simulate_health_check("abc123");
    harness.engine().simulate_event("reaction.new");
    harness.advance(Duration::from_millis(600)).await;

    let events = harness.events();
    assert!(events
        .iter()
        .all(|event| !matches!(event, Event::HealthCheck(_))));

    let labels: Vec<&str> = events
        .iter()
        .filter(|event| matches!(event, Event::Server(_)))
        .map(Event::label)
        .collect();
    assert_eq!(labels, vec!["message.new", "reaction.new"]);

    let connected_transitions = harness
        .observer
        .states()
        .iter()
        .filter(|state| state.is_connected())
        .count();
    // One transition per health check: the initial one plus the refresh.
    assert_eq!(connected_transitions, 2);
}

#[tokio::test(start_paused = true)]
async fn e2e_status_updates_are_deduplicated() {
    let harness = Harness::build(|builder| {
        builder
            .with_connect_endpoint(Endpoint::connect())
            .with_reconnection_strategy(FixedDelayStrategy {
                delay: Some(Duration::from_secs(5)),
            })
    });
    harness.connect_fully("abc123").await;
    harness.engine().simulate_close(Some(transport_error()));
    harness.advance(Duration::from_secs(6)).await;

    assert_eq!(
        harness.statuses(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Connecting,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_unsupported_event_does_not_affect_connection() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.engine().simulate_event("call.ring");
    harness.engine().simulate_message("not json at all");
    harness.advance(Duration::from_millis(600)).await;

    assert_eq!(harness.state(), connected("abc123"));
    assert!(harness
        .events()
        .iter()
        .all(|event| !matches!(event, Event::Server(_))));
}

// ---- Reconnection ----

#[tokio::test(start_paused = true)]
async fn e2e_reconnect_scenario_after_transport_failure() {
    let harness = Harness::build(|builder| {
        builder
            .with_connect_endpoint(Endpoint::connect())
            .with_reconnection_strategy(FixedDelayStrategy {
                delay: Some(Duration::from_secs(5)),
            })
    });

    harness.connect_fully("abc123").await;
    harness.engine().simulate_close(Some(transport_error()));
    harness.settle().await;

    harness.advance(Duration::from_millis(4_900)).await;
    assert!(matches!(
        harness.state(),
        ConnectionState::WaitingForReconnect { .. }
    ));

    harness.advance(Duration::from_millis(200)).await;
    assert_eq!(harness.state(), ConnectionState::Connecting);

    assert_eq!(
        harness.observer.states(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::WaitingForConnectionId,
            connected("abc123"),
            ConnectionState::WaitingForReconnect {
                error: Some(SocketError::Engine(transport_error())),
            },
            ConnectionState::Connecting,
        ]
    );
    // Same request, same engine.
    assert_eq!(harness.engine_count(), 1);
    assert_eq!(harness.engine().count(EngineCall::Connect), 2);
}

#[tokio::test(start_paused = true)]
async fn e2e_backoff_resets_after_connected() {
    let harness = Harness::new();

    harness.manager.connect();
    harness.settle().await;
    let engine = harness.engine();

    // Two failed attempts: retries after 1s, then 2s.
    engine.simulate_close(Some(transport_error()));
    harness.settle().await;
    harness.advance(Duration::from_millis(1_100)).await;
    assert_eq!(engine.count(EngineCall::Connect), 2);

    engine.simulate_close(Some(transport_error()));
    harness.settle().await;
    harness.advance(Duration::from_millis(1_100)).await;
    assert_eq!(engine.count(EngineCall::Connect), 2);
    harness.advance(Duration::from_millis(1_000)).await;
    assert_eq!(engine.count(EngineCall::Connect), 3);

    engine.simulate_open();
    engine.simulate_health_check("abc123");
    harness.settle().await;
    assert_eq!(harness.state(), connected("abc123"));

    // Back to the base delay.
    engine.simulate_close(Some(transport_error()));
    harness.settle().await;
    harness.advance(Duration::from_millis(1_100)).await;
    assert_eq!(engine.count(EngineCall::Connect), 4);
    assert_eq!(harness.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn e2e_offline_error_without_retry_is_system_initiated() {
    let harness = Harness::build(|builder| {
        builder
            .with_connect_endpoint(Endpoint::connect())
            .with_reconnection_strategy(FixedDelayStrategy { delay: None })
    });
    harness.connect_fully("abc123").await;

    harness.engine().simulate_close(Some(EngineError::new(
        EngineErrorKind::Offline,
        "network is unreachable",
    )));
    harness.settle().await;

    let state = harness.state();
    assert_eq!(
        state,
        ConnectionState::Disconnected {
            source: DisconnectionSource::SystemInitiated
        }
    );
    assert!(state.is_automatic_reconnection_enabled());

    harness.manager.network_reachability_changed(true);
    assert_eq!(harness.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn e2e_network_loss_disconnects_without_retry() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.manager.network_reachability_changed(false);
    harness.settle().await;
    harness.advance(Duration::from_secs(30)).await;

    assert_eq!(
        harness.state(),
        ConnectionState::Disconnected {
            source: DisconnectionSource::SystemInitiated
        }
    );
    assert_eq!(harness.engine().count(EngineCall::Connect), 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_changed_endpoint_replaces_engine() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;
    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    harness.settle().await;
    let first = harness.engine();

    harness
        .manager
        .set_connect_endpoint(Some(Endpoint::connect().with_query_item("user_id", "u2")));
    harness.manager.connect();
    harness.settle().await;

    assert_eq!(harness.engine_count(), 2);
    assert!(first.is_detached());
    assert_eq!(harness.engine().calls(), vec![EngineCall::Connect]);
    assert_eq!(harness.state(), ConnectionState::Connecting);

    // Late callbacks from the replaced engine must not touch the new connection.
    first.simulate_open();
    first.simulate_health_check("stale");
    first.simulate_close(Some(transport_error()));
    harness.settle().await;
    assert_eq!(harness.state(), ConnectionState::Connecting);

    harness.engine().simulate_open();
    harness.engine().simulate_health_check("fresh");
    harness.settle().await;
    assert_eq!(harness.state(), connected("fresh"));
}

// ---- Unconfirmed close ----

#[tokio::test(start_paused = true)]
async fn e2e_unconfirmed_close_after_missed_pongs_still_reconnects() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;
    let silent = harness.engine();
    silent.withhold_close_confirmation();

    harness.manager.disconnect(DisconnectionSource::NoPongReceived);
    harness.advance(Duration::from_millis(4_900)).await;
    assert_eq!(
        harness.state(),
        ConnectionState::Disconnecting {
            source: DisconnectionSource::NoPongReceived
        }
    );

    harness.advance(Duration::from_millis(200)).await;
    assert_eq!(harness.state(), ConnectionState::WaitingForReconnect { error: None });
    assert!(silent.is_detached());

    harness.advance(Duration::from_secs(1)).await;
    assert_eq!(harness.state(), ConnectionState::Connecting);
    assert_eq!(harness.engine_count(), 2);
    assert_eq!(harness.engine().calls(), vec![EngineCall::Connect]);
}

#[tokio::test(start_paused = true)]
async fn e2e_unconfirmed_user_close_completes_and_ignores_late_close() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;
    let silent = harness.engine();
    silent.withhold_close_confirmation();

    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    harness.advance(Duration::from_secs(6)).await;
    let disconnected = ConnectionState::Disconnected {
        source: DisconnectionSource::UserInitiated,
    };
    assert_eq!(harness.state(), disconnected);

    silent.simulate_close(Some(transport_error()));
    harness.advance(Duration::from_secs(30)).await;
    assert_eq!(harness.state(), disconnected);
}

#[tokio::test(start_paused = true)]
async fn e2e_confirmed_close_cancels_confirmation_deadline() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;
    harness.engine().withhold_close_confirmation();

    harness.manager.disconnect(DisconnectionSource::UserInitiated);
    harness.settle().await;
    harness.engine().simulate_close(None);
    harness.settle().await;
    harness.manager.connect();
    harness.settle().await;

    // The old deadline must not tear down the new connection attempt.
    harness.advance(Duration::from_secs(10)).await;
    assert_eq!(harness.state(), ConnectionState::Connecting);
    assert_eq!(harness.engine_count(), 1);
}

// ---- Threads ----

#[tokio::test(start_paused = true)]
async fn e2e_connect_from_plain_thread() {
    let harness = Harness::new();

    let manager = harness.manager.clone();
    std::thread::spawn(move || manager.connect())
        .join()
        .expect("connect panicked off the runtime");
    harness.settle().await;

    assert_eq!(harness.state(), ConnectionState::Connecting);
    assert_eq!(harness.engine().calls(), vec![EngineCall::Connect]);

    harness.advance(Duration::from_millis(600)).await;
    assert_eq!(harness.statuses(), vec![ConnectionStatus::Connecting]);
}

// ---- Heartbeat ----

#[tokio::test(start_paused = true)]
async fn e2e_missed_pongs_trigger_reconnect() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.advance(Duration::from_millis(25_100)).await;
    assert_eq!(harness.engine().count(EngineCall::SendPing), 1);

    harness.advance(Duration::from_secs(3)).await;
    assert_eq!(harness.engine().count(EngineCall::SendPing), 2);
    assert!(harness.state().is_connected());

    harness.advance(Duration::from_secs(3)).await;
    assert!(harness.observer.states().contains(&ConnectionState::Disconnecting {
        source: DisconnectionSource::NoPongReceived
    }));
    assert_eq!(
        harness.state(),
        ConnectionState::WaitingForReconnect { error: None }
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_pongs_keep_connection_alive() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    for _ in 0..4 {
        harness.advance(Duration::from_millis(25_100)).await;
        harness.engine().simulate_pong();
        harness.settle().await;
    }

    assert_eq!(harness.state(), connected("abc123"));
    assert_eq!(harness.engine().count(EngineCall::SendPing), 4);
}

// ---- Server errors ----

#[tokio::test(start_paused = true)]
async fn e2e_invalid_token_error_stops_reconnecting() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.engine().simulate_message(
        r#"{"error":{"code":40,"message":"token expired","StatusCode":401}}"#,
    );
    harness.settle().await;

    let payload = ErrorPayload {
        code: 40,
        message: "token expired".into(),
        status_code: 401,
    };
    let expected_source = DisconnectionSource::ServerInitiated {
        error: Some(SocketError::Server(payload.clone())),
    };
    assert_eq!(
        harness.state(),
        ConnectionState::Disconnecting {
            source: expected_source.clone()
        }
    );

    harness
        .engine()
        .simulate_close(Some(EngineError::closed(1000, "")));
    harness.settle().await;

    let state = harness.state();
    assert_eq!(
        state,
        ConnectionState::Disconnected {
            source: expected_source
        }
    );
    assert_eq!(
        ConnectionStatus::from(&state),
        ConnectionStatus::Disconnected {
            error: Some(SocketError::Server(payload))
        }
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_server_initiated_disconnect_keeps_its_own_error() {
    let harness = Harness::build(|builder| {
        builder
            .with_connect_endpoint(Endpoint::connect())
            .with_reconnection_strategy(FixedDelayStrategy {
                delay: Some(Duration::from_secs(5)),
            })
    });
    harness.connect_fully("abc123").await;
    harness.engine().withhold_close_confirmation();

    harness
        .manager
        .disconnect(DisconnectionSource::ServerInitiated { error: None });
    harness.settle().await;
    harness.engine().simulate_close(Some(transport_error()));
    harness.settle().await;

    assert_eq!(harness.state(), ConnectionState::WaitingForReconnect { error: None });
}

#[tokio::test(start_paused = true)]
async fn e2e_server_error_without_close_is_closed_after_grace() {
    let harness = Harness::new();
    harness.connect_fully("abc123").await;

    harness.engine().simulate_message(
        r#"{"error":{"code":17,"message":"not allowed","StatusCode":403}}"#,
    );
    harness.settle().await;
    assert!(matches!(
        harness.state(),
        ConnectionState::Disconnecting {
            source: DisconnectionSource::ServerInitiated { error: Some(_) }
        }
    ));

    harness.advance(Duration::from_millis(9_900)).await;
    assert_eq!(harness.engine().count(EngineCall::Disconnect), 0);

    harness.advance(Duration::from_millis(200)).await;
    assert_eq!(harness.engine().count(EngineCall::Disconnect), 1);
    assert!(matches!(
        harness.state(),
        ConnectionState::WaitingForReconnect {
            error: Some(SocketError::Server(_))
        }
    ));
}
