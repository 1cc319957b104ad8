//! End-to-end event flow integration tests.
//!
//! Tests the complete pipeline: scripted server -> SocketManager ->
//! EventDispatcher -> EventNormalizer -> TelemetryStore -> subscribers,
//! including reconnects, lifecycle ordering and malformed input.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use common::{
    alert_payload, create_test_config, event, eventually, metrics_payload, service_payload,
    wait_until, ScriptedTransport,
};
use pw_core::constants::MAX_ALERTS;
use pw_services::{ServiceStatus, TelemetrySession};
use pw_socket::ConnectionState;

// ---- Connection lifecycle ----

#[tokio::test]
async fn e2e_connect_marks_store_connected() {
    let transport = ScriptedTransport::new();
    let _feed = transport.accept();

    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;
    let snapshot = wait_until(session.store(), |s| s.is_connected()).await;

    assert_eq!(snapshot.connection, ConnectionState::Connected);
    assert!(snapshot.metrics.is_none());
    assert_eq!(transport.attempts(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_lifecycle_transitions_observed_in_order() {
    let transport = ScriptedTransport::new();
    let _feed = transport.accept();
    let session = TelemetrySession::new(&create_test_config(), transport.clone());

    let history = Arc::new(Mutex::new(Vec::new()));
    let sink = history.clone();
    let _sub = session
        .store()
        .subscribe(move |snap| sink.lock().unwrap().push(snap.connection));

    session.connect().await;
    wait_until(session.store(), |s| s.is_connected()).await;
    session.disconnect().await;
    wait_until(session.store(), |s| s.connection == ConnectionState::Disconnected).await;

    assert_eq!(
        *history.lock().unwrap(),
        [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn e2e_refused_connections_retry_until_accepted() {
    let transport = ScriptedTransport::new();
    transport.refuse();
    transport.refuse();
    let _feed = transport.accept();

    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;
    wait_until(session.store(), |s| s.is_connected()).await;

    assert_eq!(transport.attempts(), 3);
    assert_eq!(session.manager().reconnect_attempts(), 0);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_disconnect_during_backoff_stops_attempts() {
    let transport = ScriptedTransport::new();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    assert!(eventually(|| transport.attempts() >= 2).await);
    session.disconnect().await;
    let after_disconnect = transport.attempts();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.attempts(), after_disconnect);
    assert!(!session.manager().is_running().await);
    assert_eq!(session.snapshot().connection, ConnectionState::Disconnected);
}

// ---- Data events ----

#[tokio::test]
async fn e2e_metrics_update_replaces_snapshot() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event("metrics-update", metrics_payload(21.0))).unwrap();
    feed.send(event("metrics-update", metrics_payload(64.5))).unwrap();

    let snapshot = wait_until(session.store(), |s| {
        s.metrics.as_ref().is_some_and(|m| m.cpu == 64.5)
    })
    .await;
    assert!(snapshot.last_update.is_some());
    assert_eq!(snapshot.metrics.as_ref().unwrap().requests, 15230);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_service_health_dedup_by_name() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event("service-health-update", service_payload("cache", "ONLINE")))
        .unwrap();
    wait_until(session.store(), |s| s.service("cache").is_some()).await;

    feed.send(event("service-health-update", service_payload("cache", "OFFLINE")))
        .unwrap();
    let snapshot = wait_until(session.store(), |s| {
        s.service("cache")
            .is_some_and(|c| c.status == ServiceStatus::Offline)
    })
    .await;

    assert_eq!(snapshot.services.len(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_service_health_batch_merges() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event(
        "service-health-update",
        json!([
            {"name": "api", "status": "ONLINE"},
            {"name": "db", "status": "WARNING", "connections": 40},
        ]),
    ))
    .unwrap();
    feed.send(event("service-health-update", service_payload("api", "warning")))
        .unwrap();

    let snapshot = wait_until(session.store(), |s| {
        s.service("api")
            .is_some_and(|a| a.status == ServiceStatus::Warning)
    })
    .await;
    let names: Vec<_> = snapshot.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["api", "db"]);
    assert_eq!(snapshot.service("db").unwrap().connections, Some(40));
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_burst_larger_than_event_buffer_is_fully_applied() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let mut config = create_test_config();
    config.store.event_buffer = 8;
    let session = TelemetrySession::start(&config, transport.clone()).await;
    wait_until(session.store(), |s| s.is_connected()).await;

    feed.send(event(
        "operation-progress",
        json!({"id": "reindex", "current": 0, "total": 500}),
    ))
    .unwrap();
    for i in 0..500 {
        feed.send(event(
            "service-health-update",
            service_payload(&format!("svc-{i:03}"), "ONLINE"),
        ))
        .unwrap();
    }
    feed.send(event(
        "operation-progress",
        json!({"id": "reindex", "current": 500, "total": 500, "done": true}),
    ))
    .unwrap();
    feed.send(event("alert", alert_payload("burst-end"))).unwrap();

    let snapshot = wait_until(session.store(), |s| !s.alerts.is_empty()).await;
    assert_eq!(snapshot.services.len(), 500);
    assert_eq!(snapshot.services[0].name, "svc-000");
    assert_eq!(snapshot.services[499].name, "svc-499");
    assert!(snapshot.operations.is_empty());

    let stats = session.normalizer_stats();
    assert_eq!(stats.unknown, 0);
    assert_eq!(stats.malformed, 0);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_alert_log_keeps_newest_fifty() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    for i in 1..=51 {
        feed.send(event("alert", alert_payload(&format!("A{i}")))).unwrap();
    }

    let snapshot = wait_until(session.store(), |s| {
        s.alerts.first().is_some_and(|a| a.title == "A51")
    })
    .await;
    assert_eq!(snapshot.alerts.len(), MAX_ALERTS);
    assert_eq!(snapshot.alerts.last().unwrap().title, "A2");
    assert!(snapshot.alerts.iter().all(|a| !a.acknowledged));
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_acknowledge_and_clear_alerts() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event("alert", alert_payload("disk"))).unwrap();
    feed.send(event("alert", alert_payload("memory"))).unwrap();
    let snapshot = wait_until(session.store(), |s| s.alerts.len() == 2).await;
    let id = snapshot.alerts[1].id.clone();

    assert!(session.store().acknowledge_alert(&id).await.unwrap());
    assert!(!session.store().acknowledge_alert(&id).await.unwrap());
    assert!(!session.store().acknowledge_alert("alert-404").await.unwrap());

    let snapshot = session.snapshot();
    assert_eq!(snapshot.unacknowledged_alerts().count(), 1);
    assert_eq!(snapshot.unacknowledged_alerts().next().unwrap().title, "memory");

    assert!(session.store().clear_alerts().await.unwrap());
    assert!(session.snapshot().alerts.is_empty());
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_operation_progress_tracked_until_done() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event(
        "search-progress",
        json!({"id": "search-7", "label": "Log search", "current": 40, "total": 200}),
    ))
    .unwrap();
    let snapshot = wait_until(session.store(), |s| s.operation("search-7").is_some()).await;
    assert_eq!(snapshot.operation("search-7").unwrap().fraction(), Some(0.2));

    feed.send(event(
        "operation-progress",
        json!({"id": "search-7", "current": 200, "total": 200, "done": true}),
    ))
    .unwrap();
    wait_until(session.store(), |s| s.operations.is_empty()).await;
    session.shutdown().await;
}

// ---- Invalid input ----

#[tokio::test]
async fn e2e_unknown_and_malformed_events_are_dropped() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event("deployment-started", json!({"id": 1}))).unwrap();
    feed.send(event("metrics-update", json!({"cpu": 50.0}))).unwrap();
    feed.send(event("service-health-update", json!({"status": "ONLINE"})))
        .unwrap();
    feed.send(event("alert", alert_payload("sentinel"))).unwrap();

    let snapshot = wait_until(session.store(), |s| !s.alerts.is_empty()).await;
    assert!(snapshot.metrics.is_none());
    assert!(snapshot.services.is_empty());

    let stats = session.normalizer_stats();
    assert_eq!(stats.unknown, 1);
    assert_eq!(stats.malformed, 2);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_server_cannot_spoof_lifecycle_events() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;
    wait_until(session.store(), |s| s.is_connected()).await;

    feed.send(event("disconnect", json!(null))).unwrap();
    feed.send(event("alert", alert_payload("after-spoof"))).unwrap();

    let snapshot = wait_until(session.store(), |s| !s.alerts.is_empty()).await;
    assert!(snapshot.is_connected());
    session.shutdown().await;
}

// ---- Reconnect preserves state ----

#[tokio::test]
async fn e2e_unexpected_close_preserves_state_across_reconnect() {
    let transport = ScriptedTransport::new();
    let first = transport.accept();
    let second = transport.accept();
    let session = TelemetrySession::new(&create_test_config(), transport.clone());

    // (connection, has metrics, service count, alert count) per published snapshot
    let history = Arc::new(Mutex::new(Vec::new()));
    let sink = history.clone();
    let _sub = session.store().subscribe(move |snap| {
        sink.lock().unwrap().push((
            snap.connection,
            snap.metrics.is_some(),
            snap.services.len(),
            snap.alerts.len(),
        ))
    });

    session.connect().await;
    first.send(event("metrics-update", metrics_payload(33.0))).unwrap();
    first.send(event("service-health-update", service_payload("api", "ONLINE")))
        .unwrap();
    first.send(event("alert", alert_payload("queue depth"))).unwrap();
    wait_until(session.store(), |s| s.alerts.len() == 1).await;

    drop(first);
    let reconnected = eventually(|| {
        let seen = history.lock().unwrap();
        seen.iter().any(|(c, ..)| *c == ConnectionState::Disconnected)
            && seen.last().is_some_and(|(c, ..)| *c == ConnectionState::Connected)
    })
    .await;
    assert!(reconnected, "session should reconnect after the server closed");
    assert_eq!(transport.attempts(), 2);

    let transitions: Vec<_> = history
        .lock()
        .unwrap()
        .iter()
        .skip_while(|(_, _, _, alerts)| *alerts == 0)
        .copied()
        .collect();
    assert_eq!(
        transitions,
        [
            (ConnectionState::Connected, true, 1, 1),
            (ConnectionState::Disconnected, true, 1, 1),
            (ConnectionState::Connecting, true, 1, 1),
            (ConnectionState::Connected, true, 1, 1),
        ]
    );

    second.send(event("metrics-update", metrics_payload(71.0))).unwrap();
    let snapshot = wait_until(session.store(), |s| {
        s.metrics.as_ref().is_some_and(|m| m.cpu == 71.0)
    })
    .await;
    assert_eq!(snapshot.services.len(), 1);
    assert_eq!(snapshot.alerts.len(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn e2e_shutdown_returns_final_snapshot() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;

    feed.send(event("alert", alert_payload("last words"))).unwrap();
    wait_until(session.store(), |s| !s.alerts.is_empty()).await;

    let snapshot = session.shutdown().await;
    assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    assert_eq!(snapshot.alerts[0].title, "last words");
}

#[tokio::test]
async fn e2e_update_server_url_reconnects() {
    let transport = ScriptedTransport::new();
    let _first = transport.accept();
    let _second = transport.accept();
    let session = TelemetrySession::start(&create_test_config(), transport.clone()).await;
    wait_until(session.store(), |s| s.is_connected()).await;

    session
        .manager()
        .update_server_url("telemetry-2.test:4000/")
        .await;

    assert_eq!(
        session.manager().server_address().await,
        "http://telemetry-2.test:4000"
    );
    wait_until(session.store(), |s| s.is_connected() && transport.attempts() == 2).await;
    session.shutdown().await;
}
