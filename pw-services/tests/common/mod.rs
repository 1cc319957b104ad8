//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pw_core::config::{AppConfig, ServerConfig};
use pw_core::error::{PulseError, PulseResult};
use pw_services::{TelemetrySnapshot, TelemetryStore};
use pw_socket::{RawEvent, Transport, TransportSession};

/// Sender side of one scripted connection. Dropping it makes the server
/// close the connection.
pub type ServerFeed = mpsc::UnboundedSender<RawEvent>;

enum Scripted {
    Refuse,
    Accept(mpsc::UnboundedReceiver<RawEvent>),
}

/// A transport whose connection attempts follow a script.
///
/// Each call to `connect` consumes the next scripted outcome. Once the
/// script runs out every attempt is refused.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    attempts: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful connection and return its event feed.
    pub fn accept(&self) -> ServerFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().push_back(Scripted::Accept(rx));
        tx
    }

    /// Queue a refused connection attempt.
    pub fn refuse(&self) {
        self.script.lock().unwrap().push_back(Scripted::Refuse);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _config: &ServerConfig) -> PulseResult<Box<dyn TransportSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Accept(feed)) => Ok(Box::new(ScriptedSession { feed })),
            Some(Scripted::Refuse) | None => {
                Err(PulseError::Socket("connection refused".into()))
            }
        }
    }
}

struct ScriptedSession {
    feed: mpsc::UnboundedReceiver<RawEvent>,
}

#[async_trait]
impl TransportSession for ScriptedSession {
    async fn next_event(&mut self) -> PulseResult<Option<RawEvent>> {
        Ok(self.feed.recv().await)
    }

    async fn close(&mut self) {
        self.feed.close();
    }
}

/// Config with fast, deterministic reconnect timings.
pub fn create_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.address = "http://telemetry.test:3000".into();
    config.reconnect.base_delay_ms = 5;
    config.reconnect.max_delay_ms = 20;
    config.reconnect.jitter_factor = 0.0;
    config.store.event_buffer = 256;
    config
}

pub fn event(name: &str, payload: Value) -> RawEvent {
    RawEvent {
        name: name.to_string(),
        payload,
    }
}

pub fn metrics_payload(cpu: f64) -> Value {
    json!({
        "cpu": cpu,
        "memory": {"used": 6.1, "total": 16.0, "percentage": 38.1},
        "requests": 15230,
        "responseTime": 142.0,
        "activeSessions": 27,
        "uptime": 172800
    })
}

pub fn service_payload(name: &str, status: &str) -> Value {
    json!({"name": name, "status": status, "responseTime": 12.5})
}

pub fn alert_payload(title: &str) -> Value {
    json!({"severity": "WARNING", "title": title, "message": format!("{title} triggered")})
}

/// Wait until the store publishes a snapshot matching `pred`.
pub async fn wait_until<F>(store: &TelemetryStore, pred: F) -> Arc<TelemetrySnapshot>
where
    F: Fn(&TelemetrySnapshot) -> bool,
{
    let mut rx = store.watch();
    let result = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s))).await;
    let guard = result
        .expect("timed out waiting for store state")
        .expect("store closed");
    Arc::clone(&guard)
}

/// Poll `cond` until it holds or the timeout elapses.
pub async fn eventually<F>(cond: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
