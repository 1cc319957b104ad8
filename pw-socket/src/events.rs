//! Socket event types, connection state, and event dispatcher.
//!
//! Defines the wire-level event names streamed from the telemetry server
//! and the local lifecycle events emitted by the connection manager, and
//! provides the dispatcher that carries both on one ordered stream.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use pw_core::constants::events as names;

/// All socket event types the client understands.
///
/// Lifecycle variants are produced locally by the connection manager;
/// the rest map 1:1 to Socket.IO event names sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketEventType {
    /// Transport handshake completed (`connect`).
    Connect,
    /// A connection attempt has started (`connecting`).
    Connecting,
    /// Transport is down (`disconnect`).
    Disconnect,
    /// Full system metrics snapshot (`metrics-update`).
    MetricsUpdate,
    /// Health of one or more services (`service-health-update`).
    ServiceHealthUpdate,
    /// A new alert was raised (`alert`).
    Alert,
    /// Progress of a long-running operator or search task
    /// (`operation-progress`, also accepted as `search-progress`).
    OperationProgress,
    /// Unknown/unhandled event name.
    Unknown(String),
}

impl SocketEventType {
    /// Parse an event name from the wire.
    pub fn from_name(s: &str) -> Self {
        match s {
            names::CONNECT => Self::Connect,
            names::CONNECTING => Self::Connecting,
            names::DISCONNECT => Self::Disconnect,
            names::METRICS_UPDATE => Self::MetricsUpdate,
            names::SERVICE_HEALTH_UPDATE => Self::ServiceHealthUpdate,
            names::ALERT => Self::Alert,
            names::OPERATION_PROGRESS | names::SEARCH_PROGRESS => Self::OperationProgress,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Canonical wire name for this event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => names::CONNECT,
            Self::Connecting => names::CONNECTING,
            Self::Disconnect => names::DISCONNECT,
            Self::MetricsUpdate => names::METRICS_UPDATE,
            Self::ServiceHealthUpdate => names::SERVICE_HEALTH_UPDATE,
            Self::Alert => names::ALERT,
            Self::OperationProgress => names::OPERATION_PROGRESS,
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether this event is a local connection lifecycle event.
    ///
    /// The server may not emit these; the manager drops them if it does.
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(self, Self::Connect | Self::Connecting | Self::Disconnect)
    }
}

impl std::fmt::Display for SocketEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A socket event with type and associated raw payload.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    /// The type of event.
    pub event_type: SocketEventType,
    /// The event payload as received.
    pub data: serde_json::Value,
}

impl SocketEvent {
    /// Build an event from a wire name and payload.
    pub fn new(name: &str, data: serde_json::Value) -> Self {
        Self {
            event_type: SocketEventType::from_name(name),
            data,
        }
    }

    /// Build the lifecycle event announcing a connection state.
    pub fn lifecycle(state: ConnectionState) -> Self {
        let event_type = match state {
            ConnectionState::Disconnected => SocketEventType::Disconnect,
            ConnectionState::Connecting => SocketEventType::Connecting,
            ConnectionState::Connected => SocketEventType::Connect,
        };
        Self {
            event_type,
            data: serde_json::Value::Null,
        }
    }
}

/// Event dispatcher feeding one ordered stream to every consumer.
///
/// Raw observers subscribe to a broadcast ring and may lag behind. A
/// dispatcher built with [`EventDispatcher::with_sink`] also feeds a
/// bounded queue that never drops: [`EventDispatcher::dispatch`] waits for
/// room in it, so a slow sink consumer slows the producer instead.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<SocketEvent>,
    sink: Option<mpsc::Sender<SocketEvent>>,
}

impl EventDispatcher {
    /// Create a new EventDispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, sink: None }
    }

    /// Create a dispatcher that also feeds a lossless queue of `capacity`.
    ///
    /// The queue closes once every clone of the dispatcher is dropped.
    pub fn with_sink(capacity: usize) -> (Self, mpsc::Receiver<SocketEvent>) {
        let (sink_tx, sink_rx) = mpsc::channel(capacity.max(1));
        let mut dispatcher = Self::new(capacity);
        dispatcher.sink = Some(sink_tx);
        (dispatcher, sink_rx)
    }

    /// Subscribe to receive socket events.
    ///
    /// Slow consumers that fall behind receive `RecvError::Lagged`
    /// and miss the overwritten events.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to the sink and all active subscribers.
    pub async fn dispatch(&self, event: SocketEvent) {
        let event_type = event.event_type.as_str().to_string();
        if let Some(sink) = &self.sink {
            if sink.send(event.clone()).await.is_err() {
                debug!("event sink closed, {event_type} goes to subscribers only");
            }
        }
        match self.sender.send(event) {
            Ok(count) => {
                debug!("dispatched {event_type} to {count} subscriber(s)");
            }
            Err(_) => {
                // No active receivers -- fine during startup/shutdown
                debug!("no subscribers for event {event_type}");
            }
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Connection state of the socket manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Not connected. Either idle or waiting out a backoff delay.
    #[default]
    Disconnected,
    /// Attempting to establish the connection.
    Connecting,
    /// Connected and receiving events.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parsing() {
        assert_eq!(
            SocketEventType::from_name("metrics-update"),
            SocketEventType::MetricsUpdate
        );
        assert_eq!(
            SocketEventType::from_name("service-health-update"),
            SocketEventType::ServiceHealthUpdate
        );
        assert_eq!(
            SocketEventType::from_name("search-progress"),
            SocketEventType::OperationProgress
        );
        assert_eq!(
            SocketEventType::from_name("deploy-started"),
            SocketEventType::Unknown("deploy-started".into())
        );
    }

    #[test]
    fn test_event_type_roundtrip() {
        let types = vec![
            SocketEventType::Connect,
            SocketEventType::Connecting,
            SocketEventType::Disconnect,
            SocketEventType::MetricsUpdate,
            SocketEventType::ServiceHealthUpdate,
            SocketEventType::Alert,
            SocketEventType::OperationProgress,
        ];
        for event_type in types {
            assert_eq!(SocketEventType::from_name(event_type.as_str()), event_type);
        }
    }

    #[test]
    fn test_lifecycle_classification() {
        assert!(SocketEventType::Connect.is_lifecycle_event());
        assert!(SocketEventType::Disconnect.is_lifecycle_event());
        assert!(!SocketEventType::Alert.is_lifecycle_event());
        assert!(!SocketEventType::Unknown("connect-ish".into()).is_lifecycle_event());
    }

    #[test]
    fn test_lifecycle_event_for_state() {
        assert_eq!(
            SocketEvent::lifecycle(ConnectionState::Connected).event_type,
            SocketEventType::Connect
        );
        assert_eq!(
            SocketEvent::lifecycle(ConnectionState::Disconnected).event_type,
            SocketEventType::Disconnect
        );
    }

    #[tokio::test]
    async fn test_event_dispatcher() {
        let dispatcher = EventDispatcher::new(16);
        let mut rx = dispatcher.subscribe();

        dispatcher
            .dispatch(SocketEvent::new("alert", serde_json::json!({"title": "disk"})))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, SocketEventType::Alert);
        assert_eq!(event.data["title"], "disk");
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher
            .dispatch(SocketEvent::lifecycle(ConnectionState::Connecting))
            .await;
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sink_keeps_every_event_while_ring_overflows() {
        let (dispatcher, mut sink) = EventDispatcher::with_sink(4);
        let mut ring = dispatcher.subscribe();

        let producer = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    dispatcher
                        .dispatch(SocketEvent::new("alert", serde_json::json!({ "seq": i })))
                        .await;
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 50 {
            let event = sink.recv().await.unwrap();
            seen.push(event.data["seq"].as_i64().unwrap());
        }
        producer.await.unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());

        assert!(matches!(
            ring.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn test_sink_closes_with_last_dispatcher() {
        let (dispatcher, mut sink) = EventDispatcher::with_sink(4);
        let clone = dispatcher.clone();
        drop(dispatcher);
        clone
            .dispatch(SocketEvent::lifecycle(ConnectionState::Connected))
            .await;
        drop(clone);

        assert_eq!(
            sink.recv().await.unwrap().event_type,
            SocketEventType::Connect
        );
        assert!(sink.recv().await.is_none());
    }

    #[test]
    fn test_connection_state_display_and_serde() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(
            serde_json::to_value(ConnectionState::Connecting).unwrap(),
            serde_json::json!("CONNECTING")
        );
    }
}
