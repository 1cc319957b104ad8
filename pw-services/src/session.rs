//! Telemetry session: socket manager, normalizer and state store wired
//! together.
//!
//! A bridge task reads the dispatcher's lossless queue, normalizes each
//! event and applies it to the store, so lifecycle and data events land in
//! exactly the order they were dispatched. The queue is bounded: while the
//! store is busy the connection task stops reading from the transport.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pw_core::config::AppConfig;
use pw_socket::{EventDispatcher, SocketEvent, SocketManager, Transport};

use crate::normalizer::{EventNormalizer, NormalizerStats};
use crate::state::TelemetrySnapshot;
use crate::store::TelemetryStore;

/// A running telemetry pipeline.
pub struct TelemetrySession {
    manager: SocketManager,
    store: TelemetryStore,
    normalizer: Arc<EventNormalizer>,
    bridge: JoinHandle<()>,
}

impl TelemetrySession {
    /// Build the pipeline without connecting.
    pub fn new(config: &AppConfig, transport: Arc<dyn Transport>) -> Self {
        let (dispatcher, events) = EventDispatcher::with_sink(config.store.event_buffer);
        let manager = SocketManager::from_config(config, transport, dispatcher);
        let store = TelemetryStore::spawn(config.store.command_buffer);
        let normalizer = Arc::new(EventNormalizer::new());

        let bridge = tokio::spawn(run_bridge(events, Arc::clone(&normalizer), store.clone()));

        Self {
            manager,
            store,
            normalizer,
            bridge,
        }
    }

    /// Build the pipeline and start connecting.
    pub async fn start(config: &AppConfig, transport: Arc<dyn Transport>) -> Self {
        let session = Self::new(config, transport);
        session.connect().await;
        session
    }

    pub async fn connect(&self) {
        self.manager.connect().await;
    }

    /// Stop the transport. Held state is kept.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn manager(&self) -> &SocketManager {
        &self.manager
    }

    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.store.snapshot()
    }

    pub fn normalizer_stats(&self) -> NormalizerStats {
        self.normalizer.stats()
    }

    /// Disconnect, drain every event already dispatched, and return the
    /// final snapshot.
    pub async fn shutdown(self) -> Arc<TelemetrySnapshot> {
        let Self {
            manager,
            store,
            bridge,
            ..
        } = self;

        manager.disconnect().await;
        // Dropping the manager closes the event queue; the bridge then drains
        // what is left and exits.
        drop(manager);
        if let Err(e) = bridge.await {
            warn!("event bridge ended abnormally: {e}");
        }

        info!("telemetry session shut down");
        store.snapshot()
    }
}

async fn run_bridge(
    mut events: mpsc::Receiver<SocketEvent>,
    normalizer: Arc<EventNormalizer>,
    store: TelemetryStore,
) {
    while let Some(event) = events.recv().await {
        let Some(domain) = normalizer.normalize(&event, Utc::now()) else {
            continue;
        };

        if store.apply(domain.into()).await.is_err() {
            warn!("state store closed, stopping event bridge");
            return;
        }
    }

    debug!("event bridge stopped");
}
