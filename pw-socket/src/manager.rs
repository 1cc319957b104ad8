//! Socket connection manager.
//!
//! Owns the persistent connection to the telemetry server. Handles the
//! initial handshake, automatic reconnection with exponential backoff and
//! jitter, lifecycle event emission and routing of inbound events to the
//! [`EventDispatcher`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use pw_core::error::PulseError;

use pw_core::config::{AppConfig, ReconnectSettings, ServerConfig};
use pw_core::constants;

use crate::events::{ConnectionState, EventDispatcher, SocketEvent};
use crate::transport::{RawEvent, Transport, TransportSession};

/// Configuration for socket reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay between reconnection attempts.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0) added to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.3,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

impl ReconnectConfig {
    /// Reconnection delay for the given zero-based attempt.
    ///
    /// Sequence with defaults: 1s, 2s, 4s, 8s, 16s, capped at 30s,
    /// each with +/- 30% jitter. Never below 100ms unless the base is.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(base);

        let exponential = (base * 2.0_f64.powi(attempt.min(32) as i32)).min(max);

        let jitter_range = exponential * self.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let floor = base.min(0.1);
        let delay = (exponential + jitter).max(floor);

        Duration::from_secs_f64(delay)
    }
}

/// State shared between the manager handle and its connection task.
struct Shared {
    server_config: Mutex<ServerConfig>,
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    state_tx: watch::Sender<ConnectionState>,
    /// Consecutive failed attempts since the last successful handshake.
    reconnect_attempts: AtomicU32,
}

impl Shared {
    /// Update the connection state, notify watchers, and emit the
    /// matching lifecycle event if the value actually changed.
    async fn set_state(&self, new_state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            info!("socket state: {} -> {}", *state, new_state);
            *state = new_state;
            true
        });
        if changed {
            self.dispatcher
                .dispatch(SocketEvent::lifecycle(new_state))
                .await;
        }
    }

    async fn forward(&self, event: RawEvent) {
        let event = SocketEvent::new(&event.name, event.payload);
        if event.event_type.is_lifecycle_event() {
            warn!("ignoring reserved event name from server: {}", event.event_type);
            return;
        }
        debug!("socket event: {}", event.event_type);
        self.dispatcher.dispatch(event).await;
    }
}

/// Handle on the running connection task.
struct ConnectionTask {
    handle: JoinHandle<()>,
    stop_tx: oneshot::Sender<()>,
}

enum PumpExit {
    /// `disconnect()` was requested.
    Stopped,
    /// The transport went away on its own.
    Closed(String),
}

/// Socket connection manager.
///
/// Manages the full lifecycle of the connection:
/// - Handshake through the configured [`Transport`]
/// - Automatic reconnection with exponential backoff + jitter until
///   [`SocketManager::disconnect`] is called
/// - Lifecycle events (`connecting`, `connect`, `disconnect`) on the same
///   dispatcher as data events, so consumers see one ordered stream
/// - Server URL change without rebuilding the manager
pub struct SocketManager {
    shared: Arc<Shared>,
    reconnect_config: ReconnectConfig,
    task: Mutex<Option<ConnectionTask>>,
}

impl SocketManager {
    /// Create a new SocketManager.
    pub fn new(
        server_config: ServerConfig,
        transport: Arc<dyn Transport>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                server_config: Mutex::new(server_config),
                transport,
                dispatcher,
                state_tx,
                reconnect_attempts: AtomicU32::new(0),
            }),
            reconnect_config: ReconnectConfig::default(),
            task: Mutex::new(None),
        }
    }

    /// Create a manager from the application config.
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn Transport>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self::new(config.server.clone(), transport, dispatcher)
            .with_reconnect_config(ReconnectConfig::from(&config.reconnect))
    }

    /// Set custom reconnection configuration.
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Get the event dispatcher (for subscribing to events).
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Consecutive failed attempts since the last successful handshake.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Calculate the reconnection delay for an attempt.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_config.delay_for(attempt)
    }

    /// Start the connection.
    ///
    /// Launches a background task that maintains the connection and
    /// reconnects automatically. Failures never surface here: they are
    /// logged and retried. Calls made while a connection task is already
    /// running are coalesced into it.
    pub async fn connect(&self) {
        let mut task = self.task.lock().await;
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                debug!("already connected or connecting, skipping");
                return;
            }
        }

        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
        self.shared.set_state(ConnectionState::Connecting).await;

        let (stop_tx, stop_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let reconnect = self.reconnect_config.clone();
        let handle = tokio::spawn(supervise_connection(shared, reconnect, stop_rx));

        *task = Some(ConnectionTask { handle, stop_tx });
    }

    /// Disconnect and stop reconnection attempts.
    ///
    /// Cancels any pending backoff timer or in-flight handshake and waits
    /// for the connection task to finish. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let mut task = self.task.lock().await;
        let Some(ConnectionTask { mut handle, stop_tx }) = task.take() else {
            self.shared.set_state(ConnectionState::Disconnected).await;
            debug!("disconnect requested while idle");
            return;
        };

        let _ = stop_tx.send(());
        let grace = Duration::from_millis(constants::DISCONNECT_GRACE_MS);
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("connection task did not stop within {grace:?}, aborting");
            handle.abort();
            let _ = handle.await;
        }

        self.shared.set_state(ConnectionState::Disconnected).await;
        info!("socket disconnected");
    }

    /// Whether a connection task is currently running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Update the server URL without rebuilding the manager.
    ///
    /// If a connection task is running it is restarted against the new
    /// address.
    pub async fn update_server_url(&self, new_address: &str) {
        let new_address = AppConfig::sanitize_server_address(new_address);
        let old_address = {
            let mut config = self.shared.server_config.lock().await;
            std::mem::replace(&mut config.address, new_address.clone())
        };

        info!("server url updated: {} -> {}", old_address, new_address);

        if self.is_running().await {
            self.disconnect().await;
            self.connect().await;
        }
    }

    /// Get the current server address.
    pub async fn server_address(&self) -> String {
        self.shared.server_config.lock().await.address.clone()
    }

    /// Inject a raw event as if it had arrived from the server.
    ///
    /// Reserved lifecycle names are dropped; only the manager may emit those.
    pub async fn process_event(&self, event_name: &str, data: serde_json::Value) {
        self.shared
            .forward(RawEvent {
                name: event_name.to_string(),
                payload: data,
            })
            .await;
    }
}

/// Run the connection loop, publishing `Disconnected` if it panics.
async fn supervise_connection(
    shared: Arc<Shared>,
    reconnect: ReconnectConfig,
    stop_rx: oneshot::Receiver<()>,
) {
    let outcome = AssertUnwindSafe(run_connection(Arc::clone(&shared), reconnect, stop_rx))
        .catch_unwind()
        .await;
    if outcome.is_err() {
        error!("connection task panicked; connect() again to restart it");
        shared.set_state(ConnectionState::Disconnected).await;
    }
}

/// Background connection loop: connect, pump events, back off, repeat.
async fn run_connection(
    shared: Arc<Shared>,
    reconnect: ReconnectConfig,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting).await;
        let config = shared.server_config.lock().await.clone();
        info!("socket connecting to {}", config.address);

        let outcome = tokio::select! {
            result = shared.transport.connect(&config) => result,
            _ = &mut stop_rx => {
                info!("connection attempt cancelled by disconnect request");
                return;
            }
        };

        match outcome {
            Ok(mut session) => {
                if attempt > 0 {
                    info!("reconnected successfully after {attempt} attempt(s)");
                }
                attempt = 0;
                shared.reconnect_attempts.store(0, Ordering::Relaxed);
                shared.set_state(ConnectionState::Connected).await;

                match pump_events(&shared, session.as_mut(), &mut stop_rx).await {
                    PumpExit::Stopped => {
                        session.close().await;
                        return;
                    }
                    PumpExit::Closed(reason) => {
                        warn!("transport closed unexpectedly: {reason}");
                    }
                }
            }
            Err(e) => report_connect_failure(&e),
        }

        shared.set_state(ConnectionState::Disconnected).await;

        let delay = reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        shared.reconnect_attempts.store(attempt, Ordering::Relaxed);
        warn!(
            "reconnection attempt {} in {:.1}s",
            attempt,
            delay.as_secs_f64()
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = &mut stop_rx => {
                info!("reconnection cancelled by disconnect request");
                return;
            }
        }
    }
}

/// Network faults are routine here; anything else points at configuration.
fn report_connect_failure(e: &PulseError) {
    if e.is_transport_fault() {
        warn!("connection attempt failed: {e}");
    } else {
        error!("connection attempt failed, retrying anyway: {e}");
    }
}

/// Forward events from a live session until it closes or a stop arrives.
///
/// Each event is handed off before the next read, so a slow consumer
/// throttles the transport rather than losing events.
async fn pump_events(
    shared: &Shared,
    session: &mut dyn TransportSession,
    stop_rx: &mut oneshot::Receiver<()>,
) -> PumpExit {
    loop {
        tokio::select! {
            next = session.next_event() => match next {
                Ok(Some(event)) => shared.forward(event).await,
                Ok(None) => return PumpExit::Closed("closed by peer".into()),
                Err(e) => return PumpExit::Closed(e.to_string()),
            },
            _ = &mut *stop_rx => return PumpExit::Stopped,
        }
    }
}
