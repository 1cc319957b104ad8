//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "PulseWatch";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of alerts retained in the alert log.
pub const MAX_ALERTS: usize = 50;

/// Maximum number of in-flight operations tracked at once.
pub const MAX_TRACKED_OPERATIONS: usize = 20;

/// Default capacity of the socket event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the state store command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Default handshake timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Socket.IO endpoint path on the telemetry server.
pub const SOCKET_IO_PATH: &str = "/socket.io/";

/// Engine.IO protocol revision spoken by the transport.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Grace period for the connection task to wind down on disconnect.
pub const DISCONNECT_GRACE_MS: u64 = 2_000;

/// Wire event names understood by the normalizer.
pub mod events {
    pub const CONNECT: &str = "connect";
    pub const CONNECTING: &str = "connecting";
    pub const DISCONNECT: &str = "disconnect";
    pub const METRICS_UPDATE: &str = "metrics-update";
    pub const SERVICE_HEALTH_UPDATE: &str = "service-health-update";
    pub const ALERT: &str = "alert";
    pub const OPERATION_PROGRESS: &str = "operation-progress";
    pub const SEARCH_PROGRESS: &str = "search-progress";
}
