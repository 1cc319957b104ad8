//! PulseWatch Socket - Socket.IO client for real-time telemetry streaming.
//!
//! This crate provides the connection manager that handles:
//! - Real-time event streaming from the telemetry server
//! - Automatic reconnection with exponential backoff and jitter
//! - Engine.IO heartbeat supervision
//! - Connection lifecycle events on the same ordered stream as data
//! - Event dispatching: a lossless bounded queue for the state store plus
//!   a broadcast ring for raw observers
//! - Server URL change without rebuilding the manager

pub mod events;
pub mod manager;
pub mod transport;

// Re-export key types
pub use events::{ConnectionState, EventDispatcher, SocketEvent, SocketEventType};
pub use manager::{ReconnectConfig, SocketManager};
pub use transport::{RawEvent, Transport, TransportSession, WebSocketTransport};
