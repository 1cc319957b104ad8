//! PulseWatch Services - telemetry state and event processing.
//!
//! This crate turns the socket event stream into application state:
//! - Data model for metrics, service health, alerts and operation progress
//! - Event normalization (unknown and malformed events are dropped here)
//! - Pure reducer over an immutable telemetry snapshot
//! - Single-writer state store with watch and observer subscriptions
//! - Session wiring that bridges the socket manager to the store

pub mod models;
pub mod normalizer;
pub mod state;
pub mod store;
pub mod session;

// Re-export key types
pub use models::{
    Alert, AlertSeverity, MemoryUsage, NewAlert, OperationProgress, ProgressUpdate,
    ServiceHealth, ServiceStatus, SystemMetrics,
};
pub use normalizer::{DomainEvent, EventNormalizer, NormalizerStats, Rejected};
pub use session::TelemetrySession;
pub use state::{StoreAction, TelemetrySnapshot};
pub use store::{Subscription, TelemetryStore};
