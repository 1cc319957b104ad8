//! Event normalizer.
//!
//! Turns raw [`SocketEvent`]s into typed [`DomainEvent`]s. Unknown event
//! names and payloads that fail validation are rejected here so the state
//! store only ever sees well-formed input.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use pw_socket::{ConnectionState, SocketEvent, SocketEventType};

use crate::models::{NewAlert, ProgressUpdate, ServiceHealth, ServiceHealthPayload, SystemMetrics};

/// A validated, typed event ready to be applied to the state store.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A complete metrics snapshot replaced the previous one.
    MetricsUpdated {
        metrics: SystemMetrics,
        received_at: DateTime<Utc>,
    },
    /// One or more service health entries to merge by name. Never empty.
    ServiceHealthUpdated(Vec<ServiceHealth>),
    /// A new alert to prepend to the alert log.
    AlertRaised {
        alert: NewAlert,
        received_at: DateTime<Utc>,
    },
    /// The transport changed state.
    ConnectionChanged(ConnectionState),
    /// An operation reported progress or completion.
    ProgressUpdated {
        progress: ProgressUpdate,
        received_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MetricsUpdated { .. } => "MetricsUpdated",
            Self::ServiceHealthUpdated(_) => "ServiceHealthUpdated",
            Self::AlertRaised { .. } => "AlertRaised",
            Self::ConnectionChanged(_) => "ConnectionChanged",
            Self::ProgressUpdated { .. } => "ProgressUpdated",
        }
    }
}

/// Why a raw event did not produce a [`DomainEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("unknown event: {0}")]
    Unknown(String),

    #[error("malformed {event} payload: {reason}")]
    Malformed { event: String, reason: String },
}

impl Rejected {
    fn malformed(event: &SocketEventType, reason: impl Into<String>) -> Self {
        Self::Malformed {
            event: event.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

/// Counters of normalizer outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizerStats {
    pub accepted: u64,
    pub unknown: u64,
    pub malformed: u64,
}

/// Stateless validator with outcome counters.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    accepted: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize an event, logging and counting rejections.
    ///
    /// Unknown names are logged at debug level, malformed payloads at warn.
    pub fn normalize(&self, event: &SocketEvent, received_at: DateTime<Utc>) -> Option<DomainEvent> {
        match Self::try_normalize(event, received_at) {
            Ok(domain) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Some(domain)
            }
            Err(Rejected::Unknown(name)) => {
                self.unknown.fetch_add(1, Ordering::Relaxed);
                debug!("ignoring unknown event: {name}");
                None
            }
            Err(rejected) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("dropping event: {rejected}");
                None
            }
        }
    }

    /// Validate an event without side effects.
    pub fn try_normalize(
        event: &SocketEvent,
        received_at: DateTime<Utc>,
    ) -> Result<DomainEvent, Rejected> {
        let event_type = &event.event_type;
        match event_type {
            SocketEventType::Connect => Ok(DomainEvent::ConnectionChanged(ConnectionState::Connected)),
            SocketEventType::Connecting => {
                Ok(DomainEvent::ConnectionChanged(ConnectionState::Connecting))
            }
            SocketEventType::Disconnect => {
                Ok(DomainEvent::ConnectionChanged(ConnectionState::Disconnected))
            }
            SocketEventType::MetricsUpdate => {
                let metrics: SystemMetrics = parse(event_type, &event.data)?;
                Ok(DomainEvent::MetricsUpdated {
                    metrics,
                    received_at,
                })
            }
            SocketEventType::ServiceHealthUpdate => {
                let batch = parse_service_batch(event_type, &event.data, received_at)?;
                Ok(DomainEvent::ServiceHealthUpdated(batch))
            }
            SocketEventType::Alert => {
                let alert: NewAlert = parse(event_type, &event.data)?;
                if alert.title.trim().is_empty() {
                    return Err(Rejected::malformed(event_type, "alert title is empty"));
                }
                Ok(DomainEvent::AlertRaised { alert, received_at })
            }
            SocketEventType::OperationProgress => {
                let progress: ProgressUpdate = parse(event_type, &event.data)?;
                if progress.id.trim().is_empty() {
                    return Err(Rejected::malformed(event_type, "operation id is empty"));
                }
                Ok(DomainEvent::ProgressUpdated {
                    progress,
                    received_at,
                })
            }
            SocketEventType::Unknown(name) => Err(Rejected::Unknown(name.clone())),
        }
    }

    /// Current outcome counters.
    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

fn parse<'a, T: Deserialize<'a>>(event_type: &SocketEventType, data: &'a Value) -> Result<T, Rejected> {
    T::deserialize(data).map_err(|e| Rejected::malformed(event_type, e.to_string()))
}

/// A service health payload is a single object or an array of them. One bad
/// entry rejects the whole batch.
fn parse_service_batch(
    event_type: &SocketEventType,
    data: &Value,
    received_at: DateTime<Utc>,
) -> Result<Vec<ServiceHealth>, Rejected> {
    let entries: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![data],
        _ => {
            return Err(Rejected::malformed(
                event_type,
                "expected an object or an array of objects",
            ))
        }
    };
    if entries.is_empty() {
        return Err(Rejected::malformed(event_type, "empty batch"));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let payload: ServiceHealthPayload = parse(event_type, entry)?;
            if payload.name.trim().is_empty() {
                return Err(Rejected::malformed(
                    event_type,
                    format!("entry {index}: service name is empty"),
                ));
            }
            Ok(payload.into_health(received_at))
        })
        .collect()
}
