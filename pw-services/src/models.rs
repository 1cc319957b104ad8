//! Telemetry data model: metrics, service health, alerts, operation progress.
//!
//! Wire payload types (`*Payload`, [`NewAlert`], [`ProgressUpdate`]) are what
//! the server sends; the rest are what the state store holds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Memory usage as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used: f64,
    pub total: f64,
    pub percentage: f64,
}

/// Complete system metrics snapshot.
///
/// Every field is required on the wire: a partial payload is rejected
/// rather than merged with, or defaulted from, the previous snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// CPU utilization in percent.
    #[serde(alias = "cpuUsage")]
    pub cpu: f64,
    pub memory: MemoryUsage,
    /// Requests served.
    #[serde(alias = "requestCount")]
    pub requests: u64,
    /// Average response time in milliseconds.
    pub response_time: f64,
    #[serde(alias = "activeUsers")]
    pub active_sessions: u64,
    /// Uptime in seconds.
    pub uptime: f64,
}

/// Health status of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum ServiceStatus {
    Online,
    Warning,
    Offline,
}

impl TryFrom<String> for ServiceStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(Self::Online),
            "WARNING" => Ok(Self::Warning),
            "OFFLINE" => Ok(Self::Offline),
            _ => Err(format!("unknown service status: {value}")),
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Warning => write!(f, "WARNING"),
            Self::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// A timestamp as the backend may send it: epoch milliseconds or RFC 3339.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

impl WireTimestamp {
    fn resolve(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(ms).single(),
            Self::Text(ts) => Some(ts),
        }
    }
}

/// `service-health-update` entry as sent on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthPayload {
    pub name: String,
    pub status: ServiceStatus,
    #[serde(default)]
    pub response_time: Option<f64>,
    #[serde(default)]
    last_check: Option<WireTimestamp>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub connections: Option<u64>,
    #[serde(default)]
    pub errors: Option<u64>,
}

impl ServiceHealthPayload {
    /// Build the stored entry, using `received_at` when the payload carries
    /// no usable check time.
    pub fn into_health(self, received_at: DateTime<Utc>) -> ServiceHealth {
        ServiceHealth {
            name: self.name.trim().to_string(),
            status: self.status,
            response_time: self.response_time,
            last_check: self
                .last_check
                .and_then(WireTimestamp::resolve)
                .unwrap_or(received_at),
            version: self.version,
            connections: self.connections,
            errors: self.errors,
        }
    }
}

/// Health entry for one named service. `name` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub response_time: Option<f64>,
    pub last_check: DateTime<Utc>,
    pub version: Option<String>,
    pub connections: Option<u64>,
    pub errors: Option<u64>,
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl TryFrom<String> for AlertSeverity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "WARNING" => Ok(Self::Warning),
            "INFO" => Ok(Self::Info),
            _ => Err(format!("unknown alert severity: {value}")),
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::Warning => write!(f, "WARNING"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

/// `alert` payload. The producer never supplies id, time or ack state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewAlert {
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// An alert as held in the alert log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// `operation-progress` / `search-progress` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub current: u64,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub done: bool,
}

/// Progress of one in-flight operator or search task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProgress {
    pub id: String,
    pub label: String,
    pub current: u64,
    pub total: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl OperationProgress {
    /// Completion ratio in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.current as f64 / total as f64).clamp(0.0, 1.0)),
        }
    }
}
