//! Telemetry snapshot and its reducer.
//!
//! [`TelemetrySnapshot::reduce`] is a pure function: it never mutates the
//! current snapshot and returns `None` when an action changes nothing, so a
//! store can keep handing out the same `Arc` until something actually moves.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pw_core::constants::{MAX_ALERTS, MAX_TRACKED_OPERATIONS};
use pw_socket::ConnectionState;

use crate::models::{
    Alert, NewAlert, OperationProgress, ProgressUpdate, ServiceHealth, ServiceStatus,
    SystemMetrics,
};
use crate::normalizer::DomainEvent;

/// Everything the client knows about the backend at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Latest complete metrics snapshot.
    pub metrics: Option<SystemMetrics>,
    /// When `metrics` was received.
    pub last_update: Option<DateTime<Utc>>,
    /// Service health, unique by name, in first-seen order.
    pub services: Vec<ServiceHealth>,
    /// Alert log, most recent first, at most `MAX_ALERTS` entries.
    pub alerts: Vec<Alert>,
    /// In-flight operations, in first-seen order.
    pub operations: Vec<OperationProgress>,
    pub connection: ConnectionState,
    #[serde(skip)]
    next_alert_seq: u64,
}

/// A mutation request for the state store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    Apply(DomainEvent),
    AcknowledgeAlert(String),
    ClearAlerts,
}

impl StoreAction {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Apply(event) => event.label(),
            Self::AcknowledgeAlert(_) => "AcknowledgeAlert",
            Self::ClearAlerts => "ClearAlerts",
        }
    }
}

impl From<DomainEvent> for StoreAction {
    fn from(event: DomainEvent) -> Self {
        Self::Apply(event)
    }
}

impl TelemetrySnapshot {
    /// Compute the snapshot that results from `action`, or `None` if the
    /// action is a no-op.
    pub fn reduce(&self, action: &StoreAction) -> Option<Self> {
        match action {
            StoreAction::Apply(event) => self.reduce_event(event),
            StoreAction::AcknowledgeAlert(id) => {
                let index = self
                    .alerts
                    .iter()
                    .position(|alert| alert.id == *id && !alert.acknowledged)?;
                let mut next = self.clone();
                next.alerts[index].acknowledged = true;
                Some(next)
            }
            StoreAction::ClearAlerts => {
                if self.alerts.is_empty() {
                    return None;
                }
                let mut next = self.clone();
                next.alerts.clear();
                Some(next)
            }
        }
    }

    fn reduce_event(&self, event: &DomainEvent) -> Option<Self> {
        match event {
            DomainEvent::MetricsUpdated {
                metrics,
                received_at,
            } => {
                let mut next = self.clone();
                next.metrics = Some(metrics.clone());
                next.last_update = Some(*received_at);
                Some(next)
            }
            DomainEvent::ServiceHealthUpdated(batch) => {
                if batch.is_empty() {
                    return None;
                }
                let mut next = self.clone();
                for entry in batch {
                    merge_service(&mut next.services, entry);
                }
                Some(next)
            }
            DomainEvent::AlertRaised { alert, received_at } => {
                let mut next = self.clone();
                next.push_alert(alert, *received_at);
                Some(next)
            }
            DomainEvent::ConnectionChanged(state) => {
                if self.connection == *state {
                    return None;
                }
                let mut next = self.clone();
                next.connection = *state;
                Some(next)
            }
            DomainEvent::ProgressUpdated {
                progress,
                received_at,
            } => self.reduce_progress(progress, *received_at),
        }
    }

    fn push_alert(&mut self, alert: &NewAlert, created_at: DateTime<Utc>) {
        self.next_alert_seq += 1;
        self.alerts.insert(
            0,
            Alert {
                id: format!("alert-{}", self.next_alert_seq),
                severity: alert.severity,
                title: alert.title.clone(),
                message: alert.message.clone(),
                source: alert.source.clone(),
                created_at,
                acknowledged: false,
            },
        );
        self.alerts.truncate(MAX_ALERTS);
    }

    fn reduce_progress(&self, update: &ProgressUpdate, received_at: DateTime<Utc>) -> Option<Self> {
        let existing = self.operations.iter().position(|op| op.id == update.id);

        if update.done {
            let index = existing?;
            let mut next = self.clone();
            next.operations.remove(index);
            return Some(next);
        }

        let mut next = self.clone();
        match existing {
            Some(index) => {
                let op = &mut next.operations[index];
                if let Some(label) = &update.label {
                    op.label = label.clone();
                }
                op.current = update.current;
                op.total = update.total;
                op.updated_at = received_at;
            }
            None => {
                next.operations.push(OperationProgress {
                    id: update.id.clone(),
                    label: update.label.clone().unwrap_or_else(|| update.id.clone()),
                    current: update.current,
                    total: update.total,
                    updated_at: received_at,
                });
                if next.operations.len() > MAX_TRACKED_OPERATIONS {
                    evict_stalest(&mut next.operations);
                }
            }
        }
        Some(next)
    }

    /// Health entry for a service, by name.
    pub fn service(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Services currently reporting `status`.
    pub fn services_with_status(&self, status: ServiceStatus) -> impl Iterator<Item = &ServiceHealth> {
        self.services.iter().filter(move |s| s.status == status)
    }

    pub fn unacknowledged_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| !a.acknowledged)
    }

    pub fn operation(&self, id: &str) -> Option<&OperationProgress> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

/// Replace the entry with the same name in place, or append it.
fn merge_service(services: &mut Vec<ServiceHealth>, entry: &ServiceHealth) {
    match services.iter_mut().find(|s| s.name == entry.name) {
        Some(existing) => *existing = entry.clone(),
        None => services.push(entry.clone()),
    }
}

/// Drop the least recently updated operation, excluding the newest entry.
fn evict_stalest(operations: &mut Vec<OperationProgress>) {
    let candidates = operations.len().saturating_sub(1);
    if let Some((index, _)) = operations[..candidates]
        .iter()
        .enumerate()
        .min_by_key(|(_, op)| op.updated_at)
    {
        operations.remove(index);
    }
}
