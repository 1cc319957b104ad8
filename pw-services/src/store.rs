//! Telemetry state store.
//!
//! A single actor task owns the authoritative [`TelemetrySnapshot`]. Writes
//! are sent to it over a bounded channel and applied strictly in arrival
//! order. Each accepted change is published as a fresh `Arc` on a watch
//! channel and then handed to registered observers in registration order.
//! Reads never touch the actor.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace};

use pw_core::error::{PulseError, PulseResult};

use crate::state::{StoreAction, TelemetrySnapshot};

type Observer = Arc<dyn Fn(&Arc<TelemetrySnapshot>) + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: BTreeMap<u64, Observer>,
}

type SharedObservers = Arc<Mutex<ObserverList>>;

fn lock(observers: &Mutex<ObserverList>) -> MutexGuard<'_, ObserverList> {
    // Observers run outside the lock, so poisoning leaves the list intact.
    observers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct StoreCommand {
    action: StoreAction,
    ack: oneshot::Sender<bool>,
}

/// Handle to the state store. Cheap to clone.
#[derive(Clone)]
pub struct TelemetryStore {
    commands: mpsc::Sender<StoreCommand>,
    snapshot_rx: watch::Receiver<Arc<TelemetrySnapshot>>,
    observers: SharedObservers,
}

impl TelemetryStore {
    /// Spawn the store actor on the current tokio runtime.
    pub fn spawn(command_buffer: usize) -> Self {
        let (commands, command_rx) = mpsc::channel(command_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(TelemetrySnapshot::default()));
        let observers = SharedObservers::default();

        tokio::spawn(run_store(command_rx, snapshot_tx, observers.clone()));

        Self {
            commands,
            snapshot_rx,
            observers,
        }
    }

    /// The current snapshot. Never blocks on the actor.
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// A watch receiver that yields every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<TelemetrySnapshot>> {
        self.snapshot_rx.clone()
    }

    /// Register an observer called with each new snapshot.
    ///
    /// Observers run synchronously on the store task after every accepted
    /// change, in registration order, and must not block. The returned
    /// handle unregisters the observer when dropped.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Arc<TelemetrySnapshot>) + Send + Sync + 'static,
    {
        let mut list = lock(&self.observers);
        list.next_id += 1;
        let id = list.next_id;
        list.entries.insert(id, Arc::new(observer));
        debug!("store observer {id} registered");

        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Number of registered observers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.observers).entries.len()
    }

    /// Apply an action. Resolves once the action has been reduced and, if
    /// it changed anything, published. Returns whether the state changed.
    pub async fn apply(&self, action: StoreAction) -> PulseResult<bool> {
        let (ack, ack_rx) = oneshot::channel();
        self.commands
            .send(StoreCommand { action, ack })
            .await
            .map_err(|_| PulseError::StoreClosed)?;
        ack_rx.await.map_err(|_| PulseError::StoreClosed)
    }

    /// Mark an alert as acknowledged. Unknown or already acknowledged ids
    /// are a no-op and return `Ok(false)`.
    pub async fn acknowledge_alert(&self, id: &str) -> PulseResult<bool> {
        self.apply(StoreAction::AcknowledgeAlert(id.to_string()))
            .await
    }

    /// Empty the alert log.
    pub async fn clear_alerts(&self) -> PulseResult<bool> {
        self.apply(StoreAction::ClearAlerts).await
    }
}

/// Registration handle for a store observer.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<ObserverList>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister the observer. Same as dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            if lock(&observers).entries.remove(&self.id).is_some() {
                debug!("store observer {} unregistered", self.id);
            }
        }
    }
}

async fn run_store(
    mut commands: mpsc::Receiver<StoreCommand>,
    snapshot_tx: watch::Sender<Arc<TelemetrySnapshot>>,
    observers: SharedObservers,
) {
    let mut current = snapshot_tx.borrow().clone();

    while let Some(StoreCommand { action, ack }) = commands.recv().await {
        let changed = match current.reduce(&action) {
            Some(next) => {
                current = Arc::new(next);
                snapshot_tx.send_replace(current.clone());
                notify(&observers, &current);
                trace!("store applied {}", action.label());
                true
            }
            None => {
                trace!("store ignored no-op {}", action.label());
                false
            }
        };
        // The caller may have stopped waiting; the change stands regardless.
        let _ = ack.send(changed);
    }

    debug!("state store stopped");
}

fn notify(observers: &Mutex<ObserverList>, snapshot: &Arc<TelemetrySnapshot>) {
    // Snapshot the list so observers can (un)subscribe from inside a callback.
    let callbacks: Vec<(u64, Observer)> = lock(observers)
        .entries
        .iter()
        .map(|(id, cb)| (*id, cb.clone()))
        .collect();

    for (id, callback) in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            error!("store observer {id} panicked");
        }
    }
}
