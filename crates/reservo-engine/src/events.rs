//! # Event Bus
//!
//! Fan-out of progress, error and clock events to any number of subscribers.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Event Bus                                    │
//! │                                                                         │
//! │  TargetSession ──┐                                                      │
//! │  TargetSession ──┼──► broadcast::Sender<EngineEvent> ──┬──► SSE stream  │
//! │  ClockSync     ──┤                                      ├──► listen(f)  │
//! │  Supervisor    ──┘                                      └──► tests      │
//! │                                                                         │
//! │  "progress"     - AutomationProgress snapshot                           │
//! │  "error"        - { storeId, message }                                  │
//! │  "time_sync"    - TimeSyncStatus (every poll, success or failure)       │
//! │  "run_started"  - { runId, storeIds }                                   │
//! │  "run_finished" - { runId, verdict }                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Producers never block and never fail because nobody is listening. A
//! subscriber that falls behind loses the oldest events, not the newest.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use reservo_core::{AutomationProgress, RunVerdict, TimeSyncStatus};

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// =============================================================================
// Engine Events
// =============================================================================

/// Everything the engine reports to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A store's progress changed.
    Progress(AutomationProgress),

    /// A session failed or a supervisor-level problem occurred.
    #[serde(rename_all = "camelCase")]
    Error {
        store_id: Option<String>,
        message: String,
    },

    /// The clock service completed a poll.
    TimeSync(TimeSyncStatus),

    /// A run began.
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: Uuid, store_ids: Vec<String> },

    /// A run ended.
    #[serde(rename_all = "camelCase")]
    RunFinished { run_id: Uuid, verdict: RunVerdict },
}

impl EngineEvent {
    /// Event name used on the SSE wire.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Progress(_) => "progress",
            EngineEvent::Error { .. } => "error",
            EngineEvent::TimeSync(_) => "time_sync",
            EngineEvent::RunStarted { .. } => "run_started",
            EngineEvent::RunFinished { .. } => "run_finished",
        }
    }

    /// Store this event is about, if any.
    pub fn store_id(&self) -> Option<&str> {
        match self {
            EngineEvent::Progress(p) => Some(&p.store_id),
            EngineEvent::Error { store_id, .. } => store_id.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Cloneable publisher/subscriber hub.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Publishes an event. Returns the number of subscribers reached.
    pub fn emit(&self, event: EngineEvent) -> usize {
        // Err only means there are no receivers.
        self.tx.send(event).unwrap_or(0)
    }

    /// Publishes a progress snapshot.
    pub fn progress(&self, progress: AutomationProgress) {
        self.emit(EngineEvent::Progress(progress));
    }

    /// Publishes an error.
    pub fn error(&self, store_id: Option<&str>, message: impl Into<String>) {
        self.emit(EngineEvent::Error {
            store_id: store_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Returns a raw receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Runs `listener` for every event until the returned [`Subscription`]
    /// is dropped or cancelled.
    pub fn listen<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(EngineEvent) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => listener(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged, dropping oldest events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed, listener exiting");
                        break;
                    }
                }
            }
        });
        Subscription::from_task(task)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Guard for a listener registered with [`EventBus::listen`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn from_task(task: JoinHandle<()>) -> Self {
        Subscription { task: Some(task) }
    }

    /// Unsubscribes now.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}
