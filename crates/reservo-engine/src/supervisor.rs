//! # Automation Supervisor
//!
//! Owns the set of active sessions, runs them concurrently and answers
//! questions about them.
//!
//! ## Run Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       AutomationSupervisor                              │
//! │                                                                         │
//! │  start(selection) ─┬─ run active? ──yes──► join, await its report       │
//! │                    │                                                    │
//! │                    └─ no ──► resolve stores (enabled ∩ selection)       │
//! │                               │                                         │
//! │                               ▼                                         │
//! │              ┌────────────────────────────────┐                         │
//! │              │ ActiveRun                      │   stop() cancels the    │
//! │              │  run_id, CancellationToken ────┼── run token; children   │
//! │              │  sessions: id → SessionHandle  │   see it everywhere     │
//! │              └───────────────┬────────────────┘                         │
//! │                              │ tokio::spawn per store                   │
//! │             ┌────────────────┼────────────────┐                         │
//! │             ▼                ▼                ▼                         │
//! │        TargetSession    TargetSession    TargetSession                  │
//! │        (+ restarts)     (+ restarts)     (+ restarts)                   │
//! │             └────────────────┼────────────────┘                         │
//! │                              ▼                                          │
//! │                 RunReport { verdict, results } ──► last_run             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Isolation
//! One store's failure never touches its siblings. The run is reported as
//! failed only when no store succeeded and at least one failed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reservo_core::{
    AggregateProgress, AutomationProgress, AutomationResult, ReservationStatus, RunVerdict,
    StoreConfig,
};

use crate::clock::ClockSyncService;
use crate::config::EngineConfig;
use crate::driver::PageDriverFactory;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::session::{SessionContext, SessionHandle, TargetSession};

// =============================================================================
// Public Types
// =============================================================================

/// Final report of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub verdict: RunVerdict,
    /// False only when the whole run failed.
    pub success: bool,
    pub results: Vec<AutomationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Returned by [`AutomationSupervisor::launch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTicket {
    pub run_id: Uuid,
    pub store_ids: Vec<String>,
}

/// Returned by [`AutomationSupervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSummary {
    /// Sessions that were still live and have been signalled.
    pub cancelled: usize,
    /// Sessions that had already reached a terminal status.
    pub already_done: usize,
    /// True when there was nothing to stop.
    pub already_stopped: bool,
}

// =============================================================================
// Internal State
// =============================================================================

struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
    /// Store IDs in scheduling order.
    order: Vec<String>,
    sessions: HashMap<String, SessionHandle>,
    stopped: bool,
    report_rx: watch::Receiver<Option<RunReport>>,
}

impl ActiveRun {
    fn snapshots(&self) -> Vec<AutomationProgress> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(SessionHandle::progress)
            .collect()
    }
}

struct LastRun {
    report: RunReport,
    snapshots: Vec<AutomationProgress>,
}

#[derive(Default)]
struct SupervisorState {
    active: Option<ActiveRun>,
    last_run: Option<LastRun>,
}

// =============================================================================
// Automation Supervisor
// =============================================================================

/// Cloneable front door to the engine.
#[derive(Clone)]
pub struct AutomationSupervisor {
    config: Arc<EngineConfig>,
    ctx: SessionContext,
    state: Arc<Mutex<SupervisorState>>,
}

impl AutomationSupervisor {
    pub fn new(
        config: EngineConfig,
        clock: ClockSyncService,
        events: EventBus,
        drivers: Arc<dyn PageDriverFactory>,
    ) -> Self {
        let ctx = SessionContext {
            settings: Arc::new(config.session.clone()),
            profile: Arc::new(config.profile.clone()),
            clock,
            events,
            drivers,
        };
        AutomationSupervisor {
            config: Arc::new(config),
            ctx,
            state: Arc::new(Mutex::new(SupervisorState::default())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &ClockSyncService {
        &self.ctx.clock
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Report of the most recently finished run.
    pub async fn last_run(&self) -> Option<RunReport> {
        self.state.lock().await.last_run.as_ref().map(|r| r.report.clone())
    }

    /// Runs one session per enabled (and selected) store and waits for all
    /// of them.
    ///
    /// If a run is already active this joins it and returns its report; the
    /// selection of the joining call is ignored.
    pub async fn start(&self, selected: Option<Vec<String>>) -> EngineResult<RunReport> {
        let report_rx = {
            let mut state = self.state.lock().await;
            match state.active.as_ref() {
                Some(active) => {
                    info!(run_id = %active.run_id, "Run already active, joining");
                    active.report_rx.clone()
                }
                None => self.begin_run(&mut state, selected)?.1,
            }
        };
        await_report(report_rx).await
    }

    /// Waits for the active run, if any, and returns the latest report.
    pub async fn wait_idle(&self) -> Option<RunReport> {
        let report_rx = {
            let state = self.state.lock().await;
            match state.active.as_ref() {
                Some(active) => active.report_rx.clone(),
                None => return state.last_run.as_ref().map(|r| r.report.clone()),
            }
        };
        await_report(report_rx).await.ok()
    }

    /// Starts a run in the background and returns immediately.
    pub async fn launch(&self, selected: Option<Vec<String>>) -> EngineResult<RunTicket> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let (ticket, _) = self.begin_run(&mut state, selected)?;
        Ok(ticket)
    }

    /// Cancels every live session of the active run. Does not wait for the
    /// sessions to wind down.
    pub async fn stop(&self) -> StopSummary {
        let mut state = self.state.lock().await;
        let Some(active) = state.active.as_mut() else {
            debug!("Stop requested with no active run");
            return StopSummary {
                already_stopped: true,
                ..Default::default()
            };
        };
        if active.stopped {
            return StopSummary {
                already_stopped: true,
                ..Default::default()
            };
        }

        let mut summary = StopSummary::default();
        for handle in active.sessions.values() {
            if handle.status().is_terminal() {
                summary.already_done += 1;
            } else {
                summary.cancelled += 1;
            }
        }
        active.stopped = true;
        active.cancel.cancel();

        info!(
            run_id = %active.run_id,
            cancelled = summary.cancelled,
            already_done = summary.already_done,
            "Run stop requested"
        );
        summary
    }

    /// Delivers an auth confirmation to the session for `store_id`.
    pub async fn route_auth(&self, store_id: &str, payload: Value) -> EngineResult<()> {
        let handle = {
            let state = self.state.lock().await;
            state
                .active
                .as_ref()
                .and_then(|active| active.sessions.get(store_id))
                .cloned()
                .ok_or_else(|| EngineError::NotFound(store_id.to_string()))?
        };
        handle.handle_auth(payload)?;
        info!(store_id, "Auth routed to session");
        Ok(())
    }

    /// Progress of the active run, or of the last finished run when idle.
    pub async fn aggregate_progress(&self) -> AggregateProgress {
        let state = self.state.lock().await;
        let snapshots = match (&state.active, &state.last_run) {
            (Some(active), _) => active.snapshots(),
            (None, Some(last)) => last.snapshots.clone(),
            (None, None) => Vec::new(),
        };
        AggregateProgress::from_snapshots(snapshots)
    }

    // =========================================================================
    // Run Management
    // =========================================================================

    fn resolve_stores(&self, selected: Option<Vec<String>>) -> EngineResult<Vec<StoreConfig>> {
        let enabled = self.config.enabled_stores();
        let stores = match selected {
            None => enabled,
            Some(ids) => {
                for id in &ids {
                    if !self.config.stores.iter().any(|s| &s.id == id) {
                        return Err(EngineError::NotFound(id.clone()));
                    }
                }
                enabled.into_iter().filter(|s| ids.contains(&s.id)).collect()
            }
        };
        if stores.is_empty() {
            return Err(EngineError::NoStoresSelected);
        }
        Ok(stores)
    }

    /// Creates the sessions and spawns the run. Caller holds the state lock.
    fn begin_run(
        &self,
        state: &mut SupervisorState,
        selected: Option<Vec<String>>,
    ) -> EngineResult<(RunTicket, watch::Receiver<Option<RunReport>>)> {
        let stores = self.resolve_stores(selected)?;
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (report_tx, report_rx) = watch::channel(None);

        let clock_status = self.ctx.clock.current_status();
        if !self.ctx.clock.is_running() {
            warn!("Clock sync service is not running");
        }
        info!(
            %run_id,
            stores = stores.len(),
            offset_ms = clock_status.offset_ms,
            synced = clock_status.synced,
            "Starting automation run"
        );

        let mut sessions = HashMap::new();
        let mut pending = Vec::with_capacity(stores.len());
        for store in stores {
            let session = TargetSession::with_cancel(store.clone(), self.ctx.clone(), cancel.child_token());
            sessions.insert(store.id.clone(), session.handle());
            pending.push(session);
        }
        let order: Vec<String> = pending.iter().map(|s| s.store().id.clone()).collect();

        state.active = Some(ActiveRun {
            run_id,
            cancel: cancel.clone(),
            order: order.clone(),
            sessions,
            stopped: false,
            report_rx: report_rx.clone(),
        });

        self.ctx.events.emit(EngineEvent::RunStarted {
            run_id,
            store_ids: order.clone(),
        });

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.drive_run(run_id, cancel, pending, report_tx).await;
        });

        Ok((
            RunTicket {
                run_id,
                store_ids: order,
            },
            report_rx,
        ))
    }

    async fn drive_run(
        self,
        run_id: Uuid,
        cancel: CancellationToken,
        sessions: Vec<TargetSession>,
        report_tx: watch::Sender<Option<RunReport>>,
    ) {
        let started_at = Utc::now();

        let tasks: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                let handle = session.handle();
                let supervisor = self.clone();
                let cancel = cancel.clone();
                let task = tokio::spawn(async move { supervisor.run_store(run_id, cancel, session).await });
                (handle, task)
            })
            .collect();

        let mut snapshots = Vec::with_capacity(tasks.len());
        for (handle, task) in tasks {
            match task.await {
                Ok(progress) => snapshots.push(progress),
                Err(e) => {
                    error!(store_id = %handle.store_id(), error = %e, "Session task aborted");
                    let mut progress = handle.progress();
                    if !progress.status.is_terminal() {
                        progress.status = ReservationStatus::Failed;
                        progress.error = Some(format!("session task aborted: {}", e));
                    }
                    snapshots.push(progress);
                }
            }
        }

        let results: Vec<AutomationResult> = snapshots.iter().map(AutomationResult::from_progress).collect();
        let verdict = RunVerdict::from_results(&results);
        let report = RunReport {
            run_id,
            verdict,
            success: verdict.is_success(),
            results,
            started_at,
            finished_at: Utc::now(),
        };

        {
            let mut state = self.state.lock().await;
            if state.active.as_ref().map(|a| a.run_id) == Some(run_id) {
                state.active = None;
            }
            state.last_run = Some(LastRun {
                report: report.clone(),
                snapshots,
            });
        }

        info!(%run_id, ?verdict, "Automation run finished");
        self.ctx.events.emit(EngineEvent::RunFinished { run_id, verdict });
        report_tx.send_replace(Some(report));
    }

    /// Runs one store, starting fresh sessions after retryable failures up
    /// to `max_restarts` times.
    async fn run_store(
        self,
        run_id: Uuid,
        cancel: CancellationToken,
        mut session: TargetSession,
    ) -> AutomationProgress {
        let max_restarts = self.config.supervisor.max_restarts;
        let mut restarts = 0;

        loop {
            let outcome = match session.initialize().await {
                Ok(()) => session.start().await,
                Err(e) => Err(e),
            };

            let retry = match &outcome {
                Err(e) => e.is_retryable() && restarts < max_restarts && !cancel.is_cancelled(),
                Ok(()) => false,
            };
            if !retry {
                return session.progress();
            }

            let mut state = self.state.lock().await;
            let Some(active) = state.active.as_mut().filter(|a| a.run_id == run_id) else {
                return session.progress();
            };

            restarts += 1;
            let store = session.store().clone();
            warn!(
                store_id = %store.id,
                attempt = restarts,
                max_restarts,
                "Restarting session after failure"
            );

            let next = TargetSession::with_cancel(store.clone(), self.ctx.clone(), cancel.child_token());
            active.sessions.insert(store.id, next.handle());
            drop(state);
            session = next;
        }
    }
}

async fn await_report(mut rx: watch::Receiver<Option<RunReport>>) -> EngineResult<RunReport> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(report) = current {
            return Ok(report);
        }
        rx.changed()
            .await
            .map_err(|_| EngineError::ChannelError("run ended without a report".into()))?;
    }
}
