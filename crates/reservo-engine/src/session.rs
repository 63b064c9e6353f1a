//! # Target Session
//!
//! One reservation attempt against one store. Owns the stage machine and the
//! page driver, and exposes a cloneable [`SessionHandle`] for outside control.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         TargetSession                                   │
//! │                                                                         │
//! │  idle ──initialize()──► ready ──start()──► processing                   │
//! │   │        │                                   │                        │
//! │   │        └─ driver error ──► failed          ├─ per stage:            │
//! │   │                                            │   [time gate]          │
//! │   │                                            │   page steps           │
//! │   │                                            │   advance              │
//! │   │                                            │                        │
//! │   │                      pass_auth ──► waiting_auth                     │
//! │   │                                      │  handle_auth() → form        │
//! │   │                                      │  auth timeout  → failed      │
//! │   │                                      │  stop()        → cancelled   │
//! │   │                                                                     │
//! │   └── stop() on idle/terminal: no-op                                    │
//! │                                                                         │
//! │  The driver is closed on every exit path of start().                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Time Gate
//! Stages listed in `session.time_critical_stages` check the clock first.
//! With `sync_policy = "defer"` an unsynced clock puts the session in
//! `waiting` until a synced poll arrives or `sync_wait_ms` elapses; past the
//! deadline (or with `proceed`) the session continues and records the
//! `degraded-sync` warning. If the store has `opens_at`, the session then
//! sleeps until that instant on the corrected clock.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reservo_core::{
    steps_for_stage, AutomationProgress, ReservationProfile, ReservationStage, ReservationStatus,
    StoreConfig, StoreProcess, DEGRADED_SYNC_WARNING,
};

use crate::clock::{ClockSyncService, SyncWait};
use crate::config::{SessionSettings, SyncPolicy};
use crate::driver::{execute_step, PageDriver, PageDriverFactory};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;

// =============================================================================
// Session Context
// =============================================================================

/// Collaborators shared by every session of a run.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: Arc<SessionSettings>,
    pub profile: Arc<ReservationProfile>,
    pub clock: ClockSyncService,
    pub events: EventBus,
    pub drivers: Arc<dyn PageDriverFactory>,
}

// =============================================================================
// Shared State
// =============================================================================

struct SessionShared {
    store_name: String,
    process: Mutex<StoreProcess>,
    cancel: CancellationToken,
    /// Present only while the session waits at `pass_auth`.
    auth_tx: Mutex<Option<oneshot::Sender<Value>>>,
    events: EventBus,
}

impl SessionShared {
    fn process(&self) -> MutexGuard<'_, StoreProcess> {
        match self.process.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn auth_slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<Value>>> {
        match self.auth_tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn snapshot(&self) -> AutomationProgress {
        AutomationProgress::from_process(&self.process(), self.store_name.clone())
    }

    /// Mutates the process and publishes the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut StoreProcess) -> R) -> R {
        let (result, snapshot) = {
            let mut process = self.process();
            let result = f(&mut process);
            let snapshot = AutomationProgress::from_process(&process, self.store_name.clone());
            (result, snapshot)
        };
        self.events.progress(snapshot);
        result
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// Cloneable control handle for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn store_id(&self) -> String {
        self.shared.process().store_id.clone()
    }

    /// Read-only snapshot.
    pub fn progress(&self) -> AutomationProgress {
        self.shared.snapshot()
    }

    pub fn status(&self) -> ReservationStatus {
        self.shared.process().status
    }

    /// Requests cancellation.
    ///
    /// Returns `Ok(false)` without touching anything when the session is idle
    /// or already terminal.
    pub fn stop(&self) -> EngineResult<bool> {
        let status = self.status();
        if status.is_terminal() || status == ReservationStatus::Idle {
            debug!(store_id = %self.store_id(), %status, "Stop ignored");
            return Ok(false);
        }

        self.shared.cancel.cancel();
        if status == ReservationStatus::Ready {
            // No stage loop is running yet to record the cancellation.
            let _ = self.shared.update(|p| p.cancel());
        }
        info!(store_id = %self.store_id(), "Session stop requested");
        Ok(true)
    }

    /// Delivers an external auth confirmation.
    ///
    /// Only valid while `waiting_auth`; otherwise returns `InvalidState`
    /// and changes nothing.
    pub fn handle_auth(&self, payload: Value) -> EngineResult<()> {
        let process = self.shared.process();
        let invalid = |status| EngineError::InvalidState {
            store_id: process.store_id.clone(),
            status,
            expected: ReservationStatus::WaitingAuth,
        };

        if process.status != ReservationStatus::WaitingAuth {
            return Err(invalid(process.status));
        }
        let tx = self.shared.auth_slot().take().ok_or_else(|| invalid(process.status))?;
        tx.send(payload).map_err(|_| invalid(process.status))?;

        debug!(store_id = %process.store_id, "Auth confirmation delivered");
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

// =============================================================================
// Target Session
// =============================================================================

/// Drives one store through the reservation stages.
pub struct TargetSession {
    store: StoreConfig,
    ctx: SessionContext,
    shared: Arc<SessionShared>,
    driver: Option<Box<dyn PageDriver>>,
}

impl TargetSession {
    pub fn new(store: StoreConfig, ctx: SessionContext) -> Self {
        Self::with_cancel(store, ctx, CancellationToken::new())
    }

    /// Creates a session that is also cancelled when `cancel` is.
    pub fn with_cancel(store: StoreConfig, ctx: SessionContext, cancel: CancellationToken) -> Self {
        let shared = Arc::new(SessionShared {
            store_name: store.name.clone(),
            process: Mutex::new(StoreProcess::new(store.id.clone())),
            cancel,
            auth_tx: Mutex::new(None),
            events: ctx.events.clone(),
        });
        TargetSession {
            store,
            ctx,
            shared,
            driver: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn progress(&self) -> AutomationProgress {
        self.shared.snapshot()
    }

    pub fn stop(&self) -> EngineResult<bool> {
        self.handle().stop()
    }

    pub fn handle_auth(&self, payload: Value) -> EngineResult<()> {
        self.handle().handle_auth(payload)
    }

    fn invalid_state(&self, expected: ReservationStatus) -> EngineError {
        EngineError::InvalidState {
            store_id: self.store.id.clone(),
            status: self.shared.process().status,
            expected,
        }
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Acquires the page driver: idle → ready.
    pub async fn initialize(&mut self) -> EngineResult<()> {
        if self.shared.process().status != ReservationStatus::Idle {
            return Err(self.invalid_state(ReservationStatus::Idle));
        }

        let timeout = self.ctx.settings.driver_timeout();
        let created = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(EngineError::Cancelled),
            created = tokio::time::timeout(timeout, self.ctx.drivers.create(&self.store)) => match created {
                Ok(result) => result,
                Err(_) => Err(EngineError::Internal(format!(
                    "driver start timed out after {}ms",
                    timeout.as_millis()
                ))),
            },
        };

        match created {
            Ok(driver) => {
                self.driver = Some(driver);
                self.shared.update(|p| p.set_status(ReservationStatus::Ready))?;
                debug!(store_id = %self.store.id, "Page driver acquired");
                Ok(())
            }
            Err(EngineError::Cancelled) => {
                let _ = self.shared.update(|p| p.cancel());
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                let err = EngineError::InitializationFailure {
                    store_id: self.store.id.clone(),
                    message: e.to_string(),
                };
                let _ = self.shared.update(|p| p.fail(err.to_string()));
                self.ctx.events.error(Some(&self.store.id), err.to_string());
                warn!(store_id = %self.store.id, error = %err, "Session initialization failed");
                Err(err)
            }
        }
    }

    /// Runs the stage loop to a terminal status: ready → … → success.
    ///
    /// Returns `Ok(())` on success and the failure or `Cancelled` otherwise;
    /// either way the outcome is also recorded in the process.
    pub async fn start(&mut self) -> EngineResult<()> {
        let status = self.shared.process().status;
        if status == ReservationStatus::Cancelled {
            self.release_driver().await;
            return Err(EngineError::Cancelled);
        }
        if status != ReservationStatus::Ready {
            return Err(self.invalid_state(ReservationStatus::Ready));
        }
        let Some(mut driver) = self.driver.take() else {
            return Err(EngineError::Internal("session has no page driver".into()));
        };

        info!(store_id = %self.store.id, store = %self.store.name, "Session started");
        let outcome = self.run_stages(driver.as_mut()).await;

        if let Err(e) = driver.close().await {
            warn!(store_id = %self.store.id, error = %e, "Failed to close page driver");
        }

        self.finish(outcome)
    }

    async fn release_driver(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            if let Err(e) = driver.close().await {
                warn!(store_id = %self.store.id, error = %e, "Failed to close page driver");
            }
        }
    }

    fn finish(&self, outcome: EngineResult<Option<String>>) -> EngineResult<()> {
        match outcome {
            Ok(result) => {
                self.shared.update(|p| p.complete(result.clone()))?;
                info!(store_id = %self.store.id, result = ?result, "Reservation complete");
                Ok(())
            }
            Err(EngineError::Cancelled) => {
                let _ = self.shared.update(|p| p.cancel());
                info!(store_id = %self.store.id, "Session cancelled");
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                let _ = self.shared.update(|p| p.fail(e.to_string()));
                self.ctx.events.error(Some(&self.store.id), e.to_string());
                warn!(store_id = %self.store.id, error = %e, "Session failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, driver: &mut dyn PageDriver) -> EngineResult<Option<String>> {
        self.shared.update(|p| p.set_status(ReservationStatus::Processing))?;
        let weights = self.ctx.settings.stage_weights;
        let mut result = None;

        loop {
            let stage = self.shared.process().stage;
            if stage.is_final() {
                break;
            }
            self.check_cancelled()?;

            if self.ctx.settings.is_time_critical(stage) {
                self.await_timing(stage).await?;
            }

            if let Some(captured) = self.run_actions(driver, stage).await? {
                result = Some(captured);
            }

            if stage == ReservationStage::PassAuth {
                self.await_auth().await?;
            }

            self.check_cancelled()?;
            let next = self.shared.update(|p| p.advance(&weights))?;
            debug!(store_id = %self.store.id, from = %stage, to = %next, "Stage advanced");
        }

        Ok(result)
    }

    async fn run_actions(
        &self,
        driver: &mut dyn PageDriver,
        stage: ReservationStage,
    ) -> EngineResult<Option<String>> {
        let steps = steps_for_stage(&self.store, &self.ctx.profile, stage);
        let timeout = self.ctx.settings.action_timeout();
        let mut captured = None;

        for step in &steps {
            let value = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Err(EngineError::Cancelled),
                value = execute_step(&mut *driver, stage, step, timeout) => value?,
            };
            if let Some(value) = value {
                captured = capture_text(value);
            }
        }

        Ok(captured)
    }

    async fn await_auth(&self) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        *self.shared.auth_slot() = Some(tx);
        self.shared.update(|p| p.set_status(ReservationStatus::WaitingAuth))?;
        info!(store_id = %self.store.id, "Waiting for PASS authentication");

        let timeout = self.ctx.settings.auth_timeout();
        let outcome = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(EngineError::Cancelled),
            received = tokio::time::timeout(timeout, rx) => match received {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(_)) => Err(EngineError::ChannelError("auth channel closed".into())),
                Err(_) => Err(EngineError::AuthTimeout),
            },
        };
        self.shared.auth_slot().take();

        let payload = outcome?;
        if payload.get("approved").and_then(Value::as_bool) == Some(false) {
            return Err(EngineError::stage(ReservationStage::PassAuth, "auth rejected"));
        }

        self.shared.update(|p| p.set_status(ReservationStatus::Processing))?;
        info!(store_id = %self.store.id, "Authentication confirmed");
        Ok(())
    }

    async fn await_timing(&self, stage: ReservationStage) -> EngineResult<()> {
        let clock = &self.ctx.clock;
        let mut trusted = clock.current_status().synced;

        if !trusted {
            if self.ctx.settings.sync_policy == SyncPolicy::Defer {
                self.shared.update(|p| p.set_status(ReservationStatus::Waiting))?;
                info!(store_id = %self.store.id, %stage, "Deferring until clock is synced");
                match clock
                    .wait_until_synced(self.ctx.settings.sync_wait(), &self.shared.cancel)
                    .await
                {
                    SyncWait::Synced => trusted = true,
                    SyncWait::TimedOut => {}
                    SyncWait::Cancelled => return Err(EngineError::Cancelled),
                }
            }
            if !trusted {
                warn!(store_id = %self.store.id, %stage, "Proceeding without a synced clock");
                self.shared.update(|p| p.warn(DEGRADED_SYNC_WARNING));
            }
        }

        if let Some(opens_at) = self.store.opens_at {
            // An untrusted offset is ignored in favour of the local clock.
            let target = if trusted {
                clock.current_status().to_local_time(opens_at)
            } else {
                opens_at
            };
            if let Ok(wait) = (target - Utc::now()).to_std() {
                if !wait.is_zero() {
                    self.shared.update(|p| p.set_status(ReservationStatus::Waiting))?;
                    info!(
                        store_id = %self.store.id,
                        %opens_at,
                        wait_ms = wait.as_millis() as u64,
                        "Waiting for reservation window"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shared.cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        if self.shared.process().status == ReservationStatus::Waiting {
            self.shared.update(|p| p.set_status(ReservationStatus::Processing))?;
        }
        Ok(())
    }
}

fn capture_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        other => Some(other.to_string()),
    }
}
