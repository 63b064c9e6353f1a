//! # Domain Types
//!
//! Core domain types shared by the engine and the control surface.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌──────────────────┐     │
//! │  │  StoreConfig    │   │  StoreProcess    │   │ AutomationResult │     │
//! │  │  ─────────────  │   │  ──────────────  │   │  ──────────────  │     │
//! │  │  id             │──►│  store_id        │──►│  store_id        │     │
//! │  │  url            │   │  status          │   │  success         │     │
//! │  │  enabled        │   │  stage           │   │  stage / error   │     │
//! │  │  priority       │   │  progress 0-100  │   └──────────────────┘     │
//! │  └─────────────────┘   └────────┬─────────┘                            │
//! │                                 │ projection                            │
//! │                                 ▼                                       │
//! │                        ┌──────────────────────┐                         │
//! │                        │ AutomationProgress   │  what the UI sees       │
//! │                        │ + store_name         │                         │
//! │                        │ + current_step       │                         │
//! │                        └──────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stage vs Status
//! Stage is the *workflow position* (selection … complete). Status is the
//! *execution state* (processing, waiting_auth, failed …). A failed session
//! keeps the stage it failed at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::progress::StageWeights;
use crate::script::StageScript;

// =============================================================================
// Store Configuration
// =============================================================================

/// Static description of one automation target.
///
/// ## Config File Format
/// ```toml
/// [[stores]]
/// id = "store-gangnam"
/// name = "Gangnam Flagship"
/// url = "https://reserve.example.com/gangnam"
/// priority = 10
/// purpose = "Limited release pickup"
/// opens_at = "2026-11-01T01:00:00Z"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Unique store identifier.
    pub id: String,

    /// Human-readable store name.
    pub name: String,

    /// Entry URL of the reservation page.
    pub url: String,

    /// Disabled stores never get a session.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Scheduling/display order (higher first). Sessions still run concurrently.
    #[serde(default)]
    pub priority: i32,

    /// Free-form description of what is being reserved.
    #[serde(default)]
    pub purpose: String,

    /// Instant the reservation window opens. The time-critical stage waits
    /// for it on the drift-corrected clock.
    #[serde(default)]
    pub opens_at: Option<DateTime<Utc>>,

    /// Per-stage page steps overriding the default script.
    #[serde(default)]
    pub script: Option<StageScript>,
}

fn default_enabled() -> bool {
    true
}

impl StoreConfig {
    /// Creates an enabled store with no window and the default script.
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        StoreConfig {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            enabled: true,
            priority: 0,
            purpose: String::new(),
            opens_at: None,
            script: None,
        }
    }

    /// Checks the fields that do not need network-aware parsing.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidStore {
                id: self.id.clone(),
                reason: "id must not be empty".into(),
            });
        }
        if self.url.trim().is_empty() {
            return Err(CoreError::InvalidStore {
                id: self.id.clone(),
                reason: "url must not be empty".into(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Reservation Stage
// =============================================================================

/// Ordered workflow position of a reservation session.
///
/// ```text
/// selection → agreement → date_selection → pass_auth → form → confirmation → complete
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ReservationStage {
    #[default]
    Selection,
    Agreement,
    DateSelection,
    PassAuth,
    Form,
    Confirmation,
    Complete,
}

impl ReservationStage {
    /// All stages in canonical order.
    pub const ALL: [ReservationStage; 7] = [
        ReservationStage::Selection,
        ReservationStage::Agreement,
        ReservationStage::DateSelection,
        ReservationStage::PassAuth,
        ReservationStage::Form,
        ReservationStage::Confirmation,
        ReservationStage::Complete,
    ];

    /// Number of stages.
    pub const COUNT: usize = 7;

    /// Zero-based position in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stage at a canonical position.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Returns true for `complete`.
    pub fn is_final(self) -> bool {
        self == ReservationStage::Complete
    }

    /// Human-readable description of the action performed at this stage.
    pub fn description(self) -> &'static str {
        match self {
            ReservationStage::Selection => "Selecting reservation item",
            ReservationStage::Agreement => "Accepting terms",
            ReservationStage::DateSelection => "Choosing date and time",
            ReservationStage::PassAuth => "Requesting PASS authentication",
            ReservationStage::Form => "Filling reservation form",
            ReservationStage::Confirmation => "Submitting reservation",
            ReservationStage::Complete => "Reservation complete",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ReservationStage::Selection => "selection",
            ReservationStage::Agreement => "agreement",
            ReservationStage::DateSelection => "date_selection",
            ReservationStage::PassAuth => "pass_auth",
            ReservationStage::Form => "form",
            ReservationStage::Confirmation => "confirmation",
            ReservationStage::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ReservationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReservationStage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownStage(s.to_string()))
    }
}

// =============================================================================
// Reservation Status
// =============================================================================

/// Execution state of a session, independent of its stage.
///
/// ## State Machine
/// ```text
///  idle ──initialize──► ready ──start──► processing ◄──► waiting
///                                          │    ▲
///                                          ▼    │ handle_auth
///                                       waiting_auth
///
///  any non-terminal ──► failed | cancelled      processing ──► success
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ReservationStatus {
    /// Created, no page driver yet.
    #[default]
    Idle,
    /// Page driver acquired, not started.
    Ready,
    /// Deferred on clock sync or the reservation window.
    Waiting,
    /// Performing stage actions.
    Processing,
    /// Suspended at `pass_auth` until an external confirmation arrives.
    WaitingAuth,
    /// Reached `complete`.
    Success,
    /// Stopped by an unrecoverable error; stage is frozen.
    Failed,
    /// Stopped by the supervisor.
    Cancelled,
}

impl ReservationStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Success | ReservationStatus::Failed | ReservationStatus::Cancelled
        )
    }

    /// Statuses a human should look at.
    pub fn requires_attention(self) -> bool {
        matches!(self, ReservationStatus::WaitingAuth | ReservationStatus::Failed)
    }

    /// Returns true while the session is actively running its stage loop.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ReservationStatus::Processing | ReservationStatus::Waiting | ReservationStatus::WaitingAuth
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationStatus::Idle => write!(f, "idle"),
            ReservationStatus::Ready => write!(f, "ready"),
            ReservationStatus::Waiting => write!(f, "waiting"),
            ReservationStatus::Processing => write!(f, "processing"),
            ReservationStatus::WaitingAuth => write!(f, "waiting_auth"),
            ReservationStatus::Success => write!(f, "success"),
            ReservationStatus::Failed => write!(f, "failed"),
            ReservationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Store Process
// =============================================================================

/// Live state of one running target.
///
/// Owned by exactly one session. Every mutation goes through the methods
/// below so that stage order, progress monotonicity and terminal freezing
/// hold regardless of caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StoreProcess {
    pub store_id: String,
    pub status: ReservationStatus,
    pub stage: ReservationStage,
    /// 0-100, non-decreasing unless failed.
    pub progress: u8,
    #[ts(as = "String")]
    pub last_activity: DateTime<Utc>,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Non-fatal notes such as `degraded-sync`.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StoreProcess {
    /// Creates an idle process at the first stage.
    pub fn new(store_id: impl Into<String>) -> Self {
        StoreProcess {
            store_id: store_id.into(),
            status: ReservationStatus::Idle,
            stage: ReservationStage::Selection,
            progress: 0,
            last_activity: Utc::now(),
            result: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    fn ensure_not_terminal(&self) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::TerminalState {
                store_id: self.store_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Updates the activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Moves to a non-terminal execution status.
    ///
    /// Terminal statuses have dedicated methods ([`complete`](Self::complete),
    /// [`fail`](Self::fail), [`cancel`](Self::cancel)).
    pub fn set_status(&mut self, status: ReservationStatus) -> Result<(), CoreError> {
        self.ensure_not_terminal()?;
        if status.is_terminal() || (status == ReservationStatus::Idle && self.status != ReservationStatus::Idle) {
            return Err(CoreError::InvalidStatusTransition {
                store_id: self.store_id.clone(),
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.touch();
        Ok(())
    }

    /// Advances exactly one stage and raises progress to the stage's weight.
    pub fn advance(&mut self, weights: &StageWeights) -> Result<ReservationStage, CoreError> {
        self.ensure_not_terminal()?;
        let next = self.stage.next().ok_or(CoreError::InvalidStageTransition {
            from: self.stage,
            to: self.stage,
        })?;
        self.stage = next;
        self.progress = self.progress.max(weights.progress_for(next));
        self.touch();
        Ok(next)
    }

    /// Marks success. Only valid once the stage is `complete`.
    pub fn complete(&mut self, result: Option<String>) -> Result<(), CoreError> {
        self.ensure_not_terminal()?;
        if !self.stage.is_final() {
            return Err(CoreError::InvalidStatusTransition {
                store_id: self.store_id.clone(),
                from: self.status,
                to: ReservationStatus::Success,
            });
        }
        self.status = ReservationStatus::Success;
        self.progress = 100;
        self.result = result;
        self.touch();
        Ok(())
    }

    /// Marks failure, freezing the stage.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.ensure_not_terminal()?;
        self.status = ReservationStatus::Failed;
        self.error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// Marks cancellation, freezing the stage.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.ensure_not_terminal()?;
        self.status = ReservationStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Records a non-fatal warning once.
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
        self.touch();
    }

    /// Human-readable description of what the session is doing now.
    pub fn current_step(&self) -> String {
        match self.status {
            ReservationStatus::Idle => "Idle".to_string(),
            ReservationStatus::Ready => "Ready to start".to_string(),
            ReservationStatus::Waiting => format!("Waiting to run: {}", self.stage.description()),
            ReservationStatus::Processing => self.stage.description().to_string(),
            ReservationStatus::WaitingAuth => "Waiting for PASS authentication".to_string(),
            ReservationStatus::Success => ReservationStage::Complete.description().to_string(),
            ReservationStatus::Failed => format!("Failed at {}", self.stage),
            ReservationStatus::Cancelled => format!("Cancelled at {}", self.stage),
        }
    }
}

// =============================================================================
// Automation Progress
// =============================================================================

/// Externally visible snapshot of one store's progress.
///
/// ## Transport Note
/// `lastActivity` is serialized as an RFC 3339 string; consumers must parse
/// it back into a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AutomationProgress {
    pub store_id: String,
    pub store_name: String,
    pub status: ReservationStatus,
    pub stage: ReservationStage,
    pub progress: u8,
    pub current_step: String,
    #[ts(as = "String")]
    pub last_activity: DateTime<Utc>,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl AutomationProgress {
    /// Projects a process snapshot for display.
    pub fn from_process(process: &StoreProcess, store_name: impl Into<String>) -> Self {
        AutomationProgress {
            store_id: process.store_id.clone(),
            store_name: store_name.into(),
            status: process.status,
            stage: process.stage,
            progress: process.progress,
            current_step: process.current_step(),
            last_activity: process.last_activity,
            result: process.result.clone(),
            error: process.error.clone(),
            warnings: process.warnings.clone(),
        }
    }
}

// =============================================================================
// Automation Result
// =============================================================================

/// Final outcome of one store's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AutomationResult {
    pub store_id: String,
    pub store_name: String,
    pub success: bool,
    pub status: ReservationStatus,
    pub stage: ReservationStage,
    pub progress: u8,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl AutomationResult {
    /// Builds the result from a final progress snapshot.
    pub fn from_progress(progress: &AutomationProgress) -> Self {
        AutomationResult {
            store_id: progress.store_id.clone(),
            store_name: progress.store_name.clone(),
            success: progress.status == ReservationStatus::Success,
            status: progress.status,
            stage: progress.stage,
            progress: progress.progress,
            result: progress.result.clone(),
            error: progress.error.clone(),
        }
    }
}
