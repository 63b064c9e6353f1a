//! # Error Types
//!
//! Domain-specific error types for reservo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  reservo-core errors (this file)                                       │
//! │  └── CoreError        - Rule violations on stages, statuses, weights   │
//! │                                                                         │
//! │  reservo-engine errors (separate crate)                                │
//! │  └── EngineError      - Session, supervisor and clock failures         │
//! │                                                                         │
//! │  reservo-api errors (in app)                                           │
//! │  └── ApiError         - What HTTP callers see (serialized)             │
//! │                                                                         │
//! │  Flow: CoreError → EngineError → ApiError → Caller                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{ReservationStage, ReservationStatus};

/// Core domain errors.
///
/// These represent violations of the workflow rules: a stage moving
/// backwards, a terminal session being mutated, or invalid configuration
/// values. They are programming or configuration errors, never transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A stage transition would move backwards or skip a stage.
    ///
    /// ## When This Occurs
    /// ```text
    /// stage = form
    ///      │
    ///      ▼
    /// advance_to(date_selection)
    ///      │
    ///      ▼
    /// InvalidStageTransition { from: form, to: date_selection }
    /// ```
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidStageTransition {
        from: ReservationStage,
        to: ReservationStage,
    },

    /// The process is already terminal; no further transitions are accepted.
    #[error("Store {store_id} is already {status}")]
    TerminalState {
        store_id: String,
        status: ReservationStatus,
    },

    /// A status change not allowed by the session state machine.
    #[error("Invalid status transition for {store_id}: {from} -> {to}")]
    InvalidStatusTransition {
        store_id: String,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// Stage progress weights are not monotonic or out of range.
    #[error("Invalid stage weights: {0}")]
    InvalidStageWeights(String),

    /// A store definition is unusable.
    #[error("Invalid store {id}: {reason}")]
    InvalidStore { id: String, reason: String },

    /// Unknown stage name.
    #[error("Unknown reservation stage: '{0}'")]
    UnknownStage(String),
}

impl CoreError {
    /// Returns true if this error came from configuration rather than runtime.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidStageWeights(_) | CoreError::InvalidStore { .. } | CoreError::UnknownStage(_)
        )
    }
}
