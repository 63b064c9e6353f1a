//! # Progress Rules
//!
//! Stage weighting, aggregate progress, and the whole-run verdict.
//!
//! ## Default Weights
//! ```text
//! selection  agreement  date_selection  pass_auth  form  confirmation  complete
//!     0         14            28            42       57       71          100
//! ```
//! `floor(100 * index / 7)` for every stage except `complete`, which is 100.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::types::{AutomationProgress, AutomationResult, ReservationStage, ReservationStatus};

// =============================================================================
// Stage Weights
// =============================================================================

/// Progress percentage assigned to each stage, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct StageWeights([u8; ReservationStage::COUNT]);

impl StageWeights {
    /// Validates and wraps custom weights.
    ///
    /// Weights must be non-decreasing and end at exactly 100.
    pub fn new(weights: [u8; ReservationStage::COUNT]) -> Result<Self, CoreError> {
        if weights.windows(2).any(|w| w[0] > w[1]) {
            return Err(CoreError::InvalidStageWeights(format!(
                "weights must be non-decreasing, got {:?}",
                weights
            )));
        }
        if weights[ReservationStage::COUNT - 1] != 100 {
            return Err(CoreError::InvalidStageWeights(
                "the complete stage must weigh 100".into(),
            ));
        }
        Ok(StageWeights(weights))
    }

    /// Progress for reaching `stage`.
    pub fn progress_for(&self, stage: ReservationStage) -> u8 {
        self.0[stage.index()]
    }
}

impl Default for StageWeights {
    fn default() -> Self {
        let total = ReservationStage::COUNT;
        let mut weights = [0u8; ReservationStage::COUNT];
        for (i, weight) in weights.iter_mut().enumerate() {
            *weight = ((100 * i) / total) as u8;
        }
        weights[total - 1] = 100;
        StageWeights(weights)
    }
}

impl TryFrom<Vec<u8>> for StageWeights {
    type Error = CoreError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let weights: [u8; ReservationStage::COUNT] = value.try_into().map_err(|v: Vec<u8>| {
            CoreError::InvalidStageWeights(format!(
                "expected {} weights, got {}",
                ReservationStage::COUNT,
                v.len()
            ))
        })?;
        StageWeights::new(weights)
    }
}

impl From<StageWeights> for Vec<u8> {
    fn from(value: StageWeights) -> Self {
        value.0.to_vec()
    }
}

// =============================================================================
// Aggregate Progress
// =============================================================================

/// Engine-wide view over every store in the current (or last) run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AggregateProgress {
    /// Mean of per-store progress, rounded down. 0 with no stores.
    pub overall_progress: u8,
    pub store_statuses: Vec<AutomationProgress>,
    /// Store IDs that are waiting for auth or have failed.
    pub requires_attention: Vec<String>,
}

impl AggregateProgress {
    /// Aggregates a set of snapshots.
    pub fn from_snapshots(store_statuses: Vec<AutomationProgress>) -> Self {
        let overall_progress = if store_statuses.is_empty() {
            0
        } else {
            let sum: usize = store_statuses.iter().map(|s| s.progress as usize).sum();
            (sum / store_statuses.len()) as u8
        };

        let requires_attention = store_statuses
            .iter()
            .filter(|s| s.status.requires_attention())
            .map(|s| s.store_id.clone())
            .collect();

        AggregateProgress {
            overall_progress,
            store_statuses,
            requires_attention,
        }
    }
}

// =============================================================================
// Run Verdict
// =============================================================================

/// Whole-run outcome.
///
/// A run only counts as failed when no store succeeded and at least one
/// failed. Individual failures alongside successes are reported per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RunVerdict {
    /// Every store succeeded.
    Succeeded,
    /// At least one success and at least one non-success.
    PartialFailure,
    /// Nothing succeeded; every store was cancelled.
    Stopped,
    /// Nothing succeeded and at least one store failed.
    Failed,
}

impl RunVerdict {
    /// Classifies a finished run. An empty run is `Stopped`.
    pub fn from_results(results: &[AutomationResult]) -> Self {
        let successes = results.iter().filter(|r| r.success).count();
        if successes == results.len() && !results.is_empty() {
            RunVerdict::Succeeded
        } else if successes > 0 {
            RunVerdict::PartialFailure
        } else if results.iter().any(|r| r.status == ReservationStatus::Failed) {
            RunVerdict::Failed
        } else {
            RunVerdict::Stopped
        }
    }

    /// Returns true unless the whole run failed.
    pub fn is_success(self) -> bool {
        !matches!(self, RunVerdict::Failed)
    }
}
