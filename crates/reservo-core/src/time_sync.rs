//! # Time Sync Status
//!
//! The snapshot published by the clock sync service and the rule that decides
//! whether its offset can be trusted.
//!
//! ## Synced Rule
//! ```text
//! synced = last_synced.is_some()
//!       && |offset_ms| < threshold_ms
//!       && (now - last_synced) < max_age_ms
//! ```
//! The age term is evaluated at *read* time, so a snapshot goes stale on its
//! own when polling stops.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Default maximum tolerated drift (milliseconds).
pub const DEFAULT_THRESHOLD_MS: u64 = 500;

/// Default maximum age of a sample before it is considered stale (milliseconds).
pub const DEFAULT_MAX_AGE_MS: u64 = 60_000;

/// Bounds used to evaluate `synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncThresholds {
    pub threshold_ms: u64,
    pub max_age_ms: u64,
}

impl Default for SyncThresholds {
    fn default() -> Self {
        SyncThresholds {
            threshold_ms: DEFAULT_THRESHOLD_MS,
            max_age_ms: DEFAULT_MAX_AGE_MS,
        }
    }
}

/// Offset between the network time source and the local clock.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TimeSyncStatus {
    /// `network_time - local_time` in milliseconds.
    #[ts(type = "number")]
    pub offset_ms: i64,
    /// When the last successful poll happened (local clock).
    #[ts(as = "Option<String>")]
    pub last_synced: Option<DateTime<Utc>>,
    /// Cached evaluation of the synced rule at snapshot time. Deserialized
    /// values carry the sender's verdict; call [`TimeSyncStatus::reevaluated`]
    /// before trusting it.
    pub synced: bool,
    /// Error from the most recent failed poll, if the last poll failed.
    pub error: Option<String>,
}

impl TimeSyncStatus {
    /// Builds a fresh sample.
    pub fn sampled(offset_ms: i64, at: DateTime<Utc>, thresholds: SyncThresholds) -> Self {
        let mut status = TimeSyncStatus {
            offset_ms,
            last_synced: Some(at),
            synced: false,
            error: None,
        };
        status.synced = status.evaluate(at, thresholds);
        status
    }

    /// Age of the sample at `now`, if any. Negative ages clamp to zero.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_synced
            .map(|at| (now - at).max(Duration::zero()))
    }

    /// Applies the synced rule at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>, thresholds: SyncThresholds) -> bool {
        let Some(age) = self.age(now) else {
            return false;
        };
        self.offset_ms.unsigned_abs() < thresholds.threshold_ms
            && (age.num_milliseconds() as u64) < thresholds.max_age_ms
    }

    /// Returns a copy with `synced` recomputed at `now`.
    pub fn reevaluated(&self, now: DateTime<Utc>, thresholds: SyncThresholds) -> Self {
        TimeSyncStatus {
            synced: self.evaluate(now, thresholds),
            ..self.clone()
        }
    }

    /// Converts a local instant to estimated network time.
    pub fn to_network_time(&self, local: DateTime<Utc>) -> DateTime<Utc> {
        local + Duration::milliseconds(self.offset_ms)
    }

    /// Converts a network instant to the local instant it corresponds to.
    pub fn to_local_time(&self, network: DateTime<Utc>) -> DateTime<Utc> {
        network - Duration::milliseconds(self.offset_ms)
    }
}
