//! # reservo-core: Pure Domain Types for Reservo
//!
//! This crate holds the workflow rules of the reservation engine as plain
//! values and pure functions. The async runtime lives in `reservo-engine`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Reservo Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 reservo-api (Axum control surface)              │   │
//! │  │    POST /automation   DELETE /automation   GET /events          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             reservo-engine (Supervisor, Sessions, Clock)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ reservo-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌──────────┐   │   │
//! │  │   │   types   │  │ progress  │  │ time_sync  │  │  script  │   │   │
//! │  │   │  Stage    │  │  Weights  │  │  synced    │  │ PageStep │   │   │
//! │  │   │  Status   │  │  Verdict  │  │  rule      │  │          │   │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └──────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO RUNTIME • PURE FUNCTIONS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use reservo_core::{ReservationStatus, StageWeights, StoreProcess};
//!
//! let weights = StageWeights::default();
//! let mut process = StoreProcess::new("store-a");
//! process.set_status(ReservationStatus::Processing).unwrap();
//! process.advance(&weights).unwrap();
//! assert_eq!(process.progress, 14);
//! ```

pub mod error;
pub mod progress;
pub mod script;
pub mod time_sync;
pub mod types;

pub use error::CoreError;
pub use progress::{AggregateProgress, RunVerdict, StageWeights};
pub use script::{steps_for_stage, PageStep, ReservationProfile, StageScript, WaitState};
pub use time_sync::{SyncThresholds, TimeSyncStatus};
pub use types::*;

/// Warning recorded when a time-critical action runs without a trusted clock.
pub const DEGRADED_SYNC_WARNING: &str = "degraded-sync";
