//! # reservo-engine: Orchestration Core for Reservo
//!
//! Runs one reservation session per store concurrently, pauses them for
//! external authentication, and keeps a drift-corrected clock so that
//! time-critical submissions fire at the same instant everywhere.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Engine Architecture                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  AutomationSupervisor                            │  │
//! │  │  start / launch / stop / route_auth / aggregate_progress         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ one tokio task per store                │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐            │
//! │  │ TargetSession  │  │ TargetSession  │  │ TargetSession  │            │
//! │  │ stage machine  │  │ stage machine  │  │ stage machine  │            │
//! │  │ + PageDriver   │  │ + PageDriver   │  │ + PageDriver   │            │
//! │  └───────┬────────┘  └───────┬────────┘  └───────┬────────┘            │
//! │          │ time gate         │                   │                      │
//! │          ▼                   ▼                   ▼                      │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ ClockSyncService  (TimeSource → watch<TimeSyncStatus>)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  EVENTS (EventBus, broadcast):                                         │
//! │  • "progress"     - per-store AutomationProgress                       │
//! │  • "error"        - session failures                                   │
//! │  • "time_sync"    - every clock poll                                   │
//! │  • "run_started" / "run_finished"                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`clock`] - Clock sync service and time sources
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`driver`] - Page driver seam and the dry-run driver
//! - [`error`] - Engine error types
//! - [`events`] - Event bus
//! - [`session`] - Per-store stage machine
//! - [`supervisor`] - Multi-store run management
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reservo_engine::{AutomationSupervisor, ClockSyncService, DryRunDriverFactory, EngineConfig, EventBus};
//!
//! let config = EngineConfig::load(None)?;
//! let events = EventBus::default();
//! let clock = ClockSyncService::from_settings(&config.clock, events.clone())?;
//! clock.start(config.clock.clock_config());
//!
//! let supervisor = AutomationSupervisor::new(config, clock, events, Arc::new(DryRunDriverFactory));
//! let report = supervisor.start(None).await?;
//! println!("Run {} finished: {:?}", report.run_id, report.verdict);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod session;
pub mod supervisor;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{
    date_resolution_ms, ClockConfig, ClockSyncService, HttpTimeSource, OffsetWindow, SyncWait, TimeSource,
    DEFAULT_DATE_SAMPLES,
};
pub use config::{ClockSettings, EngineConfig, ServerSettings, SessionSettings, SupervisorSettings, SyncPolicy};
pub use driver::{execute_step, DryRunDriver, DryRunDriverFactory, PageDriver, PageDriverFactory};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus, Subscription};
pub use session::{SessionContext, SessionHandle, TargetSession};
pub use supervisor::{AutomationSupervisor, RunReport, RunTicket, StopSummary};
