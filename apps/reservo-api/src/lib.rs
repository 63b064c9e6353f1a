//! # Reservo API
//!
//! HTTP control surface over the automation supervisor.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  client ──► axum Router ──► handler ──► AutomationSupervisor            │
//! │                                │                │                       │
//! │                                │ ApiError       │ EngineEvent           │
//! │                                ▼                ▼                       │
//! │                     {success:false, error}   SSE /automation/events     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{router, AppState};
pub use server::serve;
