//! # Engine Error Types
//!
//! Error types for sessions, the supervisor and the clock sync service.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │  Session            │  │  Supervisor      │  │  Clock           │   │
//! │  │  (captured in       │  │  (returned to    │  │  (never fatal)   │   │
//! │  │   StoreProcess)     │  │   caller)        │  │                  │   │
//! │  │                     │  │                  │  │                  │   │
//! │  │  Initialization     │  │  AlreadyRunning  │  │  ClockSync-      │   │
//! │  │  StageAction        │  │  NotFound        │  │  Unavailable     │   │
//! │  │  AuthTimeout        │  │  InvalidState    │  │                  │   │
//! │  │  Cancelled          │  │  NoStores        │  │                  │   │
//! │  └─────────────────────┘  └──────────────────┘  └──────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌──────────────────┐                          │
//! │  │  Configuration      │  │  Internal        │                          │
//! │  │  InvalidConfig      │  │  ChannelError    │                          │
//! │  │  ConfigLoad/Save    │  │  Internal        │                          │
//! │  └─────────────────────┘  └──────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use reservo_core::{CoreError, ReservationStage, ReservationStatus};

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type covering all orchestration failures.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The page driver could not be acquired.
    #[error("Page driver unavailable for {store_id}: {message}")]
    InitializationFailure { store_id: String, message: String },

    /// A stage's page action failed (network, selector, timeout).
    #[error("Stage {stage} failed: {message}")]
    StageActionFailure {
        stage: ReservationStage,
        message: String,
    },

    /// No auth confirmation arrived in time.
    #[error("auth timeout")]
    AuthTimeout,

    /// The session was stopped.
    #[error("Session cancelled")]
    Cancelled,

    // =========================================================================
    // Supervisor Errors
    // =========================================================================
    /// A run is already active.
    #[error("Automation is already running")]
    AlreadyRunning,

    /// No active session has this store ID.
    #[error("No active session for store: {0}")]
    NotFound(String),

    /// The session is not in a state that accepts the request.
    #[error("Store {store_id} is {status}, expected {expected}")]
    InvalidState {
        store_id: String,
        status: ReservationStatus,
        expected: ReservationStatus,
    },

    /// The selection resolved to zero enabled stores.
    #[error("No enabled stores selected")]
    NoStoresSelected,

    // =========================================================================
    // Clock Errors
    // =========================================================================
    /// The network time source could not be reached.
    #[error("Clock sync unavailable: {0}")]
    ClockSyncUnavailable(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A workflow rule was violated.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        EngineError::InvalidConfig(format!("invalid url: {}", err))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::ClockSyncUnavailable(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// Creates a stage failure.
    pub fn stage(stage: ReservationStage, message: impl Into<String>) -> Self {
        EngineError::StageActionFailure {
            stage,
            message: message.into(),
        }
    }

    /// Returns true if a fresh session could plausibly succeed.
    ///
    /// ## Retryable Errors
    /// - Driver start-up failures
    /// - Stage action failures (network, selector timing)
    /// - Clock source outages
    ///
    /// ## Non-Retryable Errors
    /// - Auth timeouts (a human did not respond)
    /// - Cancellation
    /// - Structural and configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::InitializationFailure { .. }
                | EngineError::StageActionFailure { .. }
                | EngineError::ClockSyncUnavailable(_)
        )
    }

    /// Returns true for supervisor-level errors returned to callers.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyRunning
                | EngineError::NotFound(_)
                | EngineError::InvalidState { .. }
                | EngineError::NoStoresSelected
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        match self {
            EngineError::InvalidConfig(_)
            | EngineError::ConfigLoadFailed(_)
            | EngineError::ConfigSaveFailed(_) => true,
            EngineError::Core(core) => core.is_config_error(),
            _ => false,
        }
    }
}
