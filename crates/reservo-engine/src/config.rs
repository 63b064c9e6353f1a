//! # Engine Configuration
//!
//! Configuration management for the reservation engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     RESERVO_SYNC_POLICY=proceed                                        │
//! │     RESERVO_AUTH_TIMEOUT_SECS=600                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/reservo/reservo.toml (Linux)                             │
//! │     ~/Library/Application Support/com.reservo.reservo/ (macOS)         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     15s clock poll, 500ms drift threshold, 5 min auth timeout          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [clock]
//! source_url = "https://www.cloudflare.com"
//! interval_ms = 15000
//! threshold_ms = 500
//! max_age_ms = 60000
//! samples = 3            # Date header samples per poll
//!
//! [session]
//! auth_timeout_secs = 300
//! sync_policy = "defer"   # defer | proceed
//! time_critical_stages = ["confirmation"]
//!
//! [supervisor]
//! max_restarts = 0
//!
//! [profile]
//! name = "Kim Minji"
//! phone = "010-1234-5678"
//!
//! [[stores]]
//! id = "store-a"
//! name = "Store A"
//! url = "https://reserve.example.com/a"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reservo_core::{ReservationProfile, ReservationStage, StageWeights, StoreConfig, SyncThresholds};

use crate::clock::{date_resolution_ms, ClockConfig};

const MAX_DATE_SAMPLES: u32 = 5;
use crate::error::{EngineError, EngineResult};

// =============================================================================
// Sync Policy
// =============================================================================

/// What a session does before a time-critical action when the clock is not
/// synced.
///
/// ```text
/// DEFER (Default)                     │  PROCEED
/// ───────────────                     │  ───────
/// • Wait for a poll that reports      │  • Act immediately
///   synced=true                       │  • Record "degraded-sync" warning
/// • Bounded by sync_wait_ms; past     │    in the store's progress
///   the deadline, proceed degraded    │
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    #[default]
    Defer,
    Proceed,
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPolicy::Defer => write!(f, "defer"),
            SyncPolicy::Proceed => write!(f, "proceed"),
        }
    }
}

impl std::str::FromStr for SyncPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "defer" | "wait" => Ok(SyncPolicy::Defer),
            "proceed" | "degraded" => Ok(SyncPolicy::Proceed),
            other => Err(EngineError::InvalidConfig(format!(
                "Unknown sync policy: '{}'. Valid options: defer, proceed",
                other
            ))),
        }
    }
}

// =============================================================================
// Clock Settings
// =============================================================================

/// Clock sync polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSettings {
    /// URL whose `Date` response header is used as network time.
    #[serde(default = "default_source_url")]
    pub source_url: String,

    /// Poll interval (milliseconds).
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Maximum tolerated |offset| (milliseconds).
    #[serde(default = "default_threshold")]
    pub threshold_ms: u64,

    /// Maximum sample age before `synced` turns false (milliseconds).
    #[serde(default = "default_max_age")]
    pub max_age_ms: u64,

    /// Per-poll timeout; must be shorter than the interval.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// `Date` header samples per poll. The offset resolution is
    /// `1000 >> (samples - 1)` ms and `threshold_ms` may not be below it.
    #[serde(default = "default_samples")]
    pub samples: u32,
}

fn default_source_url() -> String {
    "https://www.cloudflare.com".to_string()
}
fn default_interval() -> u64 {
    15_000
}
fn default_threshold() -> u64 {
    reservo_core::time_sync::DEFAULT_THRESHOLD_MS
}
fn default_max_age() -> u64 {
    reservo_core::time_sync::DEFAULT_MAX_AGE_MS
}
fn default_request_timeout() -> u64 {
    5_000
}
fn default_samples() -> u32 {
    crate::clock::DEFAULT_DATE_SAMPLES
}

impl Default for ClockSettings {
    fn default() -> Self {
        ClockSettings {
            source_url: default_source_url(),
            interval_ms: default_interval(),
            threshold_ms: default_threshold(),
            max_age_ms: default_max_age(),
            request_timeout_ms: default_request_timeout(),
            samples: default_samples(),
        }
    }
}

impl ClockSettings {
    /// Thresholds used to evaluate `synced`.
    pub fn thresholds(&self) -> SyncThresholds {
        SyncThresholds {
            threshold_ms: self.threshold_ms,
            max_age_ms: self.max_age_ms,
        }
    }

    /// Runtime config for the clock sync service.
    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            interval: Duration::from_millis(self.interval_ms),
            thresholds: self.thresholds(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

// =============================================================================
// Session Settings
// =============================================================================

/// Per-session behavior shared by every store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// How long `pass_auth` waits for an external confirmation (seconds).
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Upper bound for every page-driver call (milliseconds).
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,

    /// Upper bound for acquiring the page driver (milliseconds).
    #[serde(default = "default_driver_timeout")]
    pub driver_timeout_ms: u64,

    /// Unsynced-clock policy for time-critical stages.
    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// How long `defer` waits for a synced poll (milliseconds).
    #[serde(default = "default_sync_wait")]
    pub sync_wait_ms: u64,

    /// Stages whose action is gated on the clock and reservation window.
    #[serde(default = "default_time_critical")]
    pub time_critical_stages: Vec<ReservationStage>,

    /// Progress weights per stage. Defaults to `floor(100 * i / 7)`.
    #[serde(default)]
    pub stage_weights: StageWeights,
}

fn default_auth_timeout() -> u64 {
    300
}
fn default_action_timeout() -> u64 {
    30_000
}
fn default_driver_timeout() -> u64 {
    15_000
}
fn default_sync_wait() -> u64 {
    30_000
}
fn default_time_critical() -> Vec<ReservationStage> {
    vec![ReservationStage::Confirmation]
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            auth_timeout_secs: default_auth_timeout(),
            action_timeout_ms: default_action_timeout(),
            driver_timeout_ms: default_driver_timeout(),
            sync_policy: SyncPolicy::default(),
            sync_wait_ms: default_sync_wait(),
            time_critical_stages: default_time_critical(),
            stage_weights: StageWeights::default(),
        }
    }
}

impl SessionSettings {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_millis(self.driver_timeout_ms)
    }

    pub fn sync_wait(&self) -> Duration {
        Duration::from_millis(self.sync_wait_ms)
    }

    /// Returns true if `stage` is gated on the clock.
    pub fn is_time_critical(&self, stage: ReservationStage) -> bool {
        self.time_critical_stages.contains(&stage)
    }
}

// =============================================================================
// Supervisor Settings
// =============================================================================

/// Run-level policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Fresh sessions started for a store after a retryable failure.
    /// 0 disables automatic retry.
    #[serde(default)]
    pub max_restarts: u32,
}

// =============================================================================
// Server Settings
// =============================================================================

/// Bind address for the HTTP control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub clock: ClockSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub profile: ReservationProfile,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub stores: Vec<StoreConfig>,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (reservo.toml)
    /// 3. Environment variables
    ///
    /// A missing file is an error when `config_path` is given; only the
    /// default location falls back to defaults.
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.is_some();
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else if explicit {
                return Err(EngineError::ConfigLoadFailed(format!(
                    "config file not found: {}",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        let clock = &self.clock;
        if clock.interval_ms == 0 {
            return Err(EngineError::InvalidConfig("clock.interval_ms must be greater than 0".into()));
        }
        if clock.request_timeout_ms == 0 || clock.request_timeout_ms >= clock.interval_ms {
            return Err(EngineError::InvalidConfig(format!(
                "clock.request_timeout_ms ({}) must be between 1 and interval_ms ({})",
                clock.request_timeout_ms, clock.interval_ms
            )));
        }
        if clock.max_age_ms < clock.interval_ms {
            return Err(EngineError::InvalidConfig(format!(
                "clock.max_age_ms ({}) must be at least interval_ms ({})",
                clock.max_age_ms, clock.interval_ms
            )));
        }
        if !(1..=MAX_DATE_SAMPLES).contains(&clock.samples) {
            return Err(EngineError::InvalidConfig(format!(
                "clock.samples ({}) must be between 1 and {}",
                clock.samples, MAX_DATE_SAMPLES
            )));
        }
        let resolution_ms = date_resolution_ms(clock.samples);
        if clock.threshold_ms < resolution_ms {
            return Err(EngineError::InvalidConfig(format!(
                "clock.threshold_ms ({}) is below the {}ms resolution of {} Date samples",
                clock.threshold_ms, resolution_ms, clock.samples
            )));
        }
        // Each sample after the first waits for a second boundary.
        let sampling_ms = u64::from(clock.samples - 1) * 1_000;
        if clock.request_timeout_ms <= sampling_ms {
            return Err(EngineError::InvalidConfig(format!(
                "clock.request_timeout_ms ({}) must exceed {}ms for {} Date samples",
                clock.request_timeout_ms, sampling_ms, clock.samples
            )));
        }
        url::Url::parse(&clock.source_url)?;

        if self.session.action_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "session.action_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.session.auth_timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "session.auth_timeout_secs must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for store in &self.stores {
            store.validate()?;
            if !seen.insert(store.id.as_str()) {
                return Err(EngineError::InvalidConfig(format!("duplicate store id: {}", store.id)));
            }
            let parsed = url::Url::parse(&store.url)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(EngineError::InvalidConfig(format!(
                    "store {} url must be http(s), got: {}",
                    store.id, store.url
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("RESERVO_CLOCK_URL") {
            debug!(url = %url, "Overriding clock source from environment");
            self.clock.source_url = url;
        }

        if let Some(v) = env_u64("RESERVO_CLOCK_INTERVAL_MS") {
            self.clock.interval_ms = v;
        }

        if let Some(v) = env_u64("RESERVO_SYNC_THRESHOLD_MS") {
            self.clock.threshold_ms = v;
        }

        if let Some(v) = env_u64("RESERVO_SYNC_MAX_AGE_MS") {
            self.clock.max_age_ms = v;
        }

        if let Some(v) = env_u64("RESERVO_AUTH_TIMEOUT_SECS") {
            self.session.auth_timeout_secs = v;
        }

        if let Ok(policy) = std::env::var("RESERVO_SYNC_POLICY") {
            match policy.parse() {
                Ok(parsed) => {
                    debug!(policy = %policy, "Overriding sync policy from environment");
                    self.session.sync_policy = parsed;
                }
                Err(_) => warn!(policy = %policy, "Unknown sync policy in environment"),
            }
        }

        if let Some(v) = env_u32("RESERVO_MAX_RESTARTS") {
            self.supervisor.max_restarts = v;
        }

        if let Ok(addr) = std::env::var("RESERVO_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("RESERVO_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding server port from environment");
                self.server.port = p;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "reservo", "reservo")
            .map(|dirs| dirs.config_dir().join("reservo.toml"))
    }

    /// Enabled stores ordered by priority (highest first), then id.
    pub fn enabled_stores(&self) -> Vec<StoreConfig> {
        let mut stores: Vec<StoreConfig> = self.stores.iter().filter(|s| s.enabled).cloned().collect();
        stores.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        stores
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    match value.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %value, "Ignoring non-numeric environment override");
            None
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    let value = env_u64(key)?;
    match u32::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value, "Ignoring out-of-range environment override");
            None
        }
    }
}
