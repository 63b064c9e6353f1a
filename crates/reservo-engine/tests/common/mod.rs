//! Scripted collaborators shared by the integration scenarios.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use reservo_core::{AggregateProgress, StoreConfig, WaitState};
use reservo_engine::{
    AutomationSupervisor, ClockConfig, ClockSyncService, EngineConfig, EngineError, EngineResult,
    EventBus, PageDriver, PageDriverFactory, TimeSource,
};

// =============================================================================
// Scripted Page Driver
// =============================================================================

/// How the driver for one store behaves.
#[derive(Debug, Clone, Default)]
pub struct StoreBehavior {
    /// Selectors that are never found.
    pub missing: HashSet<String>,
    /// Selectors whose wait never resolves.
    pub hanging: HashSet<String>,
    /// Number of `create` calls that fail before one succeeds.
    pub failed_creates: usize,
    /// Value returned by `evaluate`.
    pub evaluate: Option<Value>,
}

impl StoreBehavior {
    pub fn missing(selector: &str) -> Self {
        StoreBehavior {
            missing: [selector.to_string()].into(),
            ..Default::default()
        }
    }

    pub fn hanging(selector: &str) -> Self {
        StoreBehavior {
            hanging: [selector.to_string()].into(),
            ..Default::default()
        }
    }
}

/// Records every driver call and lets tests inject failures per store.
#[derive(Clone, Default)]
pub struct ScriptedDrivers {
    behaviors: Arc<Mutex<HashMap<String, StoreBehavior>>>,
    pub calls: Arc<Mutex<Vec<(String, String, String)>>>,
    pub created: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl ScriptedDrivers {
    pub fn with(self, store_id: &str, behavior: StoreBehavior) -> Self {
        self.behaviors.lock().unwrap().insert(store_id.to_string(), behavior);
        self
    }

    pub fn calls_for(&self, store_id: &str) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == store_id)
            .map(|(_, action, target)| (action.clone(), target.clone()))
            .collect()
    }
}

#[async_trait]
impl PageDriverFactory for ScriptedDrivers {
    async fn create(&self, store: &StoreConfig) -> EngineResult<Box<dyn PageDriver>> {
        let behavior = {
            let mut behaviors = self.behaviors.lock().unwrap();
            let entry = behaviors.entry(store.id.clone()).or_default();
            if entry.failed_creates > 0 {
                entry.failed_creates -= 1;
                return Err(EngineError::Internal("browser failed to launch".into()));
            }
            entry.clone()
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDriver {
            store_id: store.id.clone(),
            behavior,
            calls: self.calls.clone(),
            closed: self.closed.clone(),
            is_closed: false,
        }))
    }
}

struct ScriptedDriver {
    store_id: String,
    behavior: StoreBehavior,
    calls: Arc<Mutex<Vec<(String, String, String)>>>,
    closed: Arc<AtomicUsize>,
    is_closed: bool,
}

impl ScriptedDriver {
    fn record(&self, action: &str, target: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((self.store_id.clone(), action.to_string(), target.to_string()));
    }

    fn found(&self, selector: &str) -> bool {
        !self.behavior.missing.contains(selector)
    }
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        self.record("navigate", url);
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _state: WaitState, _timeout: Duration) -> EngineResult<bool> {
        self.record("wait_for", selector);
        if self.behavior.hanging.contains(selector) {
            std::future::pending::<()>().await;
        }
        Ok(self.found(selector))
    }

    async fn click(&mut self, selector: &str) -> EngineResult<bool> {
        self.record("click", selector);
        Ok(self.found(selector))
    }

    async fn fill(&mut self, selector: &str, _text: &str) -> EngineResult<bool> {
        self.record("fill", selector);
        Ok(self.found(selector))
    }

    async fn evaluate(&mut self, _script: &str) -> EngineResult<Value> {
        self.record("evaluate", "");
        Ok(self
            .behavior
            .evaluate
            .clone()
            .unwrap_or_else(|| Value::String(format!("R-{}", self.store_id))))
    }

    async fn close(&mut self) -> EngineResult<()> {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// =============================================================================
// Scripted Time Source
// =============================================================================

/// Replays offsets (ms) relative to the local clock. Repeats the last entry.
pub struct ScriptedTime {
    offsets: Mutex<VecDeque<Result<i64, String>>>,
}

impl ScriptedTime {
    pub fn new(offsets: Vec<Result<i64, String>>) -> Arc<Self> {
        Arc::new(ScriptedTime {
            offsets: Mutex::new(offsets.into()),
        })
    }
}

#[async_trait]
impl TimeSource for ScriptedTime {
    async fn now(&self) -> EngineResult<DateTime<Utc>> {
        let next = {
            let mut offsets = self.offsets.lock().unwrap();
            if offsets.len() > 1 {
                offsets.pop_front()
            } else {
                offsets.front().cloned()
            }
        };
        match next {
            Some(Ok(offset)) => Ok(Utc::now() + chrono::Duration::milliseconds(offset)),
            Some(Err(message)) => Err(EngineError::ClockSyncUnavailable(message)),
            None => Err(EngineError::ClockSyncUnavailable("no time source".into())),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn store(id: &str) -> StoreConfig {
    StoreConfig::new(id, format!("Store {}", id.to_uppercase()), format!("https://example.com/{id}"))
}

/// Config with no time-critical stages, so clock state does not matter.
pub fn untimed_config(stores: Vec<StoreConfig>) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.stores = stores;
    config.session.time_critical_stages.clear();
    config
}

pub fn clock_config() -> ClockConfig {
    ClockConfig {
        interval: Duration::from_secs(60),
        request_timeout: Duration::from_secs(1),
        ..ClockConfig::default()
    }
}

pub struct Harness {
    pub supervisor: AutomationSupervisor,
    pub drivers: ScriptedDrivers,
    pub clock: ClockSyncService,
    pub events: EventBus,
}

pub fn harness(config: EngineConfig, drivers: ScriptedDrivers, time: Arc<ScriptedTime>) -> Harness {
    let events = EventBus::default();
    let clock = ClockSyncService::new(time, clock_config(), events.clone());
    let supervisor = AutomationSupervisor::new(config, clock.clone(), events.clone(), Arc::new(drivers.clone()));
    Harness {
        supervisor,
        drivers,
        clock,
        events,
    }
}

/// Polls the aggregate until `predicate` holds.
pub async fn wait_until<F>(supervisor: &AutomationSupervisor, mut predicate: F) -> AggregateProgress
where
    F: FnMut(&AggregateProgress) -> bool,
{
    for _ in 0..500 {
        let aggregate = supervisor.aggregate_progress().await;
        if predicate(&aggregate) {
            return aggregate;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "condition never held: {:#?}",
        supervisor.aggregate_progress().await
    );
}
