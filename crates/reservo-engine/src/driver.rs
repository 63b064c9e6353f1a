//! # Page Driver
//!
//! The capability a session uses to act on a reservation page. Real browser
//! control lives outside this crate; the engine only sees the trait.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PageDriverFactory (shared, Arc)                                        │
//! │        │ create(store)                                                  │
//! │        ├──────────────► Box<dyn PageDriver>  owned by session A         │
//! │        ├──────────────► Box<dyn PageDriver>  owned by session B         │
//! │        └──────────────► Box<dyn PageDriver>  owned by session C         │
//! │                                                                         │
//! │  One driver per session. close() runs on every exit path.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use reservo_core::{PageStep, ReservationStage, StoreConfig, WaitState};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Traits
// =============================================================================

/// Page automation primitives.
///
/// The `bool` returns mean "the element was found and acted on". `false` is
/// a stage failure, an `Err` is a transport or driver failure.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&mut self, url: &str) -> EngineResult<()>;

    async fn wait_for(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> EngineResult<bool>;

    async fn click(&mut self, selector: &str) -> EngineResult<bool>;

    async fn fill(&mut self, selector: &str, text: &str) -> EngineResult<bool>;

    async fn evaluate(&mut self, script: &str) -> EngineResult<Value>;

    /// Releases the page. Must be safe to call more than once.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Creates one driver per session.
#[async_trait]
pub trait PageDriverFactory: Send + Sync {
    async fn create(&self, store: &StoreConfig) -> EngineResult<Box<dyn PageDriver>>;
}

// =============================================================================
// Step Execution
// =============================================================================

/// Runs one step with `timeout` as the upper bound.
///
/// Returns the evaluated value when the step is a capturing `evaluate`.
pub async fn execute_step(
    driver: &mut dyn PageDriver,
    stage: ReservationStage,
    step: &PageStep,
    timeout: Duration,
) -> EngineResult<Option<Value>> {
    let bound = match step {
        PageStep::WaitFor {
            timeout_ms: Some(ms),
            ..
        } => Duration::from_millis(*ms),
        _ => timeout,
    };

    debug!(%stage, action = step.kind(), "Executing page step");

    let outcome = match tokio::time::timeout(bound, run_step(driver, step, bound)).await {
        Ok(result) => result.map_err(|e| match e {
            EngineError::StageActionFailure { .. } => e,
            other => EngineError::stage(stage, other.to_string()),
        })?,
        Err(_) => {
            return Err(EngineError::stage(
                stage,
                format!("{} timed out after {}ms", describe(step), bound.as_millis()),
            ))
        }
    };

    match outcome {
        StepOutcome::Done(value) => Ok(value),
        StepOutcome::NotFound => Err(EngineError::stage(
            stage,
            format!("selector not found: {}", selector_of(step)),
        )),
    }
}

enum StepOutcome {
    Done(Option<Value>),
    NotFound,
}

async fn run_step(
    driver: &mut dyn PageDriver,
    step: &PageStep,
    bound: Duration,
) -> EngineResult<StepOutcome> {
    let found = match step {
        PageStep::Navigate { url } => {
            driver.navigate(url).await?;
            true
        }
        PageStep::WaitFor {
            selector, state, ..
        } => driver.wait_for(selector, *state, bound).await?,
        PageStep::Click { selector } => driver.click(selector).await?,
        PageStep::Fill { selector, text } => driver.fill(selector, text).await?,
        PageStep::Evaluate { script, capture } => {
            let value = driver.evaluate(script).await?;
            return Ok(StepOutcome::Done(capture.then_some(value)));
        }
    };
    Ok(if found {
        StepOutcome::Done(None)
    } else {
        StepOutcome::NotFound
    })
}

fn selector_of(step: &PageStep) -> &str {
    match step {
        PageStep::WaitFor { selector, .. }
        | PageStep::Click { selector }
        | PageStep::Fill { selector, .. } => selector,
        PageStep::Navigate { url } => url,
        PageStep::Evaluate { .. } => "<script>",
    }
}

fn describe(step: &PageStep) -> String {
    format!("{} {}", step.kind(), selector_of(step))
}

// =============================================================================
// Dry-Run Driver
// =============================================================================

/// Logs every call and reports success. Lets the engine run end to end
/// without a browser.
pub struct DryRunDriver {
    store_id: String,
    closed: bool,
}

impl DryRunDriver {
    pub fn new(store_id: impl Into<String>) -> Self {
        DryRunDriver {
            store_id: store_id.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl PageDriver for DryRunDriver {
    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        debug!(store_id = %self.store_id, url, "dry-run navigate");
        Ok(())
    }

    async fn wait_for(
        &mut self,
        selector: &str,
        state: WaitState,
        _timeout: Duration,
    ) -> EngineResult<bool> {
        debug!(store_id = %self.store_id, selector, %state, "dry-run wait_for");
        Ok(true)
    }

    async fn click(&mut self, selector: &str) -> EngineResult<bool> {
        debug!(store_id = %self.store_id, selector, "dry-run click");
        Ok(true)
    }

    async fn fill(&mut self, selector: &str, text: &str) -> EngineResult<bool> {
        debug!(store_id = %self.store_id, selector, chars = text.chars().count(), "dry-run fill");
        Ok(true)
    }

    async fn evaluate(&mut self, script: &str) -> EngineResult<Value> {
        debug!(store_id = %self.store_id, len = script.len(), "dry-run evaluate");
        Ok(Value::String(format!("DRY-RUN-{}", self.store_id)))
    }

    async fn close(&mut self) -> EngineResult<()> {
        if !self.closed {
            debug!(store_id = %self.store_id, "dry-run close");
            self.closed = true;
        }
        Ok(())
    }
}

/// Factory for [`DryRunDriver`].
#[derive(Debug, Default, Clone)]
pub struct DryRunDriverFactory;

#[async_trait]
impl PageDriverFactory for DryRunDriverFactory {
    async fn create(&self, store: &StoreConfig) -> EngineResult<Box<dyn PageDriver>> {
        Ok(Box::new(DryRunDriver::new(store.id.clone())))
    }
}
