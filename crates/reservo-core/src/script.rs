//! # Stage Scripts
//!
//! Declarative page steps executed for each stage. A store may override any
//! stage in its config; otherwise the default script below is used.
//!
//! ## Config Format
//! ```toml
//! [[stores]]
//! id = "store-a"
//! name = "Store A"
//! url = "https://reserve.example.com/a"
//!
//! [stores.script]
//! agreement = [
//!     { action = "click", selector = "#agree-all" },
//!     { action = "click", selector = "button.next" },
//! ]
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{ReservationStage, StoreConfig};

/// Element state awaited by a `wait_for` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Attached,
    Detached,
    #[default]
    Visible,
    Hidden,
}

impl std::fmt::Display for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitState::Attached => write!(f, "attached"),
            WaitState::Detached => write!(f, "detached"),
            WaitState::Visible => write!(f, "visible"),
            WaitState::Hidden => write!(f, "hidden"),
        }
    }
}

/// One page-driver call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PageStep {
    Navigate {
        url: String,
    },
    WaitFor {
        selector: String,
        #[serde(default)]
        state: WaitState,
        /// Overrides the session's action timeout for this wait.
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Click {
        selector: String,
    },
    Fill {
        selector: String,
        text: String,
    },
    Evaluate {
        script: String,
        /// Store the returned value as the session result.
        #[serde(default)]
        capture: bool,
    },
}

impl PageStep {
    /// Short name used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            PageStep::Navigate { .. } => "navigate",
            PageStep::WaitFor { .. } => "wait_for",
            PageStep::Click { .. } => "click",
            PageStep::Fill { .. } => "fill",
            PageStep::Evaluate { .. } => "evaluate",
        }
    }

    fn wait(selector: &str) -> Self {
        PageStep::WaitFor {
            selector: selector.to_string(),
            state: WaitState::Visible,
            timeout_ms: None,
        }
    }

    fn click(selector: &str) -> Self {
        PageStep::Click {
            selector: selector.to_string(),
        }
    }

    fn fill(selector: &str, text: &str) -> Self {
        PageStep::Fill {
            selector: selector.to_string(),
            text: text.to_string(),
        }
    }
}

/// Applicant details typed into the reservation form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReservationProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

/// Per-stage step overrides. `complete` has no action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageScript {
    #[serde(default)]
    pub selection: Option<Vec<PageStep>>,
    #[serde(default)]
    pub agreement: Option<Vec<PageStep>>,
    #[serde(default)]
    pub date_selection: Option<Vec<PageStep>>,
    #[serde(default)]
    pub pass_auth: Option<Vec<PageStep>>,
    #[serde(default)]
    pub form: Option<Vec<PageStep>>,
    #[serde(default)]
    pub confirmation: Option<Vec<PageStep>>,
}

impl StageScript {
    /// Override for a stage, if configured.
    pub fn steps_for(&self, stage: ReservationStage) -> Option<&[PageStep]> {
        let steps = match stage {
            ReservationStage::Selection => &self.selection,
            ReservationStage::Agreement => &self.agreement,
            ReservationStage::DateSelection => &self.date_selection,
            ReservationStage::PassAuth => &self.pass_auth,
            ReservationStage::Form => &self.form,
            ReservationStage::Confirmation => &self.confirmation,
            ReservationStage::Complete => return None,
        };
        steps.as_deref()
    }
}

/// Steps for `stage`: the store's override, else the default.
pub fn steps_for_stage(
    store: &StoreConfig,
    profile: &ReservationProfile,
    stage: ReservationStage,
) -> Vec<PageStep> {
    if let Some(steps) = store.script.as_ref().and_then(|s| s.steps_for(stage)) {
        return steps.to_vec();
    }
    default_steps(store, profile, stage)
}

/// Built-in script keyed on `data-reservation-*` attributes.
fn default_steps(
    store: &StoreConfig,
    profile: &ReservationProfile,
    stage: ReservationStage,
) -> Vec<PageStep> {
    match stage {
        ReservationStage::Selection => vec![
            PageStep::Navigate {
                url: store.url.clone(),
            },
            PageStep::wait("[data-reservation-item]"),
            PageStep::click("[data-reservation-item]"),
        ],
        ReservationStage::Agreement => vec![
            PageStep::wait("[data-reservation-agreement]"),
            PageStep::click("[data-reservation-agreement] input[type=checkbox]"),
            PageStep::click("[data-reservation-next]"),
        ],
        ReservationStage::DateSelection => vec![
            PageStep::wait("[data-reservation-date]:not([disabled])"),
            PageStep::click("[data-reservation-date]:not([disabled])"),
            PageStep::click("[data-reservation-next]"),
        ],
        ReservationStage::PassAuth => vec![
            PageStep::wait("[data-reservation-pass]"),
            PageStep::click("[data-reservation-pass]"),
        ],
        ReservationStage::Form => vec![
            PageStep::wait("form[data-reservation-form]"),
            PageStep::fill("form[data-reservation-form] [name=name]", &profile.name),
            PageStep::fill("form[data-reservation-form] [name=phone]", &profile.phone),
            PageStep::fill("form[data-reservation-form] [name=email]", &profile.email),
        ],
        ReservationStage::Confirmation => vec![
            PageStep::click("[data-reservation-submit]"),
            PageStep::wait("[data-reservation-number]"),
            PageStep::Evaluate {
                script: "document.querySelector('[data-reservation-number]')?.textContent?.trim()"
                    .to_string(),
                capture: true,
            },
        ],
        ReservationStage::Complete => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_script_covers_action_stages() {
        let store = StoreConfig::new("a", "A", "https://example.com/a");
        let profile = ReservationProfile::default();
        for stage in ReservationStage::ALL {
            let steps = steps_for_stage(&store, &profile, stage);
            assert_eq!(steps.is_empty(), stage.is_final(), "stage {stage}");
        }
        let first = &steps_for_stage(&store, &profile, ReservationStage::Selection)[0];
        assert_eq!(
            first,
            &PageStep::Navigate {
                url: "https://example.com/a".into()
            }
        );
    }

    #[test]
    fn test_form_uses_profile() {
        let store = StoreConfig::new("a", "A", "https://example.com/a");
        let profile = ReservationProfile {
            name: "Kim".into(),
            phone: "010-0000-0000".into(),
            email: "kim@example.com".into(),
        };
        let steps = steps_for_stage(&store, &profile, ReservationStage::Form);
        assert!(steps.contains(&PageStep::fill("form[data-reservation-form] [name=name]", "Kim")));
    }

    #[test]
    fn test_store_override() {
        let mut store = StoreConfig::new("a", "A", "https://example.com/a");
        store.script = Some(StageScript {
            agreement: Some(vec![PageStep::click("#agree")]),
            ..Default::default()
        });
        let profile = ReservationProfile::default();
        assert_eq!(
            steps_for_stage(&store, &profile, ReservationStage::Agreement),
            vec![PageStep::click("#agree")]
        );
        assert_eq!(steps_for_stage(&store, &profile, ReservationStage::Selection).len(), 3);
    }

    #[test]
    fn test_step_deserialization() {
        let step: PageStep =
            serde_json::from_str(r##"{"action":"wait_for","selector":"#x"}"##).unwrap();
        assert_eq!(step.kind(), "wait_for");
        assert_eq!(
            step,
            PageStep::WaitFor {
                selector: "#x".into(),
                state: WaitState::Visible,
                timeout_ms: None
            }
        );
    }
}
