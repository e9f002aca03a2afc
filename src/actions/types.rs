use serde::{Deserialize, Serialize};

use crate::driver::uiautomator::{Bounds, UiElement};

/// Declarative descriptor of an on-screen element.
///
/// Matching is a conjunction of the fields present: exact-equality fields
/// must match exactly, `*Contains` fields as a substring, absent fields
/// impose no constraint. At least one field must be set; an empty selector
/// would match everything and is rejected at load time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_desc_contains: Option<String>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        fn blank(field: &Option<String>) -> bool {
            field.as_deref().map_or(true, |v| v.is_empty())
        }
        blank(&self.text)
            && blank(&self.text_contains)
            && blank(&self.resource_id)
            && blank(&self.resource_id_contains)
            && blank(&self.content_desc)
            && blank(&self.content_desc_contains)
    }

    pub fn matches(&self, element: &UiElement) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| have == w)
        }
        fn contains(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| have.contains(w))
        }
        eq(&self.text, &element.text)
            && contains(&self.text_contains, &element.text)
            && eq(&self.resource_id, &element.resource_id)
            && contains(&self.resource_id_contains, &element.resource_id)
            && eq(&self.content_desc, &element.content_desc)
            && contains(&self.content_desc_contains, &element.content_desc)
    }

    /// Short display form for errors and logs.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        let mut push = |name: &str, field: &Option<String>| {
            if let Some(value) = field {
                parts.push(format!("{name}=\"{value}\""));
            }
        };
        push("text", &self.text);
        push("textContains", &self.text_contains);
        push("resourceId", &self.resource_id);
        push("resourceIdContains", &self.resource_id_contains);
        push("contentDesc", &self.content_desc);
        push("contentDescContains", &self.content_desc_contains);
        parts.join(", ")
    }
}

/// First element in document order satisfying any selector.
///
/// Outer loop over elements, inner loop over selectors: an earlier element
/// always wins over an earlier selector.
pub fn match_first<'a>(
    elements: &[UiElement],
    selectors: &'a [Selector],
) -> Option<(&'a Selector, Bounds)> {
    for element in elements {
        for selector in selectors {
            if selector.matches(element) {
                return Some((selector, element.bounds));
            }
        }
    }
    None
}

/// One unit of device interaction or control-flow wrapping within an action.
///
/// Composite steps (`retry`, `repeat`) nest arbitrarily deep; a step tree is
/// immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Step {
    EnsureDeviceReady {
        #[serde(default)]
        timeout: Option<u64>,
    },
    WakeAndUnlock,
    LaunchApp {
        package: String,
        #[serde(default)]
        activity: Option<String>,
    },
    EnsureAppOpen {
        package: String,
        #[serde(default)]
        activity: Option<String>,
        #[serde(default)]
        already_open_selector: Option<Selector>,
        #[serde(default)]
        delay_if_open: Option<u64>,
        #[serde(default)]
        delay_if_launch: Option<u64>,
    },
    TapSelector {
        selector: Selector,
        #[serde(default)]
        timeout: Option<u64>,
    },
    TapCoordinates {
        x: i32,
        y: i32,
    },
    WaitForText {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },
    WaitForSelector {
        selector: Selector,
        #[serde(default)]
        timeout: Option<u64>,
    },
    WaitForAnySelector {
        selectors: Vec<Selector>,
        #[serde(default)]
        timeout: Option<u64>,
    },
    Sleep {
        duration_ms: u64,
    },
    InputText {
        text: String,
    },
    Keyevent {
        code: String,
    },
    Retry {
        attempts: u32,
        #[serde(default)]
        delay: Option<u64>,
        steps: Vec<Step>,
    },
    Repeat {
        count: u32,
        #[serde(default)]
        delay: Option<u64>,
        steps: Vec<Step>,
    },
}

impl Step {
    /// Tag name, for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Step::EnsureDeviceReady { .. } => "ensure_device_ready",
            Step::WakeAndUnlock => "wake_and_unlock",
            Step::LaunchApp { .. } => "launch_app",
            Step::EnsureAppOpen { .. } => "ensure_app_open",
            Step::TapSelector { .. } => "tap_selector",
            Step::TapCoordinates { .. } => "tap_coordinates",
            Step::WaitForText { .. } => "wait_for_text",
            Step::WaitForSelector { .. } => "wait_for_selector",
            Step::WaitForAnySelector { .. } => "wait_for_any_selector",
            Step::Sleep { .. } => "sleep",
            Step::InputText { .. } => "input_text",
            Step::Keyevent { .. } => "keyevent",
            Step::Retry { .. } => "retry",
            Step::Repeat { .. } => "repeat",
        }
    }
}

/// A named automation task: an ordered step tree with an optional overall
/// deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Action {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.steps.is_empty(), "action has no steps");
        validate_steps(&self.steps)
    }
}

fn validate_steps(steps: &[Step]) -> anyhow::Result<()> {
    for step in steps {
        match step {
            Step::TapSelector { selector, .. } | Step::WaitForSelector { selector, .. } => {
                validate_selector(selector)?
            }
            Step::WaitForAnySelector { selectors, .. } => {
                anyhow::ensure!(
                    !selectors.is_empty(),
                    "wait_for_any_selector needs at least one selector"
                );
                for selector in selectors {
                    validate_selector(selector)?;
                }
            }
            Step::WaitForText {
                text,
                text_contains,
                ..
            } => {
                let has_target = text.as_deref().is_some_and(|t| !t.is_empty())
                    || text_contains.as_deref().is_some_and(|t| !t.is_empty());
                anyhow::ensure!(has_target, "wait_for_text needs text or textContains");
            }
            Step::EnsureAppOpen {
                already_open_selector: Some(selector),
                ..
            } => validate_selector(selector)?,
            Step::Retry {
                attempts, steps, ..
            } => {
                anyhow::ensure!(*attempts >= 1, "retry needs attempts >= 1");
                anyhow::ensure!(!steps.is_empty(), "retry has no steps");
                validate_steps(steps)?;
            }
            Step::Repeat { count, steps, .. } => {
                anyhow::ensure!(*count >= 1, "repeat needs count >= 1");
                anyhow::ensure!(!steps.is_empty(), "repeat has no steps");
                validate_steps(steps)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_selector(selector: &Selector) -> anyhow::Result<()> {
    anyhow::ensure!(
        !selector.is_empty(),
        "selector must set at least one field"
    );
    Ok(())
}
