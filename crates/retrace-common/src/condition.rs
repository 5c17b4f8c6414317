//! Success conditions: what "the action worked" means for a step.
//!
//! Compound nodes carry no timeout; every leaf carries its own.

use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SuccessCondition {
    All { children: Vec<SuccessCondition> },
    Any { children: Vec<SuccessCondition> },
    Not { child: Box<SuccessCondition> },
    Element(ElementCondition),
    State(StateCondition),
}

impl SuccessCondition {
    pub fn all(children: Vec<SuccessCondition>) -> Self {
        SuccessCondition::All { children }
    }

    pub fn any(children: Vec<SuccessCondition>) -> Self {
        SuccessCondition::Any { children }
    }

    pub fn negate(child: SuccessCondition) -> Self {
        SuccessCondition::Not {
            child: Box::new(child),
        }
    }

    pub fn element(kind: ElementCheck, target: impl Into<String>, timeout_ms: u64) -> Self {
        SuccessCondition::Element(ElementCondition::new(kind, target, timeout_ms))
    }

    pub fn state(kind: StateCheck, value: Option<&str>, timeout_ms: u64) -> Self {
        SuccessCondition::State(StateCondition {
            kind,
            value: value.map(str::to_string),
            timeout_ms,
        })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SuccessCondition::Element(_) | SuccessCondition::State(_))
    }

    /// Short human-readable description, used in failure reasons.
    pub fn describe(&self) -> String {
        match self {
            SuccessCondition::All { children } => format!("all({} conditions)", children.len()),
            SuccessCondition::Any { children } => format!("any({} conditions)", children.len()),
            SuccessCondition::Not { child } => format!("not({})", child.describe()),
            SuccessCondition::Element(c) => c.to_string(),
            SuccessCondition::State(c) => c.to_string(),
        }
    }

    /// Sum of leaf timeouts: the upper bound of a full evaluation.
    pub fn worst_case_ms(&self) -> u64 {
        match self {
            SuccessCondition::All { children } | SuccessCondition::Any { children } => {
                children.iter().map(|c| c.worst_case_ms()).sum()
            }
            SuccessCondition::Not { child } => child.worst_case_ms(),
            SuccessCondition::Element(c) => c.timeout_ms,
            SuccessCondition::State(c) => c.timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCheck {
    Visible,
    Gone,
    Enabled,
    Disabled,
    Checked,
    Unchecked,
    Focused,
    HasText,
    HasValue,
    HasAttribute,
}

impl ElementCheck {
    pub fn needs_expected_value(self) -> bool {
        matches!(
            self,
            ElementCheck::HasText | ElementCheck::HasValue | ElementCheck::HasAttribute
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementCheck::Visible => "visible",
            ElementCheck::Gone => "gone",
            ElementCheck::Enabled => "enabled",
            ElementCheck::Disabled => "disabled",
            ElementCheck::Checked => "checked",
            ElementCheck::Unchecked => "unchecked",
            ElementCheck::Focused => "focused",
            ElementCheck::HasText => "has_text",
            ElementCheck::HasValue => "has_value",
            ElementCheck::HasAttribute => "has_attribute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCondition {
    #[serde(rename = "type")]
    pub kind: ElementCheck,
    /// CSS selector, falling back to a text lookup when it matches nothing.
    pub target: String,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl ElementCondition {
    pub fn new(kind: ElementCheck, target: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            kind,
            target: target.into(),
            timeout_ms,
            expected_value: None,
            scope: None,
        }
    }

    pub fn expecting(mut self, value: impl Into<String>) -> Self {
        self.expected_value = Some(value.into());
        self
    }

    pub fn within(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

impl From<ElementCondition> for SuccessCondition {
    fn from(value: ElementCondition) -> Self {
        SuccessCondition::Element(value)
    }
}

impl fmt::Display for ElementCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element {:?} {}", self.target, self.kind.as_str())?;
        if let Some(expected) = &self.expected_value {
            write!(f, " {:?}", expected)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCheck {
    /// `value` is the URL to move away from; the current URL when absent.
    UrlChanged,
    UrlContains,
    /// `value` is a regular expression.
    UrlMatches,
    TextAppeared,
    TextGone,
    TitleContains,
    /// `value` is the quiet window in ms (default 300).
    DomStable,
    /// `value` is the idle window in ms (default 500).
    NetworkIdle,
    LoadersGone,
}

impl StateCheck {
    pub fn as_str(self) -> &'static str {
        match self {
            StateCheck::UrlChanged => "url_changed",
            StateCheck::UrlContains => "url_contains",
            StateCheck::UrlMatches => "url_matches",
            StateCheck::TextAppeared => "text_appeared",
            StateCheck::TextGone => "text_gone",
            StateCheck::TitleContains => "title_contains",
            StateCheck::DomStable => "dom_stable",
            StateCheck::NetworkIdle => "network_idle",
            StateCheck::LoadersGone => "loaders_gone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCondition {
    #[serde(rename = "type")]
    pub kind: StateCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timeout_ms: u64,
}

impl From<StateCondition> for SuccessCondition {
    fn from(value: StateCondition) -> Self {
        SuccessCondition::State(value)
    }
}

impl fmt::Display for StateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{} {:?}", self.kind.as_str(), v),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}
