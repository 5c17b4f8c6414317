use crate::protocol::NodeId;
use thiserror::Error;

/// Errors raised by a DOM accessor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("Scope not found: {0}")]
    ScopeNotFound(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Element {0} is detached")]
    Detached(NodeId),

    #[error("DOM unavailable: {0}")]
    Unavailable(String),
}

impl DomError {
    pub fn invalid(selector: &str, reason: impl Into<String>) -> Self {
        DomError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that only mean "no match right now" and are safe to poll through.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomError::Detached(_) | DomError::ScopeNotFound(_))
    }
}
