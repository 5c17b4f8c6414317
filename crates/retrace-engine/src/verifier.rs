//! Success-condition evaluation.
//!
//! `All` stops at its first failing child, `Any` at its first passing child. Leaves poll
//! through the [`StateWaiter`] until they hold or their own timeout passes, so a compound
//! condition costs at most the sum of its leaf timeouts.

use crate::wait::{DEFAULT_DOM_QUIET_MS, DEFAULT_NETWORK_IDLE_MS, StateWaiter};
use async_recursion::async_recursion;
use retrace_common::condition::{ElementCondition, StateCheck, StateCondition, SuccessCondition};
use retrace_common::result::{VerificationResult, WaitResult};
use retrace_common::scope::Scope;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("{check} requires a value")]
    MissingValue { check: &'static str },
    #[error("{check} expects a duration in ms, got '{value}'")]
    InvalidDuration { check: &'static str, value: String },
}

pub struct Verifier<'a> {
    waiter: StateWaiter<'a>,
}

impl<'a> Verifier<'a> {
    pub fn new(waiter: StateWaiter<'a>) -> Self {
        Self { waiter }
    }

    pub fn waiter(&self) -> &StateWaiter<'a> {
        &self.waiter
    }

    /// Evaluate `condition`. `scope` is the default for element leaves without one.
    ///
    /// Never errors: malformed leaves come back as failed results.
    pub async fn verify(
        &self,
        condition: &SuccessCondition,
        scope: Option<&Scope>,
    ) -> VerificationResult {
        let started = self.waiter.clock().now_ms();
        let result = match self.evaluate(condition, scope).await {
            Ok(result) => result,
            Err(e) => VerificationResult::fail(condition, e.to_string(), self.since(started)),
        };
        debug!(
            passed = result.passed,
            elapsed_ms = result.elapsed_ms,
            "verified {}",
            condition.describe()
        );
        result
    }

    #[async_recursion]
    async fn evaluate(
        &self,
        condition: &SuccessCondition,
        scope: Option<&Scope>,
    ) -> Result<VerificationResult, VerificationError> {
        let started = self.waiter.clock().now_ms();
        match condition {
            SuccessCondition::All { children } => {
                let mut details = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    let result = self.evaluate(child, scope).await?;
                    let passed = result.passed;
                    let reason = result.failure_reason.clone();
                    details.push(result);
                    if !passed {
                        let reason = format!(
                            "condition {} of {} failed: {}: {}",
                            i + 1,
                            children.len(),
                            child.describe(),
                            reason.unwrap_or_default()
                        );
                        return Ok(VerificationResult::fail(condition, reason, self.since(started))
                            .with_details(details));
                    }
                }
                Ok(VerificationResult::pass(condition, self.since(started)).with_details(details))
            }
            SuccessCondition::Any { children } => {
                let mut details = Vec::with_capacity(children.len());
                for child in children {
                    let result = self.evaluate(child, scope).await?;
                    let passed = result.passed;
                    details.push(result);
                    if passed {
                        return Ok(VerificationResult::pass(condition, self.since(started))
                            .with_details(details));
                    }
                }
                let reason = if children.is_empty() {
                    "no alternatives".to_string()
                } else {
                    format!("none of {} alternatives held", children.len())
                };
                Ok(VerificationResult::fail(condition, reason, self.since(started))
                    .with_details(details))
            }
            SuccessCondition::Not { child } => {
                let inner = self.evaluate(child, scope).await?;
                let elapsed = self.since(started);
                let result = if inner.passed {
                    VerificationResult::fail(
                        condition,
                        format!("{} held but should not", child.describe()),
                        elapsed,
                    )
                } else {
                    VerificationResult::pass(condition, elapsed)
                };
                Ok(result.with_details(vec![inner]))
            }
            SuccessCondition::Element(leaf) => Ok(self.element(condition, leaf, scope, started).await),
            SuccessCondition::State(leaf) => self.state(condition, leaf, scope, started).await,
        }
    }

    async fn element(
        &self,
        condition: &SuccessCondition,
        leaf: &ElementCondition,
        scope: Option<&Scope>,
        started: u64,
    ) -> VerificationResult {
        let wait = self.waiter.wait_for_element(leaf, scope).await;
        let elapsed = self.since(started);
        if wait.result.success {
            VerificationResult::pass(condition, elapsed)
        } else {
            VerificationResult::fail(
                condition,
                format!("{} after {}ms; saw {}", leaf, elapsed, wait.observed),
                elapsed,
            )
        }
    }

    async fn state(
        &self,
        condition: &SuccessCondition,
        leaf: &StateCondition,
        scope: Option<&Scope>,
        started: u64,
    ) -> Result<VerificationResult, VerificationError> {
        let w = &self.waiter;
        let timeout = leaf.timeout_ms;
        let value = leaf.value.as_deref();
        let result: WaitResult = match leaf.kind {
            StateCheck::UrlChanged => w.wait_for_url_change(value, timeout).await,
            StateCheck::UrlContains => w.wait_for_url_contains(required(leaf)?, timeout).await,
            StateCheck::UrlMatches => w.wait_for_url_matches(required(leaf)?, timeout).await,
            StateCheck::TextAppeared => w.wait_for_text(required(leaf)?, scope, timeout).await,
            StateCheck::TextGone => w.wait_for_text_gone(required(leaf)?, scope, timeout).await,
            StateCheck::TitleContains => {
                w.wait_for_title_contains(required(leaf)?, timeout).await
            }
            StateCheck::DomStable => {
                let quiet = duration(leaf, DEFAULT_DOM_QUIET_MS)?;
                w.wait_for_dom_stable(quiet, timeout, scope).await
            }
            StateCheck::NetworkIdle => {
                let idle = duration(leaf, DEFAULT_NETWORK_IDLE_MS)?;
                w.wait_for_network_idle(idle, timeout).await
            }
            StateCheck::LoadersGone => w.wait_for_loaders_gone(timeout).await,
        };
        let elapsed = self.since(started);
        Ok(if result.success {
            VerificationResult::pass(condition, elapsed)
        } else {
            VerificationResult::fail(
                condition,
                format!("{} not met within {}ms", leaf, timeout),
                elapsed,
            )
        })
    }

    fn since(&self, started: u64) -> u64 {
        self.waiter.clock().now_ms().saturating_sub(started)
    }
}

fn required(leaf: &StateCondition) -> Result<&str, VerificationError> {
    match leaf.value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(VerificationError::MissingValue {
            check: leaf.kind.as_str(),
        }),
    }
}

fn duration(leaf: &StateCondition, default_ms: u64) -> Result<u64, VerificationError> {
    match leaf.value.as_deref().map(str::trim) {
        None | Some("") => Ok(default_ms),
        Some(v) => v.parse().map_err(|_| VerificationError::InvalidDuration {
            check: leaf.kind.as_str(),
            value: v.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_defaults_and_rejects_garbage() {
        let leaf = StateCondition {
            kind: StateCheck::DomStable,
            value: None,
            timeout_ms: 1_000,
        };
        assert_eq!(duration(&leaf, 300).unwrap(), 300);

        let leaf = StateCondition {
            value: Some("250".into()),
            ..leaf
        };
        assert_eq!(duration(&leaf, 300).unwrap(), 250);

        let leaf = StateCondition {
            value: Some("soon".into()),
            ..leaf
        };
        assert!(matches!(
            duration(&leaf, 300),
            Err(VerificationError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_required_rejects_empty() {
        let leaf = StateCondition {
            kind: StateCheck::UrlContains,
            value: Some(String::new()),
            timeout_ms: 10,
        };
        assert_eq!(
            required(&leaf).unwrap_err().to_string(),
            "url_contains requires a value"
        );
    }
}
