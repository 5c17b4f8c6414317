use crate::condition::SuccessCondition;
use crate::locator::StrategyKind;
use crate::protocol::NodeId;
use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An element found during one resolution attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub element: NodeId,
    /// Indices into the bundle's strategy list.
    pub matched_strategies: BTreeSet<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_from_hint: Option<f64>,
    pub specificity_score: u32,
    /// Matched strategies flagged `has_dynamic_parts`.
    #[serde(default)]
    pub dynamic_matches: usize,
    pub document_index: usize,
}

impl Candidate {
    pub fn new(element: NodeId, document_index: usize) -> Self {
        Self {
            element,
            matched_strategies: BTreeSet::new(),
            distance_from_hint: None,
            specificity_score: 0,
            dynamic_matches: 0,
            document_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Found { candidate: Candidate },
    Ambiguous { candidates: Vec<Candidate> },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStrategy {
    pub index: usize,
    pub kind: StrategyKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveMetrics {
    pub strategies_tried: usize,
    pub elapsed_ms: u64,
    pub polls: u32,
    /// False when the bundle's scope could not be resolved to a subtree root.
    pub scope_resolved: bool,
    /// Whether the winner was visible and enabled when returned.
    pub actionable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_strategies: Vec<SkippedStrategy>,
    /// Set when an overall deadline or cancellation stopped the poll loop.
    #[serde(default)]
    pub cancelled: bool,
    /// Set when the scope lookup itself failed unexpectedly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResult {
    #[serde(flatten)]
    pub outcome: ResolveOutcome,
    pub metrics: ResolveMetrics,
}

impl ResolveResult {
    pub fn found(&self) -> Option<&Candidate> {
        match &self.outcome {
            ResolveOutcome::Found { candidate } => Some(candidate),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.found().is_some()
    }

    /// Candidates considered, for reporting.
    pub fn candidates(&self) -> Vec<&Candidate> {
        match &self.outcome {
            ResolveOutcome::Found { candidate } => vec![candidate],
            ResolveOutcome::Ambiguous { candidates } => candidates.iter().collect(),
            ResolveOutcome::NotFound => vec![],
        }
    }

    /// Failure classification for a non-`Found` result.
    pub fn failure(&self) -> Option<ReplayFailure> {
        match &self.outcome {
            ResolveOutcome::Found { .. } => None,
            ResolveOutcome::Ambiguous { candidates } => Some(ReplayFailure::Ambiguous {
                candidates: candidates.iter().map(|c| c.element).collect(),
            }),
            ResolveOutcome::NotFound if self.metrics.cancelled => Some(ReplayFailure::Timeout),
            ResolveOutcome::NotFound if !self.metrics.scope_resolved => {
                Some(ReplayFailure::ScopeNotFound)
            }
            ResolveOutcome::NotFound
                if self.metrics.strategies_tried > 0
                    && self.metrics.skipped_strategies.len() == self.metrics.strategies_tried =>
            {
                Some(ReplayFailure::InvalidStrategy {
                    reason: self
                        .metrics
                        .skipped_strategies
                        .iter()
                        .map(|s| s.reason.clone())
                        .collect::<Vec<_>>()
                        .join("; "),
                })
            }
            ResolveOutcome::NotFound => Some(ReplayFailure::NoCandidates),
        }
    }
}

/// Outcome of evaluating a success condition. Mirrors the condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub condition: SuccessCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<VerificationResult>,
}

impl VerificationResult {
    pub fn pass(condition: &SuccessCondition, elapsed_ms: u64) -> Self {
        Self {
            passed: true,
            condition: condition.clone(),
            failure_reason: None,
            elapsed_ms,
            details: vec![],
        }
    }

    pub fn fail(condition: &SuccessCondition, reason: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            passed: false,
            condition: condition.clone(),
            failure_reason: Some(reason.into()),
            elapsed_ms,
            details: vec![],
        }
    }

    pub fn with_details(mut self, details: Vec<VerificationResult>) -> Self {
        self.details = details;
        self
    }

    /// Deepest failing node, following the first failing child at each level.
    ///
    /// A failed `Not` has a passing child, so the `Not` itself is returned.
    pub fn first_failed_leaf(&self) -> Option<&VerificationResult> {
        if self.passed {
            return None;
        }
        match self.details.iter().find(|d| !d.passed) {
            Some(child) => child.first_failed_leaf(),
            None => Some(self),
        }
    }
}

/// Result of a state wait primitive. Reasons are attached by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitResult {
    pub success: bool,
}

impl WaitResult {
    pub const OK: WaitResult = WaitResult { success: true };
    pub const TIMED_OUT: WaitResult = WaitResult { success: false };
}

impl From<bool> for WaitResult {
    fn from(success: bool) -> Self {
        WaitResult { success }
    }
}

/// Failure taxonomy surfaced to the replay driver and the correction channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayFailure {
    ScopeNotFound,
    NoCandidates,
    Ambiguous { candidates: Vec<NodeId> },
    ConditionFailed { leaf: String, reason: String },
    Timeout,
    InvalidStrategy { reason: String },
}

impl fmt::Display for ReplayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayFailure::ScopeNotFound => write!(f, "scope not found"),
            ReplayFailure::NoCandidates => write!(f, "no candidates"),
            ReplayFailure::Ambiguous { candidates } => {
                write!(f, "ambiguous: {} equally strong candidates", candidates.len())
            }
            ReplayFailure::ConditionFailed { leaf, reason } => {
                write!(f, "condition failed: {} ({})", leaf, reason)
            }
            ReplayFailure::Timeout => write!(f, "timed out"),
            ReplayFailure::InvalidStrategy { reason } => write!(f, "invalid strategy: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub element: NodeId,
    pub score: u32,
    pub matched: Vec<StrategyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_from_hint: Option<f64>,
}

/// Structured failure emitted on the correction channel when recovery is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub step_key: String,
    pub failure: ReplayFailure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub candidates: Vec<CandidateSummary>,
    #[serde(default)]
    pub reasons: Vec<String>,
}
