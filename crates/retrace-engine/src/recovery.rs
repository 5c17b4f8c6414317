//! Bounded, ordered recovery for failed resolutions and verifications.
//!
//! Each step runs at most once per failure, in a fixed order:
//!
//! 1. widen the scope one level when it resolved but held no candidates
//! 2. drop TEXT and POSITION strategies when tied candidates matched them
//! 3. scroll a found but not actionable winner into view and re-check
//! 4. for a failed verification, wait for the page to settle and verify once more
//!
//! When nothing helps a [`FailureDescriptor`] goes to the correction channel. The recorded
//! bundle is never modified; every attempt works on a derived copy.

use crate::clock::Clock;
use crate::config::schema::{RecoveryConfig, WaitConfig};
use crate::corrections::CorrectionSink;
use crate::dom::DomAccessor;
use crate::extract::FeatureExtractor;
use crate::resolution::{ResolveOptions, Resolver};
use crate::verifier::Verifier;
use retrace_common::condition::SuccessCondition;
use retrace_common::locator::{LocatorBundle, LocatorStrategy, StrategyKind};
use retrace_common::protocol::NodeId;
use retrace_common::result::{
    CandidateSummary, FailureDescriptor, ReplayFailure, ResolveOutcome, ResolveResult,
    VerificationResult,
};
use retrace_common::scope::Scope;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

const WEAK_KINDS: [StrategyKind; 2] = [StrategyKind::Text, StrategyKind::Position];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    WidenedScope { from: Scope, to: Scope },
    DroppedWeakStrategies { dropped: usize },
    ScrolledIntoView { element: NodeId },
    SettledAndReverified,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::WidenedScope { from, to } => {
                write!(f, "widened scope {} -> {}", from, to)
            }
            RecoveryAction::DroppedWeakStrategies { dropped } => {
                write!(f, "dropped {} text/position strategies", dropped)
            }
            RecoveryAction::ScrolledIntoView { element } => {
                write!(f, "scrolled {} into view", element)
            }
            RecoveryAction::SettledAndReverified => write!(f, "settled and re-verified"),
        }
    }
}

/// What a resolution recovery produced. `result` is the last attempt's outcome.
#[derive(Debug, Clone)]
pub struct ResolutionRecovery {
    pub result: ResolveResult,
    /// Bundle the final attempt ran with.
    pub bundle: LocatorBundle,
    pub actions: Vec<RecoveryAction>,
    pub recovered: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationRecovery {
    pub result: VerificationResult,
    pub actions: Vec<RecoveryAction>,
    pub recovered: bool,
}

pub struct RecoveryEngine<'a> {
    dom: &'a dyn DomAccessor,
    clock: &'a dyn Clock,
    sink: &'a dyn CorrectionSink,
    config: RecoveryConfig,
    wait: WaitConfig,
}

impl<'a> RecoveryEngine<'a> {
    pub fn new(
        dom: &'a dyn DomAccessor,
        clock: &'a dyn Clock,
        sink: &'a dyn CorrectionSink,
    ) -> Self {
        Self {
            dom,
            clock,
            sink,
            config: RecoveryConfig::default(),
            wait: WaitConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RecoveryConfig, wait: WaitConfig) -> Self {
        self.config = config;
        self.wait = wait;
        self
    }

    /// Try steps 1 to 3 on a resolution that did not produce an actionable winner.
    pub async fn recover_resolution(
        &self,
        bundle: &LocatorBundle,
        failed: ResolveResult,
        options: &ResolveOptions,
    ) -> ResolutionRecovery {
        let resolver = Resolver::new(self.dom, self.clock);
        let mut current = bundle.clone();
        let mut result = failed;
        let mut actions = Vec::new();

        if !self.config.enabled {
            return ResolutionRecovery {
                result,
                bundle: current,
                actions,
                recovered: false,
            };
        }

        if self.config.widen_scope
            && matches!(result.outcome, ResolveOutcome::NotFound)
            && result.metrics.scope_resolved
            && !result.metrics.cancelled
        {
            let from = current.scope_or_page();
            if let Some(to) = from.widen() {
                debug!("Recovery: widening scope {} -> {}", from, to);
                current = current.with_scope(to.clone());
                result = resolver.resolve_scoped(&current, options).await;
                actions.push(RecoveryAction::WidenedScope { from, to });
            }
        }

        if self.config.drop_weak_strategies
            && let ResolveOutcome::Ambiguous { candidates } = &result.outcome
        {
            let weak_tie = candidates.iter().any(|c| {
                c.matched_strategies.iter().any(|&i| {
                    current
                        .strategies
                        .get(i)
                        .is_some_and(|s| s.kind.is_weak())
                })
            });
            let stripped = current.without_kinds(&WEAK_KINDS);
            if weak_tie && !stripped.is_empty() {
                let dropped = current.strategies.len() - stripped.strategies.len();
                debug!("Recovery: dropping {} weak strategies", dropped);
                current = stripped;
                result = resolver.resolve_scoped(&current, options).await;
                actions.push(RecoveryAction::DroppedWeakStrategies { dropped });
            }
        }

        if self.config.scroll_into_view
            && let Some(winner) = result.found()
            && !result.metrics.actionable
        {
            let element = winner.element;
            match self.dom.scroll_into_view(element).await {
                Ok(()) => {
                    debug!("Recovery: scrolled {} into view", element);
                    result = resolver
                        .resolve_scoped(&current, &options.clone().actionable())
                        .await;
                    actions.push(RecoveryAction::ScrolledIntoView { element });
                }
                Err(e) => debug!("Recovery: cannot scroll {}: {}", element, e),
            }
        }

        let recovered =
            result.is_found() && (result.metrics.actionable || !options.require_actionable);
        if recovered && !actions.is_empty() {
            info!(
                "Recovered resolution after {}",
                actions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        ResolutionRecovery {
            result,
            bundle: current,
            actions,
            recovered,
        }
    }

    /// Step 4: wait for loaders and DOM churn to settle, then verify once more.
    pub async fn recover_verification(
        &self,
        verifier: &Verifier<'_>,
        condition: &SuccessCondition,
        scope: Option<&Scope>,
        failed: VerificationResult,
    ) -> VerificationRecovery {
        if !self.config.enabled || !self.config.settle_and_reverify {
            return VerificationRecovery {
                result: failed,
                actions: Vec::new(),
                recovered: false,
            };
        }

        let waiter = verifier.waiter();
        let settle = self.config.settle_timeout_ms;
        if !waiter.wait_for_loaders_gone(settle).await.success {
            debug!("Recovery: loaders still visible after {}ms", settle);
        }
        if !waiter
            .wait_for_dom_stable(self.wait.dom_quiet_ms, settle, scope)
            .await
            .success
        {
            debug!("Recovery: DOM still changing after {}ms", settle);
        }

        let result = verifier.verify(condition, scope).await;
        let recovered = result.passed;
        if recovered {
            info!("Recovered verification of {}", condition.describe());
        }
        VerificationRecovery {
            result,
            actions: vec![RecoveryAction::SettledAndReverified],
            recovered,
        }
    }

    /// Emit the failure on the correction channel.
    pub async fn report(&self, descriptor: FailureDescriptor) {
        warn!(
            step = %descriptor.step_key,
            failure = %descriptor.failure,
            "recovery exhausted"
        );
        self.sink.report_failure(descriptor).await;
    }

    /// Offer one strategy from the recovered element that the bundle lacks.
    pub async fn propose(
        &self,
        step_key: &str,
        bundle: &LocatorBundle,
        element: NodeId,
    ) -> Option<LocatorStrategy> {
        if !self.config.propose_strategies {
            return None;
        }
        let scope = bundle.scope_or_page();
        let strategies = match FeatureExtractor::new(self.dom)
            .strategies(element, &scope)
            .await
        {
            Ok(strategies) => strategies,
            Err(e) => {
                debug!("No strategy proposal for {}: {}", step_key, e);
                return None;
            }
        };
        let proposal = strategies
            .into_iter()
            .find(|s| s.features.unique_match_at_record_time && !bundle.contains(s))?;
        self.sink.suggest_strategy(step_key, proposal.clone()).await;
        Some(proposal)
    }
}

/// Build the descriptor for a resolution that could not be recovered.
pub fn resolution_failure(
    step_key: &str,
    bundle: &LocatorBundle,
    result: &ResolveResult,
    actions: &[RecoveryAction],
) -> FailureDescriptor {
    let failure = result.failure().unwrap_or(ReplayFailure::Timeout);
    let mut reasons = vec![failure.to_string()];
    reasons.extend(
        result
            .metrics
            .skipped_strategies
            .iter()
            .map(|s| format!("{} strategy #{} skipped: {}", s.kind, s.index, s.reason)),
    );
    if let Some(error) = &result.metrics.error {
        reasons.push(error.clone());
    }
    reasons.extend(actions.iter().map(|a| format!("tried: {}", a)));

    FailureDescriptor {
        step_key: step_key.to_string(),
        failure,
        scope: bundle.scope.clone(),
        candidates: summarize(bundle, result),
        reasons,
    }
}

/// Build the descriptor for a verification that could not be recovered.
pub fn verification_failure(
    step_key: &str,
    scope: Option<&Scope>,
    result: &VerificationResult,
) -> FailureDescriptor {
    let leaf = result.first_failed_leaf().unwrap_or(result);
    let reason = leaf.failure_reason.clone().unwrap_or_default();
    let mut reasons = Vec::new();
    if let Some(top) = &result.failure_reason {
        reasons.push(top.clone());
    }
    FailureDescriptor {
        step_key: step_key.to_string(),
        failure: ReplayFailure::ConditionFailed {
            leaf: leaf.condition.describe(),
            reason,
        },
        scope: scope.cloned(),
        candidates: Vec::new(),
        reasons,
    }
}

fn summarize(bundle: &LocatorBundle, result: &ResolveResult) -> Vec<CandidateSummary> {
    result
        .candidates()
        .into_iter()
        .map(|c| CandidateSummary {
            element: c.element,
            score: c.specificity_score,
            matched: c
                .matched_strategies
                .iter()
                .filter_map(|&i| bundle.strategies.get(i).map(|s| s.kind))
                .collect(),
            distance_from_hint: c.distance_from_hint,
        })
        .collect()
}
