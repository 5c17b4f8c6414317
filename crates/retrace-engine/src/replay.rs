//! Replay driver: resolve, act, verify, recover, one step at a time.

use crate::clock::{CancelFlag, Clock, Deadline};
use crate::config::RetraceConfig;
use crate::corrections::CorrectionSink;
use crate::dom::DomAccessor;
use crate::recovery::{self, RecoveryAction, RecoveryEngine};
use crate::resolution::Resolver;
use crate::verifier::Verifier;
use async_trait::async_trait;
use retrace_common::locator::{LocatorBundle, LocatorStrategy};
use retrace_common::protocol::NodeId;
use retrace_common::result::{FailureDescriptor, ReplayFailure, ResolveResult, VerificationResult};
use retrace_common::step::{ActionKind, RecordedStep};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action not supported: {0}")]
    NotSupported(String),
    #[error("Element {element} rejected the action: {reason}")]
    Rejected { element: NodeId, reason: String },
    #[error("Action failed: {0}")]
    Failed(String),
}

/// Performs the recorded action. `element` is `None` for page-level steps.
#[async_trait]
pub trait ActionPerformer: Send + Sync {
    async fn perform(&self, step: &RecordedStep, element: Option<NodeId>)
    -> Result<(), ActionError>;
}

/// Performs nothing and remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingPerformer {
    performed: Mutex<Vec<(ActionKind, Option<NodeId>)>>,
}

impl RecordingPerformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performed(&self) -> Vec<(ActionKind, Option<NodeId>)> {
        self.performed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ActionPerformer for RecordingPerformer {
    async fn perform(
        &self,
        step: &RecordedStep,
        element: Option<NodeId>,
    ) -> Result<(), ActionError> {
        self.performed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((step.kind, element));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// Passed after at least one recovery action.
    Recovered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_key: String,
    pub kind: ActionKind,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ReplayFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve: Option<ResolveResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery: Vec<RecoveryAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_strategy: Option<LocatorStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_error: Option<String>,
    pub elapsed_ms: u64,
}

impl StepReport {
    fn new(step: &RecordedStep) -> Self {
        Self {
            step_key: step.key(),
            kind: step.kind,
            status: StepStatus::Passed,
            failure: None,
            resolve: None,
            verification: None,
            recovery: Vec::new(),
            proposed_strategy: None,
            action_error: None,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status != StepStatus::Failed
    }

    fn fail(&mut self, failure: ReplayFailure) {
        self.status = StepStatus::Failed;
        self.failure = Some(failure);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub steps: Vec<StepReport>,
    /// Steps never attempted because an earlier one failed.
    pub skipped: usize,
}

impl WorkflowReport {
    pub fn succeeded(&self) -> bool {
        self.skipped == 0 && self.steps.iter().all(StepReport::succeeded)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

pub struct StepReplayer<'a> {
    dom: &'a dyn DomAccessor,
    clock: &'a dyn Clock,
    performer: &'a dyn ActionPerformer,
    sink: &'a dyn CorrectionSink,
    config: RetraceConfig,
    cancel: Option<CancelFlag>,
}

impl<'a> StepReplayer<'a> {
    pub fn new(
        dom: &'a dyn DomAccessor,
        clock: &'a dyn Clock,
        performer: &'a dyn ActionPerformer,
        sink: &'a dyn CorrectionSink,
    ) -> Self {
        Self {
            dom,
            clock,
            performer,
            sink,
            config: RetraceConfig::default(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: RetraceConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort poll loops between ticks once `flag` is set.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub async fn replay_workflow(&self, steps: &[RecordedStep]) -> WorkflowReport {
        let mut report = WorkflowReport::default();
        for (i, step) in steps.iter().enumerate() {
            let step_report = self.replay_step(step).await;
            let failed = !step_report.succeeded();
            report.steps.push(step_report);
            if failed && self.config.replay.stop_on_failure {
                report.skipped = steps.len() - i - 1;
                break;
            }
        }
        info!(
            "Workflow finished: {} passed, {} recovered, {} failed, {} skipped",
            report.count(StepStatus::Passed),
            report.count(StepStatus::Recovered),
            report.count(StepStatus::Failed),
            report.skipped
        );
        report
    }

    pub async fn replay_step(&self, step: &RecordedStep) -> StepReport {
        let started = self.clock.now_ms();
        let mut report = StepReport::new(step);
        let step_key = report.step_key.clone();
        let deadline = self.deadline();

        if self.config.replay.check_origin {
            self.check_origin(&step.payload.url).await;
        }

        let recorded = step.payload.effective_bundle();
        let bundle = self.effective_bundle(&step_key, &recorded).await;

        let element = if step.kind.targets_element() {
            match self.locate(&step_key, &bundle, &deadline, &mut report).await {
                Some(element) => Some(element),
                None => {
                    report.elapsed_ms = self.clock.now_ms().saturating_sub(started);
                    return report;
                }
            }
        } else {
            None
        };

        if let Err(e) = self.performer.perform(step, element).await {
            warn!("Step {} action failed: {}", step_key, e);
            report.status = StepStatus::Failed;
            report.action_error = Some(e.to_string());
            report.elapsed_ms = self.clock.now_ms().saturating_sub(started);
            return report;
        }

        if self.config.verifier.enabled
            && let Some(condition) = &step.payload.suggested_condition
        {
            let waiter = self
                .config
                .wait
                .waiter(self.dom, self.clock)
                .with_deadline(deadline.clone());
            let verifier = Verifier::new(waiter);
            let scope = match (&bundle.scope, self.config.verifier.inherit_step_scope) {
                (Some(scope), true) => Some(scope),
                _ => None,
            };

            let mut verification = verifier.verify(condition, scope).await;
            if !verification.passed {
                let recovery = self.recovery();
                let outcome = recovery
                    .recover_verification(&verifier, condition, scope, verification)
                    .await;
                report.recovery.extend(outcome.actions);
                verification = outcome.result;
                if outcome.recovered {
                    report.status = StepStatus::Recovered;
                } else {
                    let descriptor =
                        recovery::verification_failure(&step_key, scope, &verification);
                    report.fail(descriptor.failure.clone());
                    recovery.report(descriptor).await;
                }
            }
            report.verification = Some(verification);
        }

        report.elapsed_ms = self.clock.now_ms().saturating_sub(started);
        info!(
            "Step {} ({:?}) {:?} in {}ms",
            step_key, report.kind, report.status, report.elapsed_ms
        );
        report
    }

    /// Resolve the target, recovering if needed. `None` means the step has failed.
    async fn locate(
        &self,
        step_key: &str,
        bundle: &LocatorBundle,
        deadline: &Deadline,
        report: &mut StepReport,
    ) -> Option<NodeId> {
        if bundle.is_empty() {
            let failure = ReplayFailure::InvalidStrategy {
                reason: "step has no locator strategies".into(),
            };
            report.fail(failure.clone());
            self.recovery()
                .report(FailureDescriptor {
                    step_key: step_key.to_string(),
                    failure,
                    scope: bundle.scope.clone(),
                    candidates: Vec::new(),
                    reasons: Vec::new(),
                })
                .await;
            return None;
        }

        let options = self.config.resolver.options().within(deadline.clone());
        let resolver = Resolver::new(self.dom, self.clock);
        let mut result = resolver.resolve_scoped(bundle, &options).await;

        if !result.is_found() || (options.require_actionable && !result.metrics.actionable) {
            let recovery = self.recovery();
            let outcome = recovery.recover_resolution(bundle, result, &options).await;
            report.recovery.extend(outcome.actions.iter().cloned());
            result = outcome.result;

            if !result.is_found() {
                let descriptor = recovery::resolution_failure(
                    step_key,
                    &outcome.bundle,
                    &result,
                    &outcome.actions,
                );
                report.fail(descriptor.failure.clone());
                report.resolve = Some(result);
                recovery.report(descriptor).await;
                return None;
            }
            if !outcome.actions.is_empty() {
                report.status = StepStatus::Recovered;
            }
            if !result.metrics.actionable {
                warn!("Step {}: acting on a target that is not actionable", step_key);
            }
            if let Some(found) = result.found() {
                report.proposed_strategy = recovery.propose(step_key, bundle, found.element).await;
            }
        }

        let element = result.found().map(|c| c.element);
        debug!(
            "Step {} resolved to {:?} after {} polls",
            step_key, element, result.metrics.polls
        );
        report.resolve = Some(result);
        element
    }

    /// The recorded bundle, replaced by a supplied correction and extended by suggestions.
    async fn effective_bundle(&self, step_key: &str, recorded: &LocatorBundle) -> LocatorBundle {
        let base = match self.sink.correction(step_key).await {
            Some(corrected) => {
                debug!("Using corrected bundle for {}", step_key);
                corrected
            }
            None => recorded.clone(),
        };
        let suggestions = self.sink.suggestions(step_key).await;
        if suggestions.is_empty() {
            base
        } else {
            base.augmented(suggestions)
        }
    }

    async fn check_origin(&self, recorded: &str) {
        let Ok(recorded) = Url::parse(recorded) else {
            return;
        };
        let Ok(page) = self.dom.page().await else {
            return;
        };
        if let Ok(current) = Url::parse(&page.url)
            && current.origin() != recorded.origin()
        {
            warn!(
                "Replaying on {} but the step was recorded on {}",
                current.origin().ascii_serialization(),
                recorded.origin().ascii_serialization()
            );
        }
    }

    fn deadline(&self) -> Deadline {
        let budget = self.config.replay.step_timeout_ms;
        let deadline = if budget == 0 {
            Deadline::none()
        } else {
            Deadline::after(self.clock, Duration::from_millis(budget))
        };
        match &self.cancel {
            Some(flag) => deadline.with_cancel(flag.clone()),
            None => deadline,
        }
    }

    fn recovery(&self) -> RecoveryEngine<'a> {
        RecoveryEngine::new(self.dom, self.clock, self.sink)
            .with_config(self.config.recovery.clone(), self.config.wait.clone())
    }
}
