//! Bundle resolution.
//!
//! The resolver runs its own poll loop; each tick it re-resolves the scope, ranks the
//! candidates and, when asked for an actionable winner, checks it with the
//! `StateWaiter` visible and enabled element checks.

use super::finder::CandidateFinder;
use super::scoring::{hint_distance, rank, score};
use crate::clock::{Clock, DEFAULT_POLL_INTERVAL_MS, Deadline, PollStop, Poller};
use crate::dom::DomAccessor;
use crate::wait::StateWaiter;
use retrace_common::condition::ElementCheck;
use retrace_common::error::DomError;
use retrace_common::locator::LocatorBundle;
use retrace_common::protocol::NodeId;
use retrace_common::result::{Candidate, ResolveMetrics, ResolveOutcome, ResolveResult};
use retrace_common::scope::Scope;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;

const ACTIONABLE: [ElementCheck; 2] = [ElementCheck::Visible, ElementCheck::Enabled];

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Keep polling until the winner is visible and enabled.
    pub require_actionable: bool,
    pub deadline: Deadline,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RESOLVE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            require_actionable: false,
            deadline: Deadline::none(),
        }
    }
}

impl ResolveOptions {
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Default::default()
        }
    }

    pub fn actionable(mut self) -> Self {
        self.require_actionable = true;
        self
    }

    pub fn within(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

enum RootSource<'s> {
    Fixed(Option<NodeId>),
    Scope(&'s Scope),
}

/// Polls a bundle's strategies until one element clearly wins, or time runs out.
///
/// Never retries beyond its own poll loop; recovery belongs to the caller.
pub struct Resolver<'a> {
    dom: &'a dyn DomAccessor,
    clock: &'a dyn Clock,
}

impl<'a> Resolver<'a> {
    pub fn new(dom: &'a dyn DomAccessor, clock: &'a dyn Clock) -> Self {
        Self { dom, clock }
    }

    /// Resolve inside an already-resolved scope root.
    pub async fn resolve(
        &self,
        bundle: &LocatorBundle,
        scope_root: Option<NodeId>,
        options: &ResolveOptions,
    ) -> ResolveResult {
        self.run(bundle, RootSource::Fixed(scope_root), options).await
    }

    /// Resolve the bundle's own scope on every tick, then resolve inside it.
    pub async fn resolve_scoped(
        &self,
        bundle: &LocatorBundle,
        options: &ResolveOptions,
    ) -> ResolveResult {
        let scope = bundle.scope_or_page();
        self.run(bundle, RootSource::Scope(&scope), options).await
    }

    async fn run(
        &self,
        bundle: &LocatorBundle,
        source: RootSource<'_>,
        options: &ResolveOptions,
    ) -> ResolveResult {
        let finder = CandidateFinder::new(self.dom);
        let mut metrics = ResolveMetrics::default();
        let mut poll = Poller::start(
            self.clock,
            Duration::from_millis(options.timeout_ms),
            Duration::from_millis(options.poll_interval_ms),
            &options.deadline,
        );

        let outcome = loop {
            metrics.polls += 1;
            let root = match self.root(&source).await {
                Ok(Some(root)) => root,
                Ok(None) => {
                    metrics.scope_resolved = false;
                    break ResolveOutcome::NotFound;
                }
                Err(e) => {
                    metrics.scope_resolved = false;
                    metrics.error = Some(e.to_string());
                    break ResolveOutcome::NotFound;
                }
            };
            metrics.scope_resolved = true;

            let found = finder.find(bundle, Some(root)).await;
            metrics.strategies_tried = found.strategies_tried;
            metrics.skipped_strategies = found.skipped;

            // A winner still waiting to become actionable.
            let pending = match self.rank(bundle, found.candidates).await {
                ResolveOutcome::Found { candidate } => {
                    let actionable = self.is_actionable(candidate.element).await;
                    if actionable || !options.require_actionable {
                        metrics.actionable = actionable;
                        break ResolveOutcome::Found { candidate };
                    }
                    Some(candidate)
                }
                ResolveOutcome::Ambiguous { candidates } => {
                    break ResolveOutcome::Ambiguous { candidates };
                }
                ResolveOutcome::NotFound => None,
            };

            match poll.tick().await {
                Ok(()) => {}
                Err(PollStop::Cancelled) => {
                    metrics.cancelled = true;
                    break ResolveOutcome::NotFound;
                }
                Err(PollStop::TimedOut) => {
                    break match pending {
                        Some(candidate) => ResolveOutcome::Found { candidate },
                        None => ResolveOutcome::NotFound,
                    };
                }
            }
        };

        metrics.elapsed_ms = poll.elapsed_ms();
        debug!(
            outcome = outcome_name(&outcome),
            elapsed_ms = metrics.elapsed_ms,
            polls = metrics.polls,
            "resolve finished"
        );
        ResolveResult { outcome, metrics }
    }

    async fn root(&self, source: &RootSource<'_>) -> Result<Option<NodeId>, DomError> {
        match source {
            RootSource::Fixed(root) => Ok(*root),
            RootSource::Scope(scope) => self.dom.resolve_scope(scope).await,
        }
    }

    async fn rank(&self, bundle: &LocatorBundle, mut candidates: Vec<Candidate>) -> ResolveOutcome {
        for candidate in &mut candidates {
            score(bundle, candidate);
        }
        if candidates.len() > 1 {
            for candidate in &mut candidates {
                candidate.distance_from_hint =
                    match hint_distance(self.dom, &bundle.disambiguators, candidate.element).await {
                        Ok(distance) => distance,
                        Err(e) => {
                            debug!("No hint distance for {}: {}", candidate.element, e);
                            None
                        }
                    };
            }
        }
        rank(candidates)
    }

    async fn is_actionable(&self, node: NodeId) -> bool {
        StateWaiter::new(self.dom, self.clock)
            .node_passes(node, &ACTIONABLE)
            .await
    }
}

fn outcome_name(outcome: &ResolveOutcome) -> &'static str {
    match outcome {
        ResolveOutcome::Found { .. } => "found",
        ResolveOutcome::Ambiguous { .. } => "ambiguous",
        ResolveOutcome::NotFound => "not_found",
    }
}
