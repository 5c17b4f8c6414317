use crate::dom::{self, DomAccessor};
use retrace_common::error::DomError;
use retrace_common::locator::LocatorBundle;
use retrace_common::protocol::NodeId;
use retrace_common::result::{Candidate, SkippedStrategy};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything one pass over a bundle's strategies produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOutcome {
    /// Distinct elements, document order.
    pub candidates: Vec<Candidate>,
    pub strategies_tried: usize,
    pub skipped: Vec<SkippedStrategy>,
}

/// Runs every strategy of a bundle once inside a scope root and merges the hits.
pub struct CandidateFinder<'a> {
    dom: &'a dyn DomAccessor,
}

impl<'a> CandidateFinder<'a> {
    pub fn new(dom: &'a dyn DomAccessor) -> Self {
        Self { dom }
    }

    /// A strategy that errors is recorded as skipped and the pass continues. An
    /// `ordered` bundle stops at the first strategy that admits a candidate.
    pub async fn find(&self, bundle: &LocatorBundle, scope_root: Option<NodeId>) -> FindOutcome {
        let Some(root) = scope_root else {
            return FindOutcome::default();
        };

        let mut outcome = FindOutcome::default();
        let mut by_element: BTreeMap<NodeId, Candidate> = BTreeMap::new();

        for (index, strategy) in bundle.strategies.iter().enumerate() {
            outcome.strategies_tried += 1;
            let hits = match self.dom.query(strategy, root).await {
                Ok(hits) => hits,
                Err(e) => {
                    debug!(
                        index,
                        kind = %strategy.kind,
                        value = %strategy.value,
                        error = %e,
                        "strategy skipped"
                    );
                    outcome.skipped.push(SkippedStrategy {
                        index,
                        kind: strategy.kind,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for hit in hits {
                if let Some(candidate) = by_element.get_mut(&hit) {
                    candidate.matched_strategies.insert(index);
                    continue;
                }
                match self.admit(root, hit).await {
                    Ok(Some(doc_index)) => {
                        let mut candidate = Candidate::new(hit, doc_index);
                        candidate.matched_strategies.insert(index);
                        by_element.insert(hit, candidate);
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Dropping candidate {}: {}", hit, e),
                }
            }
            if bundle.ordered && !by_element.is_empty() {
                break;
            }
        }

        outcome.candidates = by_element.into_values().collect();
        outcome.candidates.sort_by_key(|c| c.document_index);
        outcome
    }

    /// Resolve the bundle's scope first; a missing scope fails fast.
    pub async fn find_in_scope(&self, bundle: &LocatorBundle) -> Result<FindOutcome, DomError> {
        let scope = bundle.scope_or_page();
        match self.dom.resolve_scope(&scope).await? {
            Some(root) => Ok(self.find(bundle, Some(root)).await),
            None => Err(DomError::ScopeNotFound(scope.to_string())),
        }
    }

    /// Document index of `node` if it is a live element inside `root`.
    async fn admit(&self, root: NodeId, node: NodeId) -> Result<Option<usize>, DomError> {
        if !dom::contains(self.dom, root, node).await? {
            return Ok(None);
        }
        self.dom.document_index(node).await
    }
}
