//! Candidate scoring and ranking.
//!
//! Ranking key, best first: specificity score (sum of matched strategy weights), then
//! fewer matched strategies with dynamic parts, then smaller distance from the recorded
//! disambiguators (no distance ranks last). Document order sorts equal candidates but
//! never decides a winner.

use crate::dom::DomAccessor;
use crate::extract::anchors;
use retrace_common::error::DomError;
use retrace_common::locator::{Disambiguator, LocatorBundle};
use retrace_common::protocol::NodeId;
use retrace_common::result::{Candidate, ResolveOutcome};
use std::cmp::Ordering;

/// Fill in `specificity_score` and `dynamic_matches` from the matched strategies.
pub fn score(bundle: &LocatorBundle, candidate: &mut Candidate) {
    candidate.specificity_score = 0;
    candidate.dynamic_matches = 0;
    for &index in &candidate.matched_strategies {
        let Some(strategy) = bundle.strategies.get(index) else {
            continue;
        };
        candidate.specificity_score += strategy.weight();
        if strategy.features.has_dynamic_parts {
            candidate.dynamic_matches += 1;
        }
    }
}

/// Summed distance between `node` and the recorded hints. `None` without hints.
pub async fn hint_distance(
    dom: &dyn DomAccessor,
    hints: &[Disambiguator],
    node: NodeId,
) -> Result<Option<f64>, DomError> {
    if hints.is_empty() {
        return Ok(None);
    }
    let mut total = 0.0;
    for hint in hints {
        total += match hint {
            Disambiguator::SiblingIndex(expected) => {
                match anchors::same_tag_position(dom, node).await? {
                    Some((index, _)) => (index as f64 - *expected as f64).abs(),
                    None => *expected as f64 + 1.0,
                }
            }
            Disambiguator::NearbyText(expected) => match anchors::nearby_text(dom, node).await? {
                Some(actual) => {
                    1.0 - strsim::normalized_levenshtein(
                        &expected.to_lowercase(),
                        &actual.to_lowercase(),
                    )
                }
                None => 1.0,
            },
            Disambiguator::Landmark(expected) => {
                if anchors::landmark(dom, node).await?.as_deref() == Some(expected.as_str()) {
                    0.0
                } else {
                    1.0
                }
            }
        };
    }
    Ok(Some(total))
}

/// Ordering on the ranking key alone.
fn rank_key(a: &Candidate, b: &Candidate) -> Ordering {
    b.specificity_score
        .cmp(&a.specificity_score)
        .then(a.dynamic_matches.cmp(&b.dynamic_matches))
        .then_with(|| {
            let da = a.distance_from_hint.unwrap_or(f64::INFINITY);
            let db = b.distance_from_hint.unwrap_or(f64::INFINITY);
            da.total_cmp(&db)
        })
}

/// Best-first order, document order among equals.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    rank_key(a, b).then(a.document_index.cmp(&b.document_index))
}

/// Pick the winner, or report the tie. Expects scored candidates.
pub fn rank(mut candidates: Vec<Candidate>) -> ResolveOutcome {
    if candidates.is_empty() {
        return ResolveOutcome::NotFound;
    }
    candidates.sort_by(compare);
    let tied = candidates
        .iter()
        .skip(1)
        .take_while(|c| rank_key(&candidates[0], c) == Ordering::Equal)
        .count();
    if tied == 0 {
        let candidate = candidates.swap_remove(0);
        return ResolveOutcome::Found { candidate };
    }
    candidates.truncate(tied + 1);
    ResolveOutcome::Ambiguous { candidates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_common::locator::{LocatorStrategy, StrategyKind};

    fn candidate(id: u32, doc: usize, matched: &[usize]) -> Candidate {
        let mut c = Candidate::new(NodeId(id), doc);
        c.matched_strategies.extend(matched.iter().copied());
        c
    }

    fn bundle() -> LocatorBundle {
        LocatorBundle::new(vec![
            LocatorStrategy::new(StrategyKind::TestId, "data-testid=go").stable(),
            LocatorStrategy::new(StrategyKind::Css, "div.css-1x2y3z").dynamic(),
            LocatorStrategy::new(StrategyKind::Text, "Go"),
        ])
    }

    #[test]
    fn test_score_sums_weights_and_counts_dynamic() {
        let mut c = candidate(1, 0, &[0, 1, 2]);
        score(&bundle(), &mut c);
        assert_eq!(c.specificity_score, 100 + 35 + 30);
        assert_eq!(c.dynamic_matches, 1);
    }

    #[test]
    fn test_rank_picks_strict_winner() {
        let bundle = bundle();
        let mut a = candidate(1, 0, &[2]);
        let mut b = candidate(2, 5, &[0, 2]);
        score(&bundle, &mut a);
        score(&bundle, &mut b);
        match rank(vec![a, b]) {
            ResolveOutcome::Found { candidate } => assert_eq!(candidate.element, NodeId(2)),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_fewer_dynamic_matches_breaks_score_tie() {
        let bundle = LocatorBundle::new(vec![
            LocatorStrategy::new(StrategyKind::Css, ".a").dynamic(),
            LocatorStrategy::new(StrategyKind::Css, ".b"),
        ]);
        let mut a = candidate(1, 0, &[0]);
        let mut b = candidate(2, 1, &[1]);
        score(&bundle, &mut a);
        score(&bundle, &mut b);
        let ResolveOutcome::Found { candidate } = rank(vec![a, b]) else {
            panic!("expected Found");
        };
        assert_eq!(candidate.element, NodeId(2));
    }

    #[test]
    fn test_equal_rank_is_ambiguous_regardless_of_document_order() {
        let bundle = bundle();
        let mut a = candidate(7, 9, &[2]);
        let mut b = candidate(3, 1, &[2]);
        let mut c = candidate(4, 2, &[]);
        for x in [&mut a, &mut b, &mut c] {
            score(&bundle, x);
        }
        let ResolveOutcome::Ambiguous { candidates } = rank(vec![a, b, c]) else {
            panic!("expected Ambiguous");
        };
        let ids: Vec<NodeId> = candidates.iter().map(|c| c.element).collect();
        assert_eq!(ids, vec![NodeId(3), NodeId(7)]);
    }

    #[test]
    fn test_distance_breaks_tie_and_none_ranks_last() {
        let mut a = candidate(1, 0, &[]);
        let mut b = candidate(2, 1, &[]);
        a.distance_from_hint = None;
        b.distance_from_hint = Some(2.0);
        let ResolveOutcome::Found { candidate } = rank(vec![a, b]) else {
            panic!("expected Found");
        };
        assert_eq!(candidate.element, NodeId(2));
    }

    #[test]
    fn test_empty_is_not_found() {
        assert_eq!(rank(vec![]), ResolveOutcome::NotFound);
    }
}
