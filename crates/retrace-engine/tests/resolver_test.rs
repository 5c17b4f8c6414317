use retrace_common::locator::{Disambiguator, LocatorBundle, LocatorStrategy, StrategyKind};
use retrace_common::result::{ReplayFailure, ResolveOutcome};
use retrace_common::scope::Scope;
use retrace_engine::clock::{CancelFlag, Clock, Deadline, ManualClock};
use retrace_engine::dom::{DomAccessor, NodeSnapshot, PageSnapshot, SnapshotDom};
use retrace_engine::resolution::{CandidateFinder, ResolveOptions, Resolver};
use std::time::Duration;

fn submit_page(label: &str) -> PageSnapshot {
    PageSnapshot::new(
        "https://shop.test/cart",
        NodeSnapshot::new("body").children([
            NodeSnapshot::new("h1").text("Cart"),
            NodeSnapshot::new("button")
                .attr("data-testid", "submit")
                .text(label),
        ]),
    )
}

fn options_page() -> PageSnapshot {
    PageSnapshot::new(
        "https://shop.test/fruit",
        NodeSnapshot::new("body").child(
            NodeSnapshot::new("div").attr("role", "listbox").children([
                NodeSnapshot::new("div").attr("role", "option").text("Apple"),
                NodeSnapshot::new("div").attr("role", "option").text("Apple"),
            ]),
        ),
    )
}

fn users_page() -> PageSnapshot {
    let row = |name: &str| {
        NodeSnapshot::new("tr").children([
            NodeSnapshot::new("td").text(name),
            NodeSnapshot::new("td").child(NodeSnapshot::new("button").text("Edit")),
        ])
    };
    PageSnapshot::new(
        "https://app.test/users",
        NodeSnapshot::new("body").child(NodeSnapshot::new("table").children([
            row("Alice"),
            row("Bob"),
            row("Carol"),
        ])),
    )
}

fn apple_bundle() -> LocatorBundle {
    LocatorBundle::new(vec![
        LocatorStrategy::new(StrategyKind::Role, "option"),
        LocatorStrategy::new(StrategyKind::Text, "Apple"),
    ])
}

#[tokio::test]
async fn test_test_id_wins_after_text_changes() {
    let clock = ManualClock::shared();
    let dom = SnapshotDom::timeline(
        clock.clone(),
        vec![(0, submit_page("Go")), (200, submit_page("Submit"))],
    )
    .unwrap();
    let bundle = LocatorBundle::new(vec![
        LocatorStrategy::new(StrategyKind::TestId, "data-testid=submit").stable(),
        LocatorStrategy::new(StrategyKind::Text, "Go"),
    ]);
    let resolver = Resolver::new(&dom, clock.as_ref());

    let before = resolver
        .resolve_scoped(&bundle, &ResolveOptions::default())
        .await;
    let first = before.found().expect("found before the change").clone();
    assert_eq!(first.matched_strategies.len(), 2);

    clock.advance(Duration::from_millis(300));
    let after = resolver
        .resolve_scoped(&bundle, &ResolveOptions::default())
        .await;
    let winner = after.found().expect("TEST_ID still resolves");
    assert_eq!(winner.element, first.element);
    assert_eq!(winner.matched_strategies.iter().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(winner.specificity_score, 100);
}

#[tokio::test]
async fn test_identical_siblings_are_ambiguous() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(options_page());
    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&apple_bundle(), &ResolveOptions::default())
        .await;

    let ResolveOutcome::Ambiguous { candidates } = &result.outcome else {
        panic!("expected Ambiguous, got {:?}", result.outcome);
    };
    assert_eq!(candidates.len(), 2);
    assert!(candidates[0].document_index < candidates[1].document_index);
    // A tie is decided on the first poll, not after the timeout.
    assert_eq!(result.metrics.polls, 1);
    assert_eq!(clock.now_ms(), 0);
    assert!(matches!(result.failure(), Some(ReplayFailure::Ambiguous { .. })));
}

#[tokio::test]
async fn test_sibling_index_hint_breaks_the_tie() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(options_page());
    let mut bundle = apple_bundle();
    bundle.disambiguators = vec![Disambiguator::SiblingIndex(1)];

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::default())
        .await;
    let winner = result.found().expect("hint picks one");
    assert_eq!(winner.distance_from_hint, Some(0.0));

    let root = dom.document_root().await.unwrap();
    let options = dom.query_selector_all("[role=option]", root).await.unwrap();
    assert_eq!(winner.element, options[1]);
}

#[tokio::test]
async fn test_missing_modal_returns_immediately() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(submit_page("Go"));
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(
        StrategyKind::TestId,
        "data-testid=submit",
    )])
    .with_scope(Scope::Modal);

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::with_timeout(5_000))
        .await;
    assert_eq!(result.outcome, ResolveOutcome::NotFound);
    assert!(!result.metrics.scope_resolved);
    assert!(result.metrics.elapsed_ms < 100);
    assert_eq!(result.failure(), Some(ReplayFailure::ScopeNotFound));

    let found = CandidateFinder::new(&dom).find(&bundle, None).await;
    assert!(found.candidates.is_empty());
    assert!(CandidateFinder::new(&dom).find_in_scope(&bundle).await.is_err());
}

#[tokio::test]
async fn test_not_found_waits_for_the_full_timeout() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(submit_page("Go"));
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Css, "#missing")]);

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::with_timeout(300))
        .await;
    assert_eq!(result.outcome, ResolveOutcome::NotFound);
    assert!(result.metrics.scope_resolved);
    assert_eq!(result.metrics.elapsed_ms, 300);
    assert_eq!(result.metrics.polls, 4);
    assert_eq!(result.failure(), Some(ReplayFailure::NoCandidates));
}

#[tokio::test]
async fn test_element_appearing_later_is_found() {
    let clock = ManualClock::shared();
    let empty = PageSnapshot::new("https://shop.test/cart", NodeSnapshot::new("body"));
    let dom = SnapshotDom::timeline(clock.clone(), vec![(0, empty), (250, submit_page("Go"))])
        .unwrap();
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(
        StrategyKind::TestId,
        "data-testid=submit",
    )]);

    let result = Resolver::new(&dom, clock.as_ref())
        .resolve_scoped(&bundle, &ResolveOptions::with_timeout(1_000))
        .await;
    assert!(result.is_found());
    assert_eq!(result.metrics.elapsed_ms, 300);
}

#[tokio::test]
async fn test_require_actionable_waits_for_enabled() {
    let clock = ManualClock::shared();
    let page = |disabled: bool| {
        let mut button = NodeSnapshot::new("button").attr("id", "pay").text("Pay");
        if disabled {
            button = button.disabled();
        }
        PageSnapshot::new("https://shop.test/pay", NodeSnapshot::new("body").child(button))
    };
    let dom = SnapshotDom::timeline(clock.clone(), vec![(0, page(true)), (300, page(false))])
        .unwrap();
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Css, "#pay").stable()]);
    let resolver = Resolver::new(&dom, clock.as_ref());

    let result = resolver
        .resolve_scoped(&bundle, &ResolveOptions::with_timeout(1_000).actionable())
        .await;
    assert!(result.is_found());
    assert!(result.metrics.actionable);
    assert_eq!(result.metrics.elapsed_ms, 300);
}

#[tokio::test]
async fn test_inactionable_winner_is_returned_at_timeout() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(PageSnapshot::new(
        "https://shop.test/pay",
        NodeSnapshot::new("body").child(NodeSnapshot::new("button").attr("id", "pay").disabled()),
    ));
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Css, "#pay")]);

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::with_timeout(500).actionable())
        .await;
    assert!(result.is_found());
    assert!(!result.metrics.actionable);
    assert_eq!(result.metrics.elapsed_ms, 500);
}

#[tokio::test]
async fn test_table_row_scope_contains_the_match() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(users_page());
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Text, "Edit")])
        .with_scope(Scope::TableRow("Bob".into()));

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::default())
        .await;
    let winner = result.found().expect("one Edit button in Bob's row");

    let row = dom
        .resolve_scope(&Scope::TableRow("Bob".into()))
        .await
        .unwrap()
        .unwrap();
    assert!(retrace_engine::dom::contains(&dom, row, winner.element).await.unwrap());

    let page_wide = Resolver::new(&dom, &clock)
        .resolve_scoped(
            &LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Text, "Edit")]),
            &ResolveOptions::default(),
        )
        .await;
    assert_eq!(page_wide.candidates().len(), 3);
}

#[tokio::test]
async fn test_table_row_scope_beats_a_stronger_match_outside() {
    let clock = ManualClock::new();
    let row = |name: &str| {
        NodeSnapshot::new("tr").children([
            NodeSnapshot::new("td").text(name),
            NodeSnapshot::new("td").child(
                NodeSnapshot::new("button")
                    .attr("data-who", &name.to_lowercase())
                    .text("Edit"),
            ),
        ])
    };
    let dom = SnapshotDom::new(PageSnapshot::new(
        "https://app.test/users",
        NodeSnapshot::new("body").children([
            NodeSnapshot::new("button")
                .attr("data-testid", "edit-user")
                .text("Edit"),
            NodeSnapshot::new("table").children([row("Bobby"), row("Bob")]),
        ]),
    ));
    let bundle = LocatorBundle::new(vec![
        LocatorStrategy::new(StrategyKind::TestId, "data-testid=edit-user"),
        LocatorStrategy::new(StrategyKind::Text, "Edit"),
    ])
    .with_scope(Scope::TableRow("Bob".into()));

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::default())
        .await;
    let winner = result.found().expect("Bob's Edit button");
    let info = dom.element(winner.element).await.unwrap().unwrap();
    assert_eq!(info.attr("data-who"), Some("bob"));
    assert_eq!(winner.specificity_score, 30);

    let page_wide = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle.with_scope(Scope::Page), &ResolveOptions::default())
        .await;
    let outside = page_wide.found().expect("test id wins page-wide");
    assert_eq!(outside.specificity_score, 130);
}

#[tokio::test]
async fn test_invalid_strategies_are_skipped() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(submit_page("Go"));
    let bundle = LocatorBundle::new(vec![
        LocatorStrategy::new(StrategyKind::Css, "button[[["),
        LocatorStrategy::new(StrategyKind::TestId, "data-testid=submit"),
    ]);

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &ResolveOptions::default())
        .await;
    assert!(result.is_found());
    assert_eq!(result.metrics.strategies_tried, 2);
    assert_eq!(result.metrics.skipped_strategies.len(), 1);
    assert_eq!(result.metrics.skipped_strategies[0].index, 0);

    let broken = LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Css, "button[[[")]);
    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&broken, &ResolveOptions::with_timeout(200))
        .await;
    assert!(matches!(
        result.failure(),
        Some(ReplayFailure::InvalidStrategy { .. })
    ));
}

#[tokio::test]
async fn test_cancel_stops_between_ticks() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(submit_page("Go"));
    let flag = CancelFlag::new();
    flag.cancel();
    let bundle = LocatorBundle::new(vec![LocatorStrategy::new(StrategyKind::Css, "#missing")]);
    let options = ResolveOptions::with_timeout(5_000).within(Deadline::none().with_cancel(flag));

    let result = Resolver::new(&dom, &clock)
        .resolve_scoped(&bundle, &options)
        .await;
    assert!(result.metrics.cancelled);
    assert_eq!(result.metrics.polls, 1);
    assert_eq!(result.failure(), Some(ReplayFailure::Timeout));
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let dom = SnapshotDom::new(users_page());
    let bundle = LocatorBundle::new(vec![
        LocatorStrategy::new(StrategyKind::Role, "button"),
        LocatorStrategy::new(StrategyKind::Text, "Edit"),
    ]);

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let clock = ManualClock::new();
        let result = Resolver::new(&dom, &clock)
            .resolve_scoped(&bundle, &ResolveOptions::default())
            .await;
        outcomes.push(result.outcome);
    }
    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[1], outcomes[2]);
}
