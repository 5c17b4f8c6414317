use retrace_common::condition::{ElementCheck, ElementCondition, StateCheck, SuccessCondition};
use retrace_engine::clock::{Clock, ManualClock};
use retrace_engine::dom::{NodeSnapshot, PageSnapshot, SnapshotDom};
use retrace_engine::verifier::Verifier;
use retrace_engine::wait::StateWaiter;

fn form_page(url: &str) -> PageSnapshot {
    PageSnapshot::new(
        url,
        NodeSnapshot::new("body").children([
            NodeSnapshot::new("input")
                .attr("id", "email")
                .attr("type", "email")
                .value("ada@example.com")
                .focused(),
            NodeSnapshot::new("input")
                .attr("id", "terms")
                .attr("type", "checkbox")
                .checked(),
            NodeSnapshot::new("p").attr("id", "status").text("Saved 3 items"),
        ]),
    )
}

fn visible(target: &str, timeout_ms: u64) -> SuccessCondition {
    SuccessCondition::element(ElementCheck::Visible, target, timeout_ms)
}

fn url_contains(value: &str, timeout_ms: u64) -> SuccessCondition {
    SuccessCondition::state(StateCheck::UrlContains, Some(value), timeout_ms)
}

#[tokio::test]
async fn test_all_fails_fast_on_first_child() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    let verifier = Verifier::new(StateWaiter::new(&dom, &clock));

    let condition = SuccessCondition::all(vec![visible("#x", 500), url_contains("/done", 500)]);
    let result = verifier.verify(&condition, None).await;

    assert!(!result.passed);
    assert_eq!(clock.now_ms(), 500);
    assert_eq!(result.elapsed_ms, 500);
    let reason = result.failure_reason.as_deref().unwrap();
    assert!(reason.starts_with("condition 1 of 2 failed"), "{}", reason);
    assert!(reason.contains("#x"), "{}", reason);
    // The second child never ran.
    assert_eq!(result.details.len(), 1);
    assert_eq!(
        result.first_failed_leaf().unwrap().condition,
        visible("#x", 500)
    );
}

#[tokio::test]
async fn test_any_stops_at_first_pass() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    let verifier = Verifier::new(StateWaiter::new(&dom, &clock));

    let condition = SuccessCondition::any(vec![
        url_contains("/done", 300),
        visible("#status", 300),
        visible("#never", 5_000),
    ]);
    let result = verifier.verify(&condition, None).await;
    assert!(result.passed);
    assert_eq!(result.details.len(), 2);
    assert_eq!(clock.now_ms(), 300);
}

#[tokio::test]
async fn test_double_negation_matches_the_inner_condition() {
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    for inner in [visible("#status", 100), visible("#missing", 100)] {
        let clock = ManualClock::new();
        let verifier = Verifier::new(StateWaiter::new(&dom, &clock));
        let plain = verifier.verify(&inner, None).await.passed;
        let doubled = verifier
            .verify(
                &SuccessCondition::negate(SuccessCondition::negate(inner.clone())),
                None,
            )
            .await
            .passed;
        assert_eq!(plain, doubled, "{}", inner.describe());
    }
}

#[tokio::test]
async fn test_not_explains_an_unexpected_pass() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    let verifier = Verifier::new(StateWaiter::new(&dom, &clock));

    let result = verifier
        .verify(&SuccessCondition::negate(visible("#status", 100)), None)
        .await;
    assert!(!result.passed);
    assert!(result.failure_reason.unwrap().contains("should not"));

    let result = verifier
        .verify(&SuccessCondition::negate(visible("#missing", 100)), None)
        .await;
    assert!(result.passed);
    assert!(result.failure_reason.is_none());
}

#[tokio::test]
async fn test_element_checks() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    let verifier = Verifier::new(StateWaiter::new(&dom, &clock));

    let checks: Vec<SuccessCondition> = vec![
        SuccessCondition::element(ElementCheck::Checked, "#terms", 100),
        SuccessCondition::element(ElementCheck::Focused, "#email", 100),
        SuccessCondition::element(ElementCheck::Enabled, "#email", 100),
        ElementCondition::new(ElementCheck::HasValue, "#email", 100)
            .expecting("ada@example.com")
            .into(),
        ElementCondition::new(ElementCheck::HasText, "#status", 100)
            .expecting("Saved")
            .into(),
        ElementCondition::new(ElementCheck::HasAttribute, "#terms", 100)
            .expecting("type=checkbox")
            .into(),
        SuccessCondition::element(ElementCheck::Gone, ".spinner", 100),
    ];
    let result = verifier.verify(&SuccessCondition::all(checks), None).await;
    assert!(result.passed, "{:?}", result.failure_reason);
    assert_eq!(clock.now_ms(), 0);
}

#[tokio::test]
async fn test_state_leaf_without_value_fails() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    let verifier = Verifier::new(StateWaiter::new(&dom, &clock));

    let condition = SuccessCondition::state(StateCheck::TitleContains, None, 1_000);
    let result = verifier.verify(&condition, None).await;
    assert!(!result.passed);
    assert_eq!(
        result.failure_reason.as_deref(),
        Some("title_contains requires a value")
    );
    assert_eq!(clock.now_ms(), 0);
}

#[tokio::test]
async fn test_state_leaves_follow_the_page() {
    let clock = ManualClock::shared();
    let dom = SnapshotDom::timeline(
        clock.clone(),
        vec![
            (0, form_page("https://app.test/edit")),
            (200, form_page("https://app.test/done").titled("Done")),
        ],
    )
    .unwrap();
    let verifier = Verifier::new(StateWaiter::new(&dom, clock.as_ref()));

    let condition = SuccessCondition::all(vec![
        url_contains("/done", 1_000),
        SuccessCondition::state(StateCheck::TitleContains, Some("Done"), 100),
        SuccessCondition::state(StateCheck::DomStable, Some("300"), 1_000),
        SuccessCondition::state(StateCheck::LoadersGone, None, 100),
    ]);
    let result = verifier.verify(&condition, None).await;
    assert!(result.passed, "{:?}", result.failure_reason);
    assert_eq!(result.details.len(), 4);
    assert!(result.details.iter().all(|d| d.passed));
}

#[tokio::test]
async fn test_worst_case_bounds_elapsed() {
    let clock = ManualClock::new();
    let dom = SnapshotDom::new(form_page("https://app.test/edit"));
    let verifier = Verifier::new(StateWaiter::new(&dom, &clock));

    let condition = SuccessCondition::any(vec![
        visible("#a", 200),
        SuccessCondition::all(vec![visible("#status", 200), visible("#b", 300)]),
    ]);
    let result = verifier.verify(&condition, None).await;
    assert!(!result.passed);
    assert!(result.elapsed_ms <= condition.worst_case_ms());
    assert_eq!(result.elapsed_ms, 500);
}
