use crate::replay::{StepReport, StepStatus, WorkflowReport};
use retrace_common::locator::LocatorBundle;
use retrace_common::result::{ResolveOutcome, ResolveResult, VerificationResult};

pub fn format_bundle(bundle: &LocatorBundle) -> String {
    let mut out = format!("scope: {}\n", bundle.scope_or_page());
    for (i, s) in bundle.strategies.iter().enumerate() {
        let mut flags = Vec::new();
        if s.features.has_stable_attributes {
            flags.push("stable");
        }
        if s.features.has_dynamic_parts {
            flags.push("dynamic");
        }
        if s.features.unique_match_at_record_time {
            flags.push("unique");
        }
        out.push_str(&format!(
            "  [{}] {:<8} {:>3}  {}",
            i,
            s.kind.as_str(),
            s.weight(),
            s.value
        ));
        if !flags.is_empty() {
            out.push_str(&format!("  ({})", flags.join(", ")));
        }
        out.push('\n');
    }
    for hint in &bundle.disambiguators {
        out.push_str(&format!("  hint {}\n", hint));
    }
    out
}

pub fn format_resolve(bundle: &LocatorBundle, result: &ResolveResult) -> String {
    let m = &result.metrics;
    let mut out = match &result.outcome {
        ResolveOutcome::Found { candidate } => format!(
            "FOUND {} score {}{}",
            candidate.element,
            candidate.specificity_score,
            if m.actionable { "" } else { " (not actionable)" }
        ),
        ResolveOutcome::Ambiguous { candidates } => {
            format!("AMBIGUOUS {} candidates", candidates.len())
        }
        ResolveOutcome::NotFound => match result.failure() {
            Some(failure) => format!("NOT FOUND: {}", failure),
            None => "NOT FOUND".to_string(),
        },
    };
    out.push_str(&format!(
        "\n# {} strategies, {} polls, {}ms\n",
        m.strategies_tried, m.polls, m.elapsed_ms
    ));
    for candidate in result.candidates() {
        let matched: Vec<&str> = candidate
            .matched_strategies
            .iter()
            .filter_map(|&i| bundle.strategies.get(i))
            .map(|s| s.kind.as_str())
            .collect();
        out.push_str(&format!(
            "  {} score={} via {}",
            candidate.element,
            candidate.specificity_score,
            matched.join("+")
        ));
        if let Some(d) = candidate.distance_from_hint {
            out.push_str(&format!(" distance={:.2}", d));
        }
        out.push('\n');
    }
    for skipped in &m.skipped_strategies {
        out.push_str(&format!(
            "  skipped [{}] {}: {}\n",
            skipped.index, skipped.kind, skipped.reason
        ));
    }
    out
}

pub fn format_verification(result: &VerificationResult) -> String {
    let mut out = String::new();
    write_verification(&mut out, result, 0);
    out
}

fn write_verification(out: &mut String, result: &VerificationResult, depth: usize) {
    let mark = if result.passed { "PASS" } else { "FAIL" };
    out.push_str(&format!(
        "{}{} {} ({}ms)",
        "  ".repeat(depth),
        mark,
        result.condition.describe(),
        result.elapsed_ms
    ));
    if let Some(reason) = &result.failure_reason {
        out.push_str(&format!(": {}", reason));
    }
    out.push('\n');
    for child in &result.details {
        write_verification(out, child, depth + 1);
    }
}

pub fn format_step(report: &StepReport) -> String {
    let status = match report.status {
        StepStatus::Passed => "OK",
        StepStatus::Recovered => "RECOVERED",
        StepStatus::Failed => "FAILED",
    };
    let mut out = format!(
        "{} {:?} {} ({}ms)",
        status, report.kind, report.step_key, report.elapsed_ms
    );
    if let Some(failure) = &report.failure {
        out.push_str(&format!(": {}", failure));
    }
    if let Some(error) = &report.action_error {
        out.push_str(&format!(": {}", error));
    }
    for action in &report.recovery {
        out.push_str(&format!("\n  # {}", action));
    }
    if let Some(strategy) = &report.proposed_strategy {
        out.push_str(&format!(
            "\n  # suggest {} {}",
            strategy.kind, strategy.value
        ));
    }
    out
}

pub fn format_workflow(report: &WorkflowReport) -> String {
    let mut out: Vec<String> = report.steps.iter().map(format_step).collect();
    out.push(format!(
        "{} passed, {} recovered, {} failed, {} skipped",
        report.count(StepStatus::Passed),
        report.count(StepStatus::Recovered),
        report.count(StepStatus::Failed),
        report.skipped
    ));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_common::condition::{ElementCheck, SuccessCondition};

    #[test]
    fn test_verification_tree_is_indented() {
        let leaf = SuccessCondition::element(ElementCheck::Visible, "#done", 100);
        let root = SuccessCondition::all(vec![leaf.clone()]);
        let result = VerificationResult::fail(&root, "condition 1 of 1 failed", 100)
            .with_details(vec![VerificationResult::fail(&leaf, "no element matched", 100)]);
        let text = format_verification(&result);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("FAIL all(1 conditions)"));
        assert!(lines[1].starts_with("  FAIL element \"#done\" visible"));
    }
}
