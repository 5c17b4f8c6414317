//! Heuristics for attribute values that will not survive a rebuild or re-render.

use regex::Regex;
use std::sync::LazyLock;

static LONG_DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4,}").unwrap());

static FRAMEWORK_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(css-|sc-|jsx-|svelte-|emotion-|ng-|ember\d)").unwrap()
});

static HASH_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|[-_])[0-9a-f]{5,}$").unwrap());

static CSS_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__[A-Za-z0-9_-]{5,}$").unwrap());

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s.,:/%+\-$€£¥#()]+$").unwrap());

/// Whether an id, class or attribute value looks generated.
pub fn is_dynamic_token(token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }
    if LONG_DIGIT_RUN.is_match(token) || FRAMEWORK_PREFIX.is_match(token) {
        return true;
    }
    if CSS_MODULE.is_match(token) {
        return true;
    }
    // A hex run only counts as a hash when it carries at least one digit.
    HASH_SUFFIX
        .find(token)
        .is_some_and(|m| m.as_str().chars().any(|c| c.is_ascii_digit()))
}

/// Text too short or too numeric to identify an element by itself.
pub fn is_fragile_text(text: &str) -> bool {
    text.chars().count() < 3 || NUMERIC.is_match(text) || LONG_DIGIT_RUN.is_match(text)
}

/// Class tokens that are neither generated nor pure state markers.
pub fn stable_classes<'a>(classes: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    classes
        .filter(|c| !is_dynamic_token(c) && !is_state_class(c))
        .collect()
}

fn is_state_class(class: &str) -> bool {
    matches!(
        class,
        "active" | "selected" | "focus" | "focused" | "hover" | "open" | "disabled" | "hidden"
    ) || class.starts_with("is-")
        || class.starts_with("has-")
}
