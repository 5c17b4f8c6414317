//! Recorded locators.
//!
//! A `LocatorBundle` is the set of alternative ways to find one specific element
//! again. Bundles are produced once at record time and never mutated afterwards;
//! replay derives new bundles from them (`augmented`, `without_kinds`, `with_scope`).

use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// TEXT strategy values are cut to this many characters.
pub const MAX_TEXT_LEN: usize = 80;

/// Normalized text cut to `MAX_TEXT_LEN` characters: the form TEXT values are stored
/// and compared in.
pub fn truncate_text(text: &str) -> String {
    let normalized = crate::protocol::normalize_text(text);
    if normalized.chars().count() <= MAX_TEXT_LEN {
        return normalized;
    }
    let cut: String = normalized.chars().take(MAX_TEXT_LEN).collect();
    cut.trim_end().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    Css,
    Text,
    Aria,
    Role,
    TestId,
    Xpath,
    Position,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 7] = [
        StrategyKind::TestId,
        StrategyKind::Aria,
        StrategyKind::Role,
        StrategyKind::Css,
        StrategyKind::Xpath,
        StrategyKind::Text,
        StrategyKind::Position,
    ];

    /// TEXT and POSITION are the least specific kinds and the first to be dropped
    /// when they cause a tie.
    pub fn is_weak(self) -> bool {
        matches!(self, StrategyKind::Text | StrategyKind::Position)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Css => "CSS",
            StrategyKind::Text => "TEXT",
            StrategyKind::Aria => "ARIA",
            StrategyKind::Role => "ROLE",
            StrategyKind::TestId => "TEST_ID",
            StrategyKind::Xpath => "XPATH",
            StrategyKind::Position => "POSITION",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyFeatures {
    pub has_stable_attributes: bool,
    pub has_dynamic_parts: bool,
    pub unique_match_at_record_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorStrategy {
    pub kind: StrategyKind,
    pub value: String,
    #[serde(default)]
    pub features: StrategyFeatures,
}

impl LocatorStrategy {
    pub fn new(kind: StrategyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            features: StrategyFeatures::default(),
        }
    }

    pub fn with_features(mut self, features: StrategyFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn stable(mut self) -> Self {
        self.features.has_stable_attributes = true;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.features.has_dynamic_parts = true;
        self
    }

    /// Ranking weight.
    ///
    /// TEST_ID > ARIA = ROLE > CSS(stable) > XPATH > CSS(unstable) > TEXT > POSITION
    pub fn weight(&self) -> u32 {
        match self.kind {
            StrategyKind::TestId => 100,
            StrategyKind::Aria | StrategyKind::Role => 80,
            StrategyKind::Css if self.features.has_stable_attributes => 60,
            StrategyKind::Xpath => 40,
            StrategyKind::Css => 35,
            StrategyKind::Text => 30,
            StrategyKind::Position => 10,
        }
    }

    /// Same kind and value; features are ignored.
    pub fn same_query(&self, other: &LocatorStrategy) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

/// Tie-break hint recorded next to the strategies.
///
/// Serialized as a plain string (`sibling-index:2`, `nearby-text:Email`,
/// `landmark:nav`) so bundles stay readable when exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Disambiguator {
    SiblingIndex(usize),
    NearbyText(String),
    Landmark(String),
}

impl fmt::Display for Disambiguator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disambiguator::SiblingIndex(i) => write!(f, "sibling-index:{}", i),
            Disambiguator::NearbyText(t) => write!(f, "nearby-text:{}", t),
            Disambiguator::Landmark(l) => write!(f, "landmark:{}", l),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unrecognized disambiguator: {0}")]
pub struct DisambiguatorParseError(pub String);

impl FromStr for Disambiguator {
    type Err = DisambiguatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, rest)) = s.split_once(':') else {
            return Err(DisambiguatorParseError(s.to_string()));
        };
        match prefix {
            "sibling-index" => rest
                .trim()
                .parse()
                .map(Disambiguator::SiblingIndex)
                .map_err(|_| DisambiguatorParseError(s.to_string())),
            "nearby-text" => Ok(Disambiguator::NearbyText(rest.to_string())),
            "landmark" => Ok(Disambiguator::Landmark(rest.to_string())),
            _ => Err(DisambiguatorParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Disambiguator {
    type Error = DisambiguatorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Disambiguator> for String {
    fn from(value: Disambiguator) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorBundle {
    /// Best-first.
    pub strategies: Vec<LocatorStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disambiguators: Vec<Disambiguator>,
    /// Strategies are fallbacks in recorded order: only the first one that matches
    /// anything takes part in ranking.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ordered: bool,
}

impl LocatorBundle {
    pub fn new(strategies: Vec<LocatorStrategy>) -> Self {
        Self {
            strategies,
            scope: None,
            disambiguators: vec![],
            ordered: false,
        }
    }

    pub fn in_recorded_order(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn scope_or_page(&self) -> Scope {
        self.scope.clone().unwrap_or(Scope::Page)
    }

    pub fn best(&self) -> Option<&LocatorStrategy> {
        self.strategies.first()
    }

    pub fn has_kind(&self, kind: StrategyKind) -> bool {
        self.strategies.iter().any(|s| s.kind == kind)
    }

    /// Copy of this bundle restricted to another scope.
    pub fn with_scope(&self, scope: Scope) -> LocatorBundle {
        LocatorBundle {
            scope: Some(scope),
            ..self.clone()
        }
    }

    /// Copy of this bundle without the given strategy kinds.
    pub fn without_kinds(&self, kinds: &[StrategyKind]) -> LocatorBundle {
        LocatorBundle {
            strategies: self
                .strategies
                .iter()
                .filter(|s| !kinds.contains(&s.kind))
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Copy of this bundle with extra strategies appended, skipping duplicates.
    pub fn augmented(&self, extra: impl IntoIterator<Item = LocatorStrategy>) -> LocatorBundle {
        let mut bundle = self.clone();
        for strategy in extra {
            if !bundle.strategies.iter().any(|s| s.same_query(&strategy)) {
                bundle.strategies.push(strategy);
            }
        }
        bundle
    }

    /// Whether `strategy` already appears (same kind and value).
    pub fn contains(&self, strategy: &LocatorStrategy) -> bool {
        self.strategies.iter().any(|s| s.same_query(strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_ordering() {
        let test_id = LocatorStrategy::new(StrategyKind::TestId, "data-testid=go");
        let aria = LocatorStrategy::new(StrategyKind::Aria, "Go");
        let css_stable = LocatorStrategy::new(StrategyKind::Css, "#go").stable();
        let xpath = LocatorStrategy::new(StrategyKind::Xpath, "//button");
        let css = LocatorStrategy::new(StrategyKind::Css, "button.primary");
        let text = LocatorStrategy::new(StrategyKind::Text, "Go");
        let position = LocatorStrategy::new(StrategyKind::Position, "form > button:nth-of-type(1)");

        let weights: Vec<u32> = [&test_id, &aria, &css_stable, &xpath, &css, &text, &position]
            .iter()
            .map(|s| s.weight())
            .collect();
        let mut sorted = weights.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(weights, sorted);
        assert_eq!(
            LocatorStrategy::new(StrategyKind::Role, "button").weight(),
            aria.weight()
        );
    }

    #[test]
    fn test_disambiguator_wire_format() {
        let hints = vec![
            Disambiguator::SiblingIndex(2),
            Disambiguator::NearbyText("Email: x".into()),
            Disambiguator::Landmark("nav".into()),
        ];
        let json = serde_json::to_string(&hints).unwrap();
        assert_eq!(
            json,
            r#"["sibling-index:2","nearby-text:Email: x","landmark:nav"]"#
        );
        let back: Vec<Disambiguator> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hints);
    }

    #[test]
    fn test_bad_disambiguator_rejected() {
        assert!("sibling-index:abc".parse::<Disambiguator>().is_err());
        assert!("whatever".parse::<Disambiguator>().is_err());
    }

    #[test]
    fn test_derived_bundles_leave_original_untouched() {
        let original = LocatorBundle::new(vec![
            LocatorStrategy::new(StrategyKind::Role, "option"),
            LocatorStrategy::new(StrategyKind::Text, "Apple"),
        ]);
        let relaxed = original.without_kinds(&[StrategyKind::Text]);
        let augmented = original.augmented([
            LocatorStrategy::new(StrategyKind::Text, "Apple"),
            LocatorStrategy::new(StrategyKind::Css, "#apple"),
        ]);

        assert_eq!(original.strategies.len(), 2);
        assert_eq!(relaxed.strategies.len(), 1);
        assert_eq!(augmented.strategies.len(), 3);
        assert!(augmented.contains(&LocatorStrategy::new(StrategyKind::Css, "#apple")));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("  Save \n changes "), "Save changes");
        let long = "word ".repeat(40);
        let cut = truncate_text(&long);
        assert!(cut.chars().count() <= MAX_TEXT_LEN);
        assert!(!cut.ends_with(' '));
        assert_eq!(truncate_text(&cut), cut);
    }

    #[test]
    fn test_kind_serialization() {
        let s = LocatorStrategy::new(StrategyKind::TestId, "data-testid=submit").stable();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "TEST_ID");
        assert_eq!(json["features"]["hasStableAttributes"], true);
    }
}
