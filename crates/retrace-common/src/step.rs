//! Replay-ready units handed over by the recorder.

use crate::condition::SuccessCondition;
use crate::locator::{LocatorBundle, LocatorStrategy, StrategyKind};
use crate::protocol::ElementState;
use crate::scope::Scope;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Select,
    Check,
    Uncheck,
    Hover,
    Scroll,
    Submit,
    Navigate,
    #[serde(other)]
    Other,
}

impl ActionKind {
    /// Steps that operate on the page rather than on one element.
    pub fn targets_element(self) -> bool {
        !matches!(self, ActionKind::Navigate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub payload: StepPayload,
}

impl RecordedStep {
    /// Stable key used by the correction channel.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}@{}", self.payload.url, self.payload.timestamp),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPayload {
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub fallback_selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator_bundle: Option<LocatorBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_condition: Option<SuccessCondition>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_state: Option<ElementState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_snapshot: Option<VisualSnapshot>,
}

impl StepPayload {
    /// The recorded bundle, or one built from the plain selector fields.
    ///
    /// An explicit payload `scope` fills in a bundle without one.
    pub fn effective_bundle(&self) -> LocatorBundle {
        let mut bundle = match &self.locator_bundle {
            Some(bundle) => bundle.clone(),
            None => self.legacy_bundle(),
        };
        if bundle.scope.is_none() {
            bundle.scope = self.scope.clone();
        }
        bundle
    }

    /// Selector, fallbacks, then xpath, tried in that order.
    fn legacy_bundle(&self) -> LocatorBundle {
        let css = std::iter::once(&self.selector)
            .chain(&self.fallback_selectors)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| LocatorStrategy::new(StrategyKind::Css, s));
        let xpath = self
            .xpath
            .as_deref()
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .map(|x| LocatorStrategy::new(StrategyKind::Xpath, x));
        LocatorBundle::default()
            .augmented(css.chain(xpath))
            .in_recorded_order()
    }
}

/// Opaque image bytes captured at record time. Base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualSnapshot(pub Vec<u8>);

impl Serialize for VisualSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for VisualSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(VisualSnapshot)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_payload_degrades_to_selector_bundle() {
        let json = r##"{
            "type": "click",
            "payload": {
                "selector": "#save",
                "fallbackSelectors": ["button.save", "#save"],
                "xpath": "//form/button[2]",
                "timestamp": 1700,
                "url": "https://app.test/edit",
                "scope": {"type": "modal"}
            }
        }"##;
        let step: RecordedStep = serde_json::from_str(json).unwrap();
        let bundle = step.payload.effective_bundle();

        let kinds: Vec<_> = bundle.strategies.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![StrategyKind::Css, StrategyKind::Css, StrategyKind::Xpath]
        );
        assert_eq!(bundle.scope, Some(Scope::Modal));
        assert!(bundle.ordered);
        assert_eq!(step.key(), "https://app.test/edit@1700");
    }

    #[test]
    fn test_duplicate_fallbacks_collapse() {
        let payload = StepPayload {
            selector: " #save ".into(),
            fallback_selectors: vec!["button.save".into(), "".into(), "button.save".into()],
            ..Default::default()
        };
        let values: Vec<_> = payload
            .effective_bundle()
            .strategies
            .into_iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec!["#save", "button.save"]);
    }

    #[test]
    fn test_recorded_bundle_is_not_ordered() {
        let payload = StepPayload {
            selector: "#save".into(),
            locator_bundle: Some(LocatorBundle::new(vec![LocatorStrategy::new(
                StrategyKind::Aria,
                "Save",
            )])),
            ..Default::default()
        };
        let bundle = payload.effective_bundle();
        assert!(!bundle.ordered);
        assert_eq!(bundle.strategies.len(), 1);
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("ordered").is_none());
    }

    #[test]
    fn test_unknown_action_kind() {
        let step: RecordedStep =
            serde_json::from_str(r#"{"type": "drag", "payload": {}}"#).unwrap();
        assert_eq!(step.kind, ActionKind::Other);
    }

    #[test]
    fn test_visual_snapshot_is_base64() {
        let payload = StepPayload {
            visual_snapshot: Some(VisualSnapshot(vec![0x89, b'P', b'N', b'G'])),
            ..Default::default()
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["visualSnapshot"], "iVBORw==");
        let back: StepPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.visual_snapshot, payload.visual_snapshot);
    }
}
