//! Record-time locator construction.
//!
//! `FeatureExtractor` turns one live element into a `LocatorBundle`: every strategy
//! kind that applies, stability features for each, tie-break hints and an inferred scope.

pub mod anchors;
pub mod scope;
pub mod stability;

use crate::dom::selector::{is_plain_ident, quote_value};
use crate::dom::{DomAccessor, xpath};
use retrace_common::error::DomError;
use retrace_common::locator::{
    Disambiguator, LocatorBundle, LocatorStrategy, StrategyKind, truncate_text,
};
use retrace_common::protocol::{ElementInfo, NodeId};
use retrace_common::scope::Scope;
use stability::{is_dynamic_token, is_fragile_text, stable_classes};
use std::cmp::Reverse;
use tracing::debug;

pub const TEST_ID_ATTRS: &[&str] = &[
    "data-testid",
    "data-test-id",
    "data-test",
    "data-qa",
    "data-cy",
    "data-automation-id",
];

/// `data-*` attributes that track UI state rather than identity.
const VOLATILE_DATA_ATTRS: &[&str] = &[
    "data-state",
    "data-active",
    "data-selected",
    "data-highlighted",
    "data-focused",
    "data-index",
    "data-orientation",
];

/// Relative XPath fallback keeps at most this many steps.
const RELATIVE_XPATH_STEPS: usize = 3;
const MAX_XPATH_DEPTH: usize = 8;
const MAX_ATTR_VALUE_LEN: usize = 64;

pub struct FeatureExtractor<'a> {
    dom: &'a dyn DomAccessor,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(dom: &'a dyn DomAccessor) -> Self {
        Self { dom }
    }

    pub async fn extract(&self, node: NodeId) -> Result<LocatorBundle, DomError> {
        let scope = scope::infer_scope(self.dom, node).await?;
        let strategies = self.strategies(node, &scope).await?;
        let disambiguators = self.disambiguators(node).await?;
        debug!(
            node = %node,
            strategies = strategies.len(),
            scope = %scope,
            "extracted locator bundle"
        );
        Ok(LocatorBundle {
            strategies,
            scope: Some(scope),
            disambiguators,
            ordered: false,
        })
    }

    /// All applicable strategies, best-first, with `unique_match_at_record_time` filled in.
    pub async fn strategies(
        &self,
        node: NodeId,
        scope: &Scope,
    ) -> Result<Vec<LocatorStrategy>, DomError> {
        let el = self
            .dom
            .element(node)
            .await?
            .ok_or(DomError::Detached(node))?;

        let mut strategies = Vec::new();
        if let Some(s) = test_id_strategy(&el) {
            strategies.push(s);
        }
        if let Some(name) = self.dom.accessible_name(node).await? {
            let mut s = LocatorStrategy::new(StrategyKind::Aria, name.clone()).stable();
            if is_dynamic_token(&name) {
                s = s.dynamic();
            }
            strategies.push(s);
        }
        if let Some(role) = el.role() {
            strategies.push(LocatorStrategy::new(StrategyKind::Role, role));
        }
        if let Some(s) = css_strategy(&el) {
            strategies.push(s);
        }
        if let Some(s) = self.xpath_strategy(node, &el).await? {
            strategies.push(s);
        }
        if !el.own_text.is_empty() {
            let text = truncate_text(&el.own_text);
            let mut s = LocatorStrategy::new(StrategyKind::Text, text.clone());
            if is_fragile_text(&text) {
                s = s.dynamic();
            }
            strategies.push(s);
        }
        if let Some(s) = self.position_strategy(node, &el).await? {
            strategies.push(s);
        }

        let root = match scope {
            Scope::Iframe(_) | Scope::ShadowRoot(_) => self.dom.resolve_scope(scope).await?,
            _ => None,
        };
        let root = match root {
            Some(root) => root,
            None => self.dom.document_root().await?,
        };
        for strategy in &mut strategies {
            strategy.features.unique_match_at_record_time =
                match self.dom.query(strategy, root).await {
                    Ok(hits) => hits == [node],
                    Err(e) => {
                        debug!(kind = %strategy.kind, error = %e, "uniqueness check failed");
                        false
                    }
                };
        }

        strategies.sort_by_key(|s| Reverse(s.weight()));
        Ok(strategies)
    }

    async fn disambiguators(&self, node: NodeId) -> Result<Vec<Disambiguator>, DomError> {
        let mut out = Vec::new();
        if let Some((index, count)) = anchors::same_tag_position(self.dom, node).await?
            && count > 1
        {
            out.push(Disambiguator::SiblingIndex(index));
        }
        if let Some(text) = anchors::nearby_text(self.dom, node).await? {
            out.push(Disambiguator::NearbyText(text));
        }
        if let Some(landmark) = anchors::landmark(self.dom, node).await? {
            out.push(Disambiguator::Landmark(landmark));
        }
        Ok(out)
    }

    /// Path anchored on the nearest ancestor with a stable id, else a short relative path.
    async fn xpath_strategy(
        &self,
        node: NodeId,
        el: &ElementInfo,
    ) -> Result<Option<LocatorStrategy>, DomError> {
        if let Some(pred) = anchor_predicate(el) {
            return Ok(Some(
                LocatorStrategy::new(StrategyKind::Xpath, format!("//{}[{}]", el.tag, pred))
                    .stable(),
            ));
        }

        let mut steps = vec![self.xpath_step(node, &el.tag).await?];
        let mut anchor = None;
        let mut current = node;
        while steps.len() < MAX_XPATH_DEPTH {
            let Some(parent) = self.dom.parent(current).await? else {
                break;
            };
            if self.dom.boundary(parent).await?.is_some() {
                break;
            }
            let Some(info) = self.dom.element(parent).await? else {
                break;
            };
            if let Some(pred) = anchor_predicate(&info) {
                anchor = Some(pred);
                break;
            }
            steps.push(self.xpath_step(parent, &info.tag).await?);
            current = parent;
        }
        steps.reverse();

        let strategy = match anchor {
            Some(pred) => {
                LocatorStrategy::new(StrategyKind::Xpath, format!("//*[{}]/{}", pred, steps.join("/")))
                    .stable()
            }
            None => {
                let tail = &steps[steps.len().saturating_sub(RELATIVE_XPATH_STEPS)..];
                LocatorStrategy::new(StrategyKind::Xpath, format!("//{}", tail.join("/")))
            }
        };
        Ok(Some(strategy))
    }

    async fn xpath_step(&self, node: NodeId, tag: &str) -> Result<String, DomError> {
        Ok(match anchors::same_tag_position(self.dom, node).await? {
            Some((index, count)) if count > 1 => format!("{}[{}]", tag, index + 1),
            _ => tag.to_string(),
        })
    }

    async fn position_strategy(
        &self,
        node: NodeId,
        el: &ElementInfo,
    ) -> Result<Option<LocatorStrategy>, DomError> {
        let Some(parent) = self.dom.parent(node).await? else {
            return Ok(None);
        };
        if self.dom.boundary(parent).await?.is_some() {
            return Ok(None);
        }
        let Some(parent_info) = self.dom.element(parent).await? else {
            return Ok(None);
        };
        let Some((index, _)) = anchors::same_tag_position(self.dom, node).await? else {
            return Ok(None);
        };
        Ok(Some(LocatorStrategy::new(
            StrategyKind::Position,
            format!("{} > {}:nth-of-type({})", parent_info.tag, el.tag, index + 1),
        )))
    }
}

fn test_id_strategy(el: &ElementInfo) -> Option<LocatorStrategy> {
    TEST_ID_ATTRS.iter().find_map(|attr| {
        let value = el.attr(attr)?.trim();
        (!value.is_empty())
            .then(|| LocatorStrategy::new(StrategyKind::TestId, format!("{}={}", attr, value)).stable())
    })
}

/// CSS preferring id, `data-*`, aria label and `name` over class lists.
///
/// The first clean option wins; a dynamic-looking one is kept only when nothing
/// clean exists, flagged `has_dynamic_parts`.
fn css_strategy(el: &ElementInfo) -> Option<LocatorStrategy> {
    let tag = el.tag.as_str();
    let mut fallback: Option<LocatorStrategy> = None;
    let mut consider = |selector: String, value: &str, stable: bool| {
        let mut s = LocatorStrategy::new(StrategyKind::Css, selector);
        if stable {
            s = s.stable();
        }
        if !is_dynamic_token(value) {
            return Some(s);
        }
        fallback.get_or_insert(s.dynamic());
        None
    };

    if let Some(id) = el.attr("id").map(str::trim).filter(|v| !v.is_empty()) {
        let selector = if is_plain_ident(id) {
            format!("#{}", id)
        } else {
            format!("{}[id={}]", tag, quote_value(id))
        };
        if let Some(s) = consider(selector, id, true) {
            return Some(s);
        }
    }

    for (name, value) in &el.attributes {
        if !name.starts_with("data-")
            || TEST_ID_ATTRS.contains(&name.as_str())
            || VOLATILE_DATA_ATTRS.contains(&name.as_str())
        {
            continue;
        }
        let value = value.trim();
        if value.is_empty() || value.len() > MAX_ATTR_VALUE_LEN {
            continue;
        }
        let selector = format!("{}[{}={}]", tag, name, quote_value(value));
        if let Some(s) = consider(selector, value, true) {
            return Some(s);
        }
    }

    if let Some(label) = el.attr("aria-label").map(str::trim).filter(|v| !v.is_empty()) {
        let selector = match el.attr("role") {
            Some(role) => format!(
                "{}[role={}][aria-label={}]",
                tag,
                quote_value(role),
                quote_value(label)
            ),
            None => format!("{}[aria-label={}]", tag, quote_value(label)),
        };
        if let Some(s) = consider(selector, label, true) {
            return Some(s);
        }
    }

    if let Some(name) = el.attr("name").map(str::trim).filter(|v| !v.is_empty()) {
        let selector = format!("{}[name={}]", tag, quote_value(name));
        if let Some(s) = consider(selector, name, true) {
            return Some(s);
        }
    }

    let classes: Vec<&str> = el.classes().filter(|c| is_plain_ident(c)).collect();
    let stable = stable_classes(classes.iter().copied());
    if !stable.is_empty() {
        let selector: String = stable.iter().take(2).map(|c| format!(".{}", c)).collect();
        return Some(LocatorStrategy::new(
            StrategyKind::Css,
            format!("{}{}", tag, selector),
        ));
    }

    fallback.or_else(|| {
        classes
            .iter()
            .find(|c| is_dynamic_token(c))
            .map(|c| LocatorStrategy::new(StrategyKind::Css, format!("{}.{}", tag, c)).dynamic())
    })
}

/// `#id` or a test-id attribute selector, when either is present and not generated.
pub(crate) fn stable_selector(info: &ElementInfo) -> Option<String> {
    if let Some(id) = info.attr("id")
        && is_plain_ident(id)
        && !is_dynamic_token(id)
    {
        return Some(format!("#{}", id));
    }
    TEST_ID_ATTRS.iter().find_map(|attr| {
        let value = info.attr(attr)?;
        (!value.is_empty()).then(|| format!("[{}={}]", attr, quote_value(value)))
    })
}

/// XPath predicate identifying `info` by a stable id or test id.
fn anchor_predicate(info: &ElementInfo) -> Option<String> {
    if let Some(id) = info.attr("id")
        && !id.is_empty()
        && !is_dynamic_token(id)
        && let Some(lit) = xpath::literal(id)
    {
        return Some(format!("@id={}", lit));
    }
    TEST_ID_ATTRS.iter().find_map(|attr| {
        let value = info.attr(attr)?;
        if value.is_empty() {
            return None;
        }
        xpath::literal(value).map(|lit| format!("@{}={}", attr, lit))
    })
}
