//! State wait primitives.
//!
//! Each primitive polls the page through the `DomAccessor` at a fixed interval until its
//! predicate holds or its timeout passes. Primitives never error: a DOM failure during a
//! tick just counts as "not yet".

use crate::clock::{Clock, DEFAULT_POLL_INTERVAL_MS, Deadline, Poller};
use crate::dom::DomAccessor;
use regex::Regex;
use retrace_common::condition::{ElementCheck, ElementCondition};
use retrace_common::error::DomError;
use retrace_common::protocol::{DomFingerprint, ElementInfo, NetworkActivity, NodeId, normalize_text};
use retrace_common::result::WaitResult;
use retrace_common::scope::Scope;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_DOM_QUIET_MS: u64 = 300;
pub const DEFAULT_NETWORK_IDLE_MS: u64 = 500;

pub const DEFAULT_LOADER_SELECTORS: &[&str] = &[
    ".spinner",
    ".loading",
    ".loader",
    ".skeleton",
    "[aria-busy=\"true\"]",
    "[role=progressbar]",
];

/// Outcome of an element wait, with what the last tick saw.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementWait {
    pub result: WaitResult,
    pub observed: String,
}

pub struct StateWaiter<'a> {
    dom: &'a dyn DomAccessor,
    clock: &'a dyn Clock,
    poll_interval: Duration,
    deadline: Deadline,
    loader_selectors: Vec<String>,
}

impl<'a> StateWaiter<'a> {
    pub fn new(dom: &'a dyn DomAccessor, clock: &'a dyn Clock) -> Self {
        Self {
            dom,
            clock,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            deadline: Deadline::none(),
            loader_selectors: DEFAULT_LOADER_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(interval_ms);
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Extra loader selectors, checked after the built-in ones.
    pub fn with_loader_selectors(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        for selector in extra {
            if !self.loader_selectors.contains(&selector) {
                self.loader_selectors.push(selector);
            }
        }
        self
    }

    pub fn dom(&self) -> &'a dyn DomAccessor {
        self.dom
    }

    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Wait until the URL differs from `from`, or from the URL at call time.
    pub async fn wait_for_url_change(&self, from: Option<&str>, timeout_ms: u64) -> WaitResult {
        let baseline = match from {
            Some(url) => url.to_string(),
            None => self.url().await.unwrap_or_default(),
        };
        let baseline = baseline.as_str();
        self.poll_until(timeout_ms, || async move {
            self.url().await.is_some_and(|url| url != baseline)
        })
        .await
    }

    pub async fn wait_for_url_contains(&self, needle: &str, timeout_ms: u64) -> WaitResult {
        self.poll_until(timeout_ms, || async move {
            self.url().await.is_some_and(|url| url.contains(needle))
        })
        .await
    }

    /// An invalid pattern fails immediately.
    pub async fn wait_for_url_matches(&self, pattern: &str, timeout_ms: u64) -> WaitResult {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                debug!("Invalid URL pattern '{}': {}", pattern, e);
                return WaitResult::TIMED_OUT;
            }
        };
        let re = &re;
        self.poll_until(timeout_ms, || async move {
            self.url().await.is_some_and(|url| re.is_match(&url))
        })
        .await
    }

    /// Wait until visible text containing `text` exists inside `scope` (the page when `None`).
    pub async fn wait_for_text(
        &self,
        text: &str,
        scope: Option<&Scope>,
        timeout_ms: u64,
    ) -> WaitResult {
        self.poll_until(timeout_ms, || async move {
            self.visible_text_matches(text, scope).await > 0
        })
        .await
    }

    /// Wait until no visible text containing `text` remains. A missing scope counts as gone.
    pub async fn wait_for_text_gone(
        &self,
        text: &str,
        scope: Option<&Scope>,
        timeout_ms: u64,
    ) -> WaitResult {
        self.poll_until(timeout_ms, || async move {
            self.visible_text_matches(text, scope).await == 0
        })
        .await
    }

    pub async fn wait_for_title_contains(&self, needle: &str, timeout_ms: u64) -> WaitResult {
        self.poll_until(timeout_ms, || async move {
            match self.dom.page().await {
                Ok(page) => page.title.contains(needle),
                Err(_) => false,
            }
        })
        .await
    }

    /// Wait until the subtree fingerprint has not changed for `quiet_ms`.
    pub async fn wait_for_dom_stable(
        &self,
        quiet_ms: u64,
        timeout_ms: u64,
        scope: Option<&Scope>,
    ) -> WaitResult {
        let quiet = Duration::from_millis(quiet_ms);
        let mut poll = self.poller(timeout_ms);
        let mut last: Option<Option<DomFingerprint>> = None;
        let mut since = poll.now();
        loop {
            let sample = self.fingerprint(scope).await;
            if last.as_ref() != Some(&sample) {
                last = Some(sample);
                since = poll.now();
            } else if poll.now().saturating_sub(since) >= quiet {
                debug!("DOM stable after {}ms", poll.elapsed_ms());
                return WaitResult::OK;
            }
            if poll.tick().await.is_err() {
                return WaitResult::TIMED_OUT;
            }
        }
    }

    /// Wait until no request has been in flight or started for `idle_ms`.
    pub async fn wait_for_network_idle(&self, idle_ms: u64, timeout_ms: u64) -> WaitResult {
        let idle = Duration::from_millis(idle_ms);
        let mut poll = self.poller(timeout_ms);
        let mut last: Option<NetworkActivity> = None;
        let mut since = poll.now();
        loop {
            match self.dom.network().await {
                Ok(activity) => {
                    let changed = last.is_none_or(|prev| prev.started != activity.started);
                    if activity.inflight > 0 || changed {
                        since = poll.now();
                    } else if poll.now().saturating_sub(since) >= idle {
                        return WaitResult::OK;
                    }
                    last = Some(activity);
                }
                Err(e) => {
                    debug!("Network activity unavailable: {}", e);
                    since = poll.now();
                }
            }
            if poll.tick().await.is_err() {
                return WaitResult::TIMED_OUT;
            }
        }
    }

    /// Wait until no visible element matches any loader selector.
    pub async fn wait_for_loaders_gone(&self, timeout_ms: u64) -> WaitResult {
        self.poll_until(timeout_ms, || async move { !self.loaders_visible().await })
            .await
    }

    /// Poll one element leaf until its check holds.
    ///
    /// The target is tried as a CSS selector first, then as text. `default_scope` applies
    /// when the condition carries no scope of its own.
    pub async fn wait_for_element(
        &self,
        condition: &ElementCondition,
        default_scope: Option<&Scope>,
    ) -> ElementWait {
        if condition.kind.needs_expected_value() && condition.expected_value.is_none() {
            return ElementWait {
                result: WaitResult::TIMED_OUT,
                observed: format!("{} needs an expected value", condition.kind.as_str()),
            };
        }
        let scope = condition.scope.as_ref().or(default_scope);
        let mut poll = self.poller(condition.timeout_ms);
        loop {
            let (ok, observed) = self.check_element(condition, scope).await;
            if ok {
                return ElementWait {
                    result: WaitResult::OK,
                    observed,
                };
            }
            if poll.tick().await.is_err() {
                return ElementWait {
                    result: WaitResult::TIMED_OUT,
                    observed,
                };
            }
        }
    }

    /// Scope root for this tick; `None` scope means the document root.
    pub async fn scope_root(&self, scope: Option<&Scope>) -> Result<Option<NodeId>, DomError> {
        match scope {
            None | Some(Scope::Page) => self.dom.document_root().await.map(Some),
            Some(scope) => self.dom.resolve_scope(scope).await,
        }
    }

    /// Elements for an element-condition target: selector matches, else text matches.
    pub async fn lookup(&self, target: &str, root: NodeId) -> Result<Vec<ElementInfo>, DomError> {
        let nodes = match self.dom.query_selector_all(target, root).await {
            Ok(nodes) if !nodes.is_empty() => nodes,
            Ok(_) | Err(DomError::InvalidSelector { .. }) => {
                self.dom.find_by_text(target, root).await?
            }
            Err(e) => return Err(e),
        };
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(info) = self.dom.element(node).await? {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Whether `node` passes every check right now. A detached node passes none.
    pub async fn node_passes(&self, node: NodeId, checks: &[ElementCheck]) -> bool {
        let Ok(Some(info)) = self.dom.element(node).await else {
            return false;
        };
        let matches = std::slice::from_ref(&info);
        checks
            .iter()
            .all(|&kind| evaluate_check(&ElementCondition::new(kind, "", 0), matches).0)
    }

    async fn check_element(
        &self,
        condition: &ElementCondition,
        scope: Option<&Scope>,
    ) -> (bool, String) {
        let root = match self.scope_root(scope).await {
            Ok(Some(root)) => root,
            Ok(None) => {
                return (
                    condition.kind == ElementCheck::Gone,
                    "scope not found".to_string(),
                );
            }
            Err(e) => return (false, e.to_string()),
        };
        let matches = match self.lookup(&condition.target, root).await {
            Ok(matches) => matches,
            Err(e) => return (false, e.to_string()),
        };
        evaluate_check(condition, &matches)
    }

    async fn poll_until<F, Fut>(&self, timeout_ms: u64, mut check: F) -> WaitResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut poll = self.poller(timeout_ms);
        loop {
            if check().await {
                return WaitResult::OK;
            }
            if poll.tick().await.is_err() {
                return WaitResult::TIMED_OUT;
            }
        }
    }

    fn poller(&self, timeout_ms: u64) -> Poller<'_> {
        Poller::start(
            self.clock,
            Duration::from_millis(timeout_ms),
            self.poll_interval,
            &self.deadline,
        )
    }

    async fn url(&self) -> Option<String> {
        self.dom.page().await.ok().map(|p| p.url)
    }

    async fn visible_text_matches(&self, text: &str, scope: Option<&Scope>) -> usize {
        let Ok(Some(root)) = self.scope_root(scope).await else {
            return 0;
        };
        let Ok(nodes) = self.dom.find_by_text(text, root).await else {
            return 0;
        };
        let mut visible = 0;
        for node in nodes {
            if let Ok(Some(info)) = self.dom.element(node).await
                && !info.state.hidden
            {
                visible += 1;
            }
        }
        visible
    }

    async fn fingerprint(&self, scope: Option<&Scope>) -> Option<DomFingerprint> {
        let root = self.scope_root(scope).await.ok().flatten()?;
        self.dom.fingerprint(root).await.ok()
    }

    async fn loaders_visible(&self) -> bool {
        let Ok(root) = self.dom.document_root().await else {
            return false;
        };
        for selector in &self.loader_selectors {
            let nodes = match self.dom.query_selector_all(selector, root).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    debug!("Skipping loader selector '{}': {}", selector, e);
                    continue;
                }
            };
            for node in nodes {
                if let Ok(Some(info)) = self.dom.element(node).await
                    && !info.state.hidden
                {
                    return true;
                }
            }
        }
        false
    }
}

/// Apply an element check to the elements found this tick.
///
/// `has_text` compares normalized text case-insensitively, the same rule the text
/// fallback in `lookup` uses to find targets.
fn evaluate_check(condition: &ElementCondition, matches: &[ElementInfo]) -> (bool, String) {
    let expected = condition.expected_value.as_deref().unwrap_or("");
    let visible: Vec<&ElementInfo> = matches.iter().filter(|m| !m.state.hidden).collect();
    let first = visible.first().copied().or(matches.first());

    if condition.kind == ElementCheck::Gone {
        return if visible.is_empty() {
            (true, "no visible match".into())
        } else {
            (false, format!("{} visible match(es)", visible.len()))
        };
    }
    let Some(el) = first else {
        return (false, "no element matched".into());
    };

    let ok = match condition.kind {
        ElementCheck::Visible => !visible.is_empty(),
        ElementCheck::Gone => visible.is_empty(),
        ElementCheck::Enabled => !el.state.disabled,
        ElementCheck::Disabled => el.state.disabled,
        ElementCheck::Checked => el.state.checked,
        ElementCheck::Unchecked => !el.state.checked,
        ElementCheck::Focused => el.state.focused,
        ElementCheck::HasText => {
            let needle = normalize_text(expected).to_lowercase();
            matches
                .iter()
                .any(|m| normalize_text(&m.text).to_lowercase().contains(&needle))
        }
        ElementCheck::HasValue => el.value.as_deref() == Some(expected),
        ElementCheck::HasAttribute => match expected.split_once('=') {
            Some((name, value)) => el.attr(name.trim()) == Some(value.trim()),
            None => el.has_attr(expected.trim()),
        },
    };
    (ok, describe(el))
}

fn describe(el: &ElementInfo) -> String {
    let mut flags = Vec::new();
    if el.state.hidden {
        flags.push("hidden");
    }
    if el.state.disabled {
        flags.push("disabled");
    }
    if el.state.checked {
        flags.push("checked");
    }
    if el.state.focused {
        flags.push("focused");
    }
    let mut out = format!("<{}>", el.tag);
    if !flags.is_empty() {
        out.push_str(&format!(" [{}]", flags.join(", ")));
    }
    if !el.text.is_empty() {
        out.push_str(&format!(" text {:?}", el.text));
    }
    if let Some(value) = &el.value {
        out.push_str(&format!(" value {:?}", value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_common::protocol::{ElementState, NodeId};
    use std::collections::BTreeMap;

    fn info(tag: &str, text: &str, state: ElementState) -> ElementInfo {
        ElementInfo {
            id: NodeId(1),
            tag: tag.into(),
            attributes: BTreeMap::from([("aria-expanded".to_string(), "true".to_string())]),
            own_text: text.into(),
            text: text.into(),
            value: Some("alice@example.com".into()),
            state,
            rect: None,
        }
    }

    #[test]
    fn test_gone_ignores_hidden_matches() {
        let cond = ElementCondition::new(ElementCheck::Gone, ".toast", 100);
        let hidden = info(
            "div",
            "Saved",
            ElementState {
                hidden: true,
                ..Default::default()
            },
        );
        assert!(evaluate_check(&cond, &[hidden]).0);
        assert!(evaluate_check(&cond, &[]).0);
    }

    #[test]
    fn test_value_and_attribute_checks() {
        let el = info("input", "", ElementState::default());
        let has_value = ElementCondition::new(ElementCheck::HasValue, "#email", 100)
            .expecting("alice@example.com");
        assert!(evaluate_check(&has_value, std::slice::from_ref(&el)).0);

        let has_attr = ElementCondition::new(ElementCheck::HasAttribute, "#menu", 100)
            .expecting("aria-expanded=true");
        assert!(evaluate_check(&has_attr, std::slice::from_ref(&el)).0);

        let disabled = ElementCondition::new(ElementCheck::Disabled, "#email", 100);
        let (ok, observed) = evaluate_check(&disabled, &[el]);
        assert!(!ok);
        assert!(observed.starts_with("<input>"));
    }

    #[test]
    fn test_has_text_ignores_case_and_spacing() {
        let el = info("p", "Order  SAVED", ElementState::default());
        let cond =
            ElementCondition::new(ElementCheck::HasText, "p", 100).expecting("order saved");
        assert!(evaluate_check(&cond, std::slice::from_ref(&el)).0);
        let other = ElementCondition::new(ElementCheck::HasText, "p", 100).expecting("deleted");
        assert!(!evaluate_check(&other, &[el]).0);
    }

    #[test]
    fn test_missing_element_fails_non_gone_checks() {
        let cond = ElementCondition::new(ElementCheck::Visible, "#nope", 100);
        assert_eq!(
            evaluate_check(&cond, &[]),
            (false, "no element matched".to_string())
        );
    }
}
