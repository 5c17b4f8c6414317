//! In-memory `DomAccessor` over JSON page snapshots.
//!
//! A `SnapshotDom` holds one page or a timeline of pages keyed by clock time; every
//! read uses the latest frame whose time has been reached, so tests can script page
//! mutations against a `ManualClock`. Node ids are pre-order indices within a frame.

use super::selector::{SelectorList, TreeView};
use super::xpath::{EvalContext, XPath, XPathTree};
use super::{Boundary, DomAccessor};
use crate::clock::Clock;
use async_trait::async_trait;
use retrace_common::error::DomError;
use retrace_common::locator::{LocatorStrategy, StrategyKind, truncate_text};
use retrace_common::protocol::{
    DomFingerprint, ElementInfo, ElementState, NetworkActivity, NodeId, PageInfo, Rect,
    implicit_role, normalize_text,
};
use retrace_common::scope::{Scope, is_row_key_cell};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

const MODAL_SELECTOR: &str = "dialog, [role=dialog], [role=alertdialog], [aria-modal=true]";
const ROW_SELECTOR: &str = "tr, [role=row]";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot timeline is empty")]
    EmptyTimeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub root: NodeSnapshot,
    #[serde(default)]
    pub network: NetworkActivity,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, root: NodeSnapshot) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            root,
            network: NetworkActivity::default(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_network(mut self, inflight: u32, started: u64) -> Self {
        self.network = NetworkActivity { inflight, started };
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Direct text only; descendants carry their own.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub state: ElementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    /// Children of a boundary node form a separate document (frame or shadow tree).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Boundary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn child(mut self, child: NodeSnapshot) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeSnapshot>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.state.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.state.disabled = true;
        self
    }

    pub fn checked(mut self) -> Self {
        self.state.checked = true;
        self
    }

    pub fn focused(mut self) -> Self {
        self.state.focused = true;
        self
    }

    pub fn frame(mut self) -> Self {
        self.boundary = Some(Boundary::Frame);
        self
    }

    pub fn shadow(mut self) -> Self {
        self.boundary = Some(Boundary::Shadow);
        self
    }
}

/// One entry of a snapshot timeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedSnapshot {
    #[serde(default)]
    pub at_ms: u64,
    pub page: PageSnapshot,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Timeline(Vec<TimedSnapshot>),
    Single(Box<PageSnapshot>),
}

pub struct SnapshotDom {
    frames: Vec<(Duration, Frame)>,
    clock: Option<Arc<dyn Clock>>,
    scrolled: Mutex<Vec<NodeId>>,
}

impl SnapshotDom {
    /// A page that never changes.
    pub fn new(page: PageSnapshot) -> Self {
        Self {
            frames: vec![(Duration::ZERO, Frame::build(&page))],
            clock: None,
            scrolled: Mutex::new(Vec::new()),
        }
    }

    /// Pages that replace each other at the given clock times (ms).
    pub fn timeline(
        clock: Arc<dyn Clock>,
        pages: Vec<(u64, PageSnapshot)>,
    ) -> Result<Self, SnapshotError> {
        if pages.is_empty() {
            return Err(SnapshotError::EmptyTimeline);
        }
        let mut frames: Vec<(Duration, Frame)> = pages
            .iter()
            .map(|(at, page)| (Duration::from_millis(*at), Frame::build(page)))
            .collect();
        frames.sort_by_key(|(at, _)| *at);
        Ok(Self {
            frames,
            clock: Some(clock),
            scrolled: Mutex::new(Vec::new()),
        })
    }

    /// Load either a single page snapshot or a `[{"at_ms", "page"}]` timeline.
    pub fn load(json: &str, clock: Arc<dyn Clock>) -> Result<Self, SnapshotError> {
        match serde_json::from_str::<SnapshotFile>(json)? {
            SnapshotFile::Single(page) => Ok(Self::new(*page)),
            SnapshotFile::Timeline(entries) => Self::timeline(
                clock,
                entries.into_iter().map(|e| (e.at_ms, e.page)).collect(),
            ),
        }
    }

    /// Elements passed to `scroll_into_view`, in call order.
    pub fn scrolled(&self) -> Vec<NodeId> {
        self.scrolled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn frame(&self) -> &Frame {
        let now = self.clock.as_ref().map(|c| c.now()).unwrap_or_default();
        self.frames
            .iter()
            .rev()
            .find(|(at, _)| *at <= now)
            .map(|(_, frame)| frame)
            .unwrap_or(&self.frames[0].1)
    }
}

#[async_trait]
impl DomAccessor for SnapshotDom {
    async fn page(&self) -> Result<PageInfo, DomError> {
        let frame = self.frame();
        Ok(PageInfo {
            url: frame.url.clone(),
            title: frame.title.clone(),
        })
    }

    async fn document_root(&self) -> Result<NodeId, DomError> {
        Ok(to_id(self.frame().page_root()))
    }

    async fn resolve_scope(&self, scope: &Scope) -> Result<Option<NodeId>, DomError> {
        Ok(self.frame().resolve_scope(scope)?.map(to_id))
    }

    async fn query(
        &self,
        strategy: &LocatorStrategy,
        root: NodeId,
    ) -> Result<Vec<NodeId>, DomError> {
        let frame = self.frame();
        let root = frame.index(root)?;
        Ok(frame.query(strategy, root)?.into_iter().map(to_id).collect())
    }

    async fn query_selector_all(
        &self,
        selector: &str,
        root: NodeId,
    ) -> Result<Vec<NodeId>, DomError> {
        let frame = self.frame();
        let root = frame.index(root)?;
        Ok(frame.select(selector, root)?.into_iter().map(to_id).collect())
    }

    async fn find_by_text(&self, text: &str, root: NodeId) -> Result<Vec<NodeId>, DomError> {
        let frame = self.frame();
        let root = frame.index(root)?;
        Ok(frame.find_by_text(text, root).into_iter().map(to_id).collect())
    }

    async fn element(&self, node: NodeId) -> Result<Option<ElementInfo>, DomError> {
        let frame = self.frame();
        Ok(frame.index(node).ok().map(|idx| frame.element_info(idx)))
    }

    async fn accessible_name(&self, node: NodeId) -> Result<Option<String>, DomError> {
        let frame = self.frame();
        let idx = frame.index(node)?;
        Ok(frame.accessible_name(idx))
    }

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>, DomError> {
        let frame = self.frame();
        let idx = frame.index(node)?;
        Ok(frame.nodes[idx].parent.map(to_id))
    }

    async fn children(&self, node: NodeId) -> Result<Vec<NodeId>, DomError> {
        let frame = self.frame();
        let idx = frame.index(node)?;
        Ok(frame.nodes[idx].children.iter().copied().map(to_id).collect())
    }

    async fn document_index(&self, node: NodeId) -> Result<Option<usize>, DomError> {
        let frame = self.frame();
        Ok(frame.index(node).ok())
    }

    async fn boundary(&self, node: NodeId) -> Result<Option<Boundary>, DomError> {
        let frame = self.frame();
        let idx = frame.index(node)?;
        Ok(frame.nodes[idx].boundary)
    }

    async fn fingerprint(&self, root: NodeId) -> Result<DomFingerprint, DomError> {
        let frame = self.frame();
        let idx = frame.index(root)?;
        Ok(frame.fingerprint(idx))
    }

    async fn network(&self) -> Result<NetworkActivity, DomError> {
        Ok(self.frame().network)
    }

    async fn scroll_into_view(&self, node: NodeId) -> Result<(), DomError> {
        self.frame().index(node)?;
        self.scrolled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node);
        Ok(())
    }
}

fn to_id(idx: usize) -> NodeId {
    NodeId(idx as u32)
}

struct ArenaNode {
    tag: String,
    attributes: BTreeMap<String, String>,
    own_text: String,
    value: Option<String>,
    state: ElementState,
    rect: Option<Rect>,
    boundary: Option<Boundary>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// One flattened page, nodes in pre-order.
struct Frame {
    url: String,
    title: String,
    network: NetworkActivity,
    nodes: Vec<ArenaNode>,
    top: usize,
}

impl Frame {
    fn build(page: &PageSnapshot) -> Frame {
        let mut nodes = Vec::new();
        flatten(&mut nodes, &page.root, None);
        Frame {
            url: page.url.clone(),
            title: page.title.clone(),
            network: page.network,
            nodes,
            top: 0,
        }
    }

    fn index(&self, node: NodeId) -> Result<usize, DomError> {
        let idx = node.0 as usize;
        if idx < self.nodes.len() {
            Ok(idx)
        } else {
            Err(DomError::Detached(node))
        }
    }

    fn is_boundary(&self, idx: usize) -> bool {
        self.nodes[idx].boundary.is_some()
    }

    /// `body` of the top-level document, or the outermost element.
    fn page_root(&self) -> usize {
        if self.nodes[self.top].tag == "body" {
            return self.top;
        }
        self.scoped(self.top)
            .into_iter()
            .find(|&n| self.nodes[n].tag == "body")
            .unwrap_or(self.top)
    }

    /// Strict descendants of `root` in document order, entering `root`'s own content
    /// but no nested frame or shadow tree.
    fn scoped(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[root].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            if !self.is_boundary(n) {
                stack.extend(self.nodes[n].children.iter().rev().copied());
            }
        }
        out
    }

    fn is_within(&self, ancestor: usize, node: usize) -> bool {
        let mut current = self.nodes[node].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[p].parent;
        }
        false
    }

    fn effectively_hidden(&self, idx: usize) -> bool {
        let mut current = Some(idx);
        while let Some(n) = current {
            if self.nodes[n].state.hidden {
                return true;
            }
            current = self.nodes[n].parent;
        }
        false
    }

    fn role(&self, idx: usize) -> Option<String> {
        let node = &self.nodes[idx];
        if let Some(role) = node.attributes.get("role").map(|r| r.trim())
            && !role.is_empty()
        {
            return Some(role.to_lowercase());
        }
        implicit_role(
            &node.tag,
            node.attributes.get("type").map(String::as_str),
            node.attributes.contains_key("href"),
        )
        .map(str::to_string)
    }

    fn accessible_name(&self, idx: usize) -> Option<String> {
        let node = &self.nodes[idx];
        if let Some(label) = node.attributes.get("aria-label") {
            let label = normalize_text(label);
            if !label.is_empty() {
                return Some(label);
            }
        }
        if let Some(ids) = node.attributes.get("aria-labelledby") {
            let parts: Vec<String> = ids
                .split_whitespace()
                .filter_map(|id| self.find_attr("id", id))
                .map(|n| self.text_content(n))
                .collect();
            let name = normalize_text(&parts.join(" "));
            if !name.is_empty() {
                return Some(name);
            }
        }
        if let Some(id) = node.attributes.get("id")
            && let Some(label) = self
                .nodes
                .iter()
                .position(|n| n.tag == "label" && n.attributes.get("for") == Some(id))
        {
            let name = normalize_text(&self.text_content(label));
            if !name.is_empty() {
                return Some(name);
            }
        }
        None
    }

    fn find_attr(&self, name: &str, value: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.attributes.get(name).is_some_and(|v| v == value))
    }

    fn element_info(&self, idx: usize) -> ElementInfo {
        let node = &self.nodes[idx];
        let mut state = node.state.clone();
        state.hidden = self.effectively_hidden(idx);
        ElementInfo {
            id: to_id(idx),
            tag: node.tag.clone(),
            attributes: node.attributes.clone(),
            own_text: node.own_text.clone(),
            text: self.text_content(idx),
            value: node.value.clone(),
            state,
            rect: node.rect,
        }
    }

    fn select(&self, selector: &str, root: usize) -> Result<Vec<usize>, DomError> {
        let list = SelectorList::parse(selector).map_err(|r| DomError::invalid(selector, r))?;
        Ok(self
            .scoped(root)
            .into_iter()
            .filter(|&n| list.matches(self, n))
            .collect())
    }

    fn xpath(&self, expr: &str, root: usize) -> Result<Vec<usize>, DomError> {
        let path = XPath::parse(expr).map_err(|r| DomError::invalid(expr, r))?;
        let host = if self.is_boundary(root) {
            Some(root)
        } else {
            self.owning_host(root)
        };
        let document_children = match host {
            Some(h) => self.nodes[h].children.as_slice(),
            None => std::slice::from_ref(&self.top),
        };
        let ctx = EvalContext {
            document_children,
            root,
        };
        let mut hits: Vec<usize> = path
            .evaluate(self, &ctx)
            .into_iter()
            .filter(|&n| self.is_within(root, n))
            .collect();
        hits.sort_unstable();
        Ok(hits)
    }

    fn owning_host(&self, idx: usize) -> Option<usize> {
        let mut current = self.nodes[idx].parent;
        while let Some(p) = current {
            if self.is_boundary(p) {
                return Some(p);
            }
            current = self.nodes[p].parent;
        }
        None
    }

    fn query(&self, strategy: &LocatorStrategy, root: usize) -> Result<Vec<usize>, DomError> {
        let value = strategy.value.trim();
        if value.is_empty() {
            return Err(DomError::invalid(&strategy.value, "empty strategy value"));
        }
        match strategy.kind {
            StrategyKind::Css | StrategyKind::Position => return self.select(value, root),
            StrategyKind::Xpath => return self.xpath(value, root),
            _ => {}
        }
        let in_scope = self.scoped(root).into_iter();
        let hits = match strategy.kind {
            StrategyKind::Css | StrategyKind::Position | StrategyKind::Xpath => vec![],
            StrategyKind::Text => {
                let wanted = truncate_text(value);
                in_scope
                    .filter(|&n| truncate_text(&self.nodes[n].own_text) == wanted)
                    .collect()
            }
            StrategyKind::Aria => {
                let wanted = normalize_text(value);
                in_scope
                    .filter(|&n| self.accessible_name(n).as_deref() == Some(wanted.as_str()))
                    .collect()
            }
            StrategyKind::Role => {
                let wanted = value.to_lowercase();
                in_scope
                    .filter(|&n| self.role(n).as_deref() == Some(wanted.as_str()))
                    .collect()
            }
            StrategyKind::TestId => {
                let (attr, expected) = value
                    .split_once('=')
                    .ok_or_else(|| DomError::invalid(value, "expected attr=value"))?;
                let attr = attr.trim();
                let expected = expected.trim().trim_matches('"');
                in_scope
                    .filter(|&n| {
                        self.nodes[n]
                            .attributes
                            .get(attr)
                            .is_some_and(|v| v == expected)
                    })
                    .collect()
            }
        };
        Ok(hits)
    }

    /// Deepest elements whose text contains `text`.
    fn find_by_text(&self, text: &str, root: usize) -> Vec<usize> {
        let needle = normalize_text(text).to_lowercase();
        if needle.is_empty() {
            return vec![];
        }
        let matches: Vec<usize> = self
            .scoped(root)
            .into_iter()
            .filter(|&n| self.text_content(n).to_lowercase().contains(&needle))
            .collect();
        let mut has_deeper = HashSet::new();
        for &m in &matches {
            let mut current = self.nodes[m].parent;
            while let Some(p) = current {
                if p == root || !has_deeper.insert(p) {
                    break;
                }
                current = self.nodes[p].parent;
            }
        }
        matches
            .into_iter()
            .filter(|n| !has_deeper.contains(n))
            .collect()
    }

    fn resolve_scope(&self, scope: &Scope) -> Result<Option<usize>, DomError> {
        match scope {
            Scope::Page => Ok(Some(self.page_root())),
            Scope::Modal => {
                let modals = self.select(MODAL_SELECTOR, self.top)?;
                Ok(modals
                    .into_iter()
                    .rev()
                    .find(|&n| !self.effectively_hidden(n)))
            }
            Scope::Section(sel) | Scope::Container(sel) | Scope::Widget(sel) => {
                Ok(self.select(sel, self.top)?.into_iter().next())
            }
            Scope::TableRow(key) => {
                // A key naming more than one row identifies none of them.
                let mut rows = self.select(ROW_SELECTOR, self.top)?.into_iter().filter(|&row| {
                    self.nodes[row]
                        .children
                        .iter()
                        .any(|&cell| is_row_key_cell(&self.text_content(cell), key))
                });
                Ok(match (rows.next(), rows.next()) {
                    (Some(row), None) => Some(row),
                    _ => None,
                })
            }
            Scope::Iframe(path) => self.resolve_path(path, Boundary::Frame),
            Scope::ShadowRoot(path) => self.resolve_path(path, Boundary::Shadow),
        }
    }

    /// Follow ` >> `-separated host selectors; each must land on a boundary node and the
    /// last one on a boundary of `kind`.
    fn resolve_path(&self, path: &str, kind: Boundary) -> Result<Option<usize>, DomError> {
        let segments = Scope::path_segments(path);
        if segments.is_empty() {
            return Err(DomError::invalid(path, "empty boundary path"));
        }
        let mut current = self.top;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let host = self
                .select(segment, current)?
                .into_iter()
                .find(|&n| match self.nodes[n].boundary {
                    Some(b) => !last || b == kind,
                    None => false,
                });
            match host {
                Some(h) => current = h,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn fingerprint(&self, root: usize) -> DomFingerprint {
        let mut fp = DomFingerprint::default();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            fp.node_count += 1;
            fp.html_len += 2 * node.tag.len() + 5 + node.own_text.len();
            fp.html_len += node
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.len() + 4)
                .sum::<usize>();
            fp.html_len += node.value.as_ref().map_or(0, String::len);
            stack.extend(node.children.iter().copied());
        }
        fp
    }
}

fn flatten(nodes: &mut Vec<ArenaNode>, snap: &NodeSnapshot, parent: Option<usize>) -> usize {
    let idx = nodes.len();
    nodes.push(ArenaNode {
        tag: snap.tag.to_lowercase(),
        attributes: snap.attributes.clone(),
        own_text: normalize_text(&snap.text),
        value: snap.value.clone(),
        state: snap.state.clone(),
        rect: snap.rect,
        boundary: snap.boundary,
        parent,
        children: Vec::with_capacity(snap.children.len()),
    });
    for child in &snap.children {
        let c = flatten(nodes, child, Some(idx));
        nodes[idx].children.push(c);
    }
    idx
}

impl TreeView for Frame {
    fn tag(&self, node: usize) -> &str {
        &self.nodes[node].tag
    }

    fn attr(&self, node: usize, name: &str) -> Option<&str> {
        self.nodes[node].attributes.get(name).map(String::as_str)
    }

    fn match_parent(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent.filter(|&p| !self.is_boundary(p))
    }

    fn sibling_position(&self, node: usize, same_tag: bool) -> usize {
        let Some(parent) = self.nodes[node].parent else {
            return 1;
        };
        let tag = &self.nodes[node].tag;
        self.nodes[parent]
            .children
            .iter()
            .filter(|&&c| !same_tag || self.nodes[c].tag == *tag)
            .position(|&c| c == node)
            .map_or(1, |p| p + 1)
    }
}

impl XPathTree for Frame {
    fn children(&self, node: usize) -> &[usize] {
        &self.nodes[node].children
    }

    fn is_boundary(&self, node: usize) -> bool {
        Frame::is_boundary(self, node)
    }

    fn own_text(&self, node: usize) -> &str {
        &self.nodes[node].own_text
    }

    /// Text of the node and its descendants, not entering frames or shadow trees.
    fn text_content(&self, node: usize) -> String {
        let mut parts = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            let current = &self.nodes[n];
            if !current.own_text.is_empty() {
                parts.push(current.own_text.as_str());
            }
            if current.boundary.is_none() {
                stack.extend(current.children.iter().rev().copied());
            }
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn page() -> PageSnapshot {
        PageSnapshot::new(
            "https://app.test/users",
            NodeSnapshot::new("body").children([
                NodeSnapshot::new("h1").text("Users"),
                NodeSnapshot::new("table").children([
                    NodeSnapshot::new("tr").children([
                        NodeSnapshot::new("td").text("Alice"),
                        NodeSnapshot::new("td").child(NodeSnapshot::new("button").text("Edit")),
                    ]),
                    NodeSnapshot::new("tr").children([
                        NodeSnapshot::new("td").text("Bob"),
                        NodeSnapshot::new("td").child(NodeSnapshot::new("button").text("Edit")),
                    ]),
                ]),
                NodeSnapshot::new("iframe")
                    .attr("id", "pay")
                    .frame()
                    .child(NodeSnapshot::new("body").child(
                        NodeSnapshot::new("button").attr("data-testid", "pay").text("Pay"),
                    )),
            ]),
        )
    }

    #[tokio::test]
    async fn test_queries_do_not_cross_frames() {
        let dom = SnapshotDom::new(page());
        let root = dom.document_root().await.unwrap();
        let buttons = dom.query_selector_all("button", root).await.unwrap();
        assert_eq!(buttons.len(), 2);

        let frame = dom
            .resolve_scope(&Scope::Iframe("#pay".into()))
            .await
            .unwrap()
            .unwrap();
        let inside = dom
            .query(
                &LocatorStrategy::new(StrategyKind::TestId, "data-testid=pay"),
                frame,
            )
            .await
            .unwrap();
        assert_eq!(inside.len(), 1);
    }

    #[tokio::test]
    async fn test_table_row_scope_and_xpath() {
        let dom = SnapshotDom::new(page());
        let row = dom
            .resolve_scope(&Scope::TableRow("Bob".into()))
            .await
            .unwrap()
            .unwrap();
        let hits = dom
            .query(&LocatorStrategy::new(StrategyKind::Xpath, "//button[text()='Edit']"), row)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(super::super::contains(&dom, row, hits[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_table_row_key_must_name_one_row() {
        let row = |name: &str| {
            NodeSnapshot::new("tr").children([
                NodeSnapshot::new("td").text(name),
                NodeSnapshot::new("td").child(NodeSnapshot::new("button").text("Edit")),
            ])
        };
        let dom = SnapshotDom::new(PageSnapshot::new(
            "https://app.test/users",
            NodeSnapshot::new("body").child(NodeSnapshot::new("table").children([
                row("Bobby"),
                row("Bob"),
                row("Carol"),
                row("carol"),
            ])),
        ));
        let root = dom.document_root().await.unwrap();
        let rows = dom.query_selector_all("tr", root).await.unwrap();

        let bob = dom.resolve_scope(&Scope::TableRow("bob".into())).await.unwrap();
        assert_eq!(bob, Some(rows[1]));
        let carol = dom.resolve_scope(&Scope::TableRow("Carol".into())).await.unwrap();
        assert_eq!(carol, None);
        let nobody = dom.resolve_scope(&Scope::TableRow("Bo".into())).await.unwrap();
        assert_eq!(nobody, None);
    }

    #[tokio::test]
    async fn test_find_by_text_returns_deepest() {
        let dom = SnapshotDom::new(page());
        let root = dom.document_root().await.unwrap();
        let hits = dom.find_by_text("alice", root).await.unwrap();
        assert_eq!(hits.len(), 1);
        let el = dom.element(hits[0]).await.unwrap().unwrap();
        assert_eq!(el.tag, "td");
    }

    #[tokio::test]
    async fn test_invalid_selector_is_an_error() {
        let dom = SnapshotDom::new(page());
        let root = dom.document_root().await.unwrap();
        let err = dom.query_selector_all("div:hover", root).await.unwrap_err();
        assert!(matches!(err, DomError::InvalidSelector { .. }));
    }

    #[tokio::test]
    async fn test_timeline_follows_clock() {
        let clock = ManualClock::shared();
        let before = PageSnapshot::new("https://app.test/a", NodeSnapshot::new("body"));
        let after = PageSnapshot::new("https://app.test/b", NodeSnapshot::new("body"));
        let dom = SnapshotDom::timeline(clock.clone(), vec![(0, before), (300, after)]).unwrap();

        assert_eq!(dom.page().await.unwrap().url, "https://app.test/a");
        clock.advance(Duration::from_millis(300));
        assert_eq!(dom.page().await.unwrap().url, "https://app.test/b");
    }

    #[test]
    fn test_load_single_and_timeline_json() {
        let clock: Arc<dyn Clock> = ManualClock::shared();
        let single = r#"{"url": "https://x.test", "root": {"tag": "body"}}"#;
        assert!(SnapshotDom::load(single, clock.clone()).is_ok());
        let timeline = r#"[{"at_ms": 0, "page": {"root": {"tag": "body"}}}]"#;
        assert!(SnapshotDom::load(timeline, clock.clone()).is_ok());
        assert!(matches!(
            SnapshotDom::load("[]", clock),
            Err(SnapshotError::EmptyTimeline)
        ));
    }
}
