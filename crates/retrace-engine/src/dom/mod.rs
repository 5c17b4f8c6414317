//! The single narrow interface through which the engine reads the live page.
//!
//! The page is mutated concurrently by its own scripts, so callers must not keep
//! `NodeId`s across poll ticks: every tick re-resolves scopes and re-runs queries.

pub mod selector;
pub mod snapshot;
pub mod xpath;

use async_trait::async_trait;
use retrace_common::error::DomError;
use retrace_common::locator::LocatorStrategy;
use retrace_common::protocol::{DomFingerprint, ElementInfo, NetworkActivity, NodeId, PageInfo};
use retrace_common::scope::Scope;

pub use snapshot::{NodeSnapshot, PageSnapshot, SnapshotDom, SnapshotError};

#[async_trait]
pub trait DomAccessor: Send + Sync {
    /// Current URL and title.
    async fn page(&self) -> Result<PageInfo, DomError>;

    /// Root of the top-level document (the `body`, or the outermost element).
    async fn document_root(&self) -> Result<NodeId, DomError>;

    /// Resolve a scope to a subtree root. `Ok(None)` means "not present".
    async fn resolve_scope(&self, scope: &Scope) -> Result<Option<NodeId>, DomError>;

    /// Run one locator strategy inside `root`. Results are in document order.
    async fn query(&self, strategy: &LocatorStrategy, root: NodeId)
    -> Result<Vec<NodeId>, DomError>;

    /// CSS query inside `root`, document order.
    async fn query_selector_all(&self, selector: &str, root: NodeId)
    -> Result<Vec<NodeId>, DomError>;

    /// Deepest elements inside `root` whose text contains `text` (normalized, case-insensitive).
    async fn find_by_text(&self, text: &str, root: NodeId) -> Result<Vec<NodeId>, DomError>;

    async fn element(&self, node: NodeId) -> Result<Option<ElementInfo>, DomError>;

    /// Accessible name from `aria-label`, `aria-labelledby` or an associated `<label>`.
    async fn accessible_name(&self, node: NodeId) -> Result<Option<String>, DomError>;

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>, DomError>;

    /// Element children, document order.
    async fn children(&self, node: NodeId) -> Result<Vec<NodeId>, DomError>;

    /// Position of `node` in document order.
    async fn document_index(&self, node: NodeId) -> Result<Option<usize>, DomError>;

    /// Whether `node` sits at an iframe or shadow-root boundary, and which.
    async fn boundary(&self, node: NodeId) -> Result<Option<Boundary>, DomError>;

    async fn fingerprint(&self, root: NodeId) -> Result<DomFingerprint, DomError>;

    async fn network(&self) -> Result<NetworkActivity, DomError>;

    async fn scroll_into_view(&self, node: NodeId) -> Result<(), DomError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    Frame,
    Shadow,
}

/// `ancestor` contains `node` (or is it).
pub async fn contains(
    dom: &dyn DomAccessor,
    ancestor: NodeId,
    node: NodeId,
) -> Result<bool, DomError> {
    let mut current = Some(node);
    while let Some(id) = current {
        if id == ancestor {
            return Ok(true);
        }
        current = dom.parent(id).await?;
    }
    Ok(false)
}

/// Ancestors of `node`, nearest first, excluding `node`.
pub async fn ancestors(dom: &dyn DomAccessor, node: NodeId) -> Result<Vec<NodeId>, DomError> {
    let mut out = Vec::new();
    let mut current = dom.parent(node).await?;
    while let Some(id) = current {
        out.push(id);
        current = dom.parent(id).await?;
    }
    Ok(out)
}
