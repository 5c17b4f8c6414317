//! Record-time scope inference.
//!
//! Walks ancestors nearest-first looking for the tightest subtree that will still
//! identify the element after a re-render. A frame or shadow boundary anywhere above
//! the element wins over any nearer container, since queries cannot cross it.

use super::stability::is_dynamic_token;
use super::{TEST_ID_ATTRS, stable_selector};
use crate::dom::{self, Boundary, DomAccessor};
use retrace_common::error::DomError;
use retrace_common::protocol::{ElementInfo, NodeId};
use retrace_common::scope::{PATH_SEPARATOR, Scope, row_key as cell_key};

const ROW_SELECTOR: &str = "tr, [role=row]";

const WIDGET_ROLES: &[&str] = &[
    "combobox",
    "grid",
    "listbox",
    "menu",
    "menubar",
    "radiogroup",
    "tablist",
    "tabpanel",
    "toolbar",
    "tree",
];

const SECTION_TAGS: &[&str] = &[
    "article", "aside", "footer", "form", "header", "main", "nav", "section",
];

pub async fn infer_scope(dom: &dyn DomAccessor, node: NodeId) -> Result<Scope, DomError> {
    let ancestors = dom::ancestors(dom, node).await?;

    if let Some(scope) = boundary_scope(dom, &ancestors).await? {
        return Ok(scope);
    }

    let root = dom.document_root().await?;
    for &ancestor in &ancestors {
        if ancestor == root {
            break;
        }
        let Some(info) = dom.element(ancestor).await? else {
            continue;
        };
        if is_modal(&info) {
            return Ok(Scope::Modal);
        }
        if is_row(&info)
            && let Some(key) = row_key(dom, ancestor, root).await?
        {
            return Ok(Scope::TableRow(key));
        }
        let role = info.role().unwrap_or_default();
        if WIDGET_ROLES.contains(&role.as_str())
            && let Some(sel) = unique_selector(dom, &info, root).await?
        {
            return Ok(Scope::Widget(sel));
        }
        if (SECTION_TAGS.contains(&info.tag.as_str()) || role == "region")
            && let Some(sel) = section_selector(dom, &info, root).await?
        {
            return Ok(Scope::Section(sel));
        }
        if TEST_ID_ATTRS.iter().any(|a| info.has_attr(a))
            && let Some(sel) = unique_selector(dom, &info, root).await?
        {
            return Ok(Scope::Container(sel));
        }
    }
    Ok(Scope::Page)
}

/// `Iframe` / `ShadowRoot` path through every boundary host above the element.
async fn boundary_scope(
    dom: &dyn DomAccessor,
    ancestors: &[NodeId],
) -> Result<Option<Scope>, DomError> {
    let mut hosts = Vec::new();
    for &ancestor in ancestors {
        if let Some(kind) = dom.boundary(ancestor).await? {
            hosts.push((ancestor, kind));
        }
    }
    let Some(&(_, nearest)) = hosts.first() else {
        return Ok(None);
    };
    let mut segments = Vec::with_capacity(hosts.len());
    for (host, _) in hosts.iter().rev() {
        if let Some(info) = dom.element(*host).await? {
            segments.push(host_selector(&info));
        }
    }
    let path = segments.join(PATH_SEPARATOR);
    Ok(Some(match nearest {
        Boundary::Frame => Scope::Iframe(path),
        Boundary::Shadow => Scope::ShadowRoot(path),
    }))
}

fn host_selector(info: &ElementInfo) -> String {
    if let Some(sel) = stable_selector(info) {
        return sel;
    }
    for attr in ["name", "title", "src"] {
        if let Some(value) = info.attr(attr)
            && !value.is_empty()
            && !is_dynamic_token(value)
        {
            return format!(
                "{}[{}={}]",
                info.tag,
                attr,
                crate::dom::selector::quote_value(value)
            );
        }
    }
    info.tag.clone()
}

fn is_modal(info: &ElementInfo) -> bool {
    info.tag == "dialog"
        || matches!(info.attr("role"), Some("dialog") | Some("alertdialog"))
        || info.attr("aria-modal") == Some("true")
}

fn is_row(info: &ElementInfo) -> bool {
    info.tag == "tr" || info.attr("role") == Some("row")
}

/// Cell text that no other row contains.
async fn row_key(
    dom: &dyn DomAccessor,
    row: NodeId,
    root: NodeId,
) -> Result<Option<String>, DomError> {
    let mut others = Vec::new();
    for other in dom.query_selector_all(ROW_SELECTOR, root).await? {
        if other == row {
            continue;
        }
        if let Some(info) = dom.element(other).await? {
            others.push(info.text.to_lowercase());
        }
    }
    for cell in dom.children(row).await? {
        let Some(info) = dom.element(cell).await? else {
            continue;
        };
        let key = cell_key(&info.text);
        if key.is_empty() {
            continue;
        }
        let needle = key.to_lowercase();
        if !others.iter().any(|o| o.contains(&needle)) {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

async fn section_selector(
    dom: &dyn DomAccessor,
    info: &ElementInfo,
    root: NodeId,
) -> Result<Option<String>, DomError> {
    if let Some(sel) = unique_selector(dom, info, root).await? {
        return Ok(Some(sel));
    }
    for attr in ["name", "aria-label"] {
        if let Some(value) = info.attr(attr)
            && !value.is_empty()
            && !is_dynamic_token(value)
        {
            let sel = format!(
                "{}[{}={}]",
                info.tag,
                attr,
                crate::dom::selector::quote_value(value)
            );
            if is_unique(dom, &sel, root).await? {
                return Ok(Some(sel));
            }
        }
    }
    Ok(None)
}

async fn unique_selector(
    dom: &dyn DomAccessor,
    info: &ElementInfo,
    root: NodeId,
) -> Result<Option<String>, DomError> {
    match stable_selector(info) {
        Some(sel) if is_unique(dom, &sel, root).await? => Ok(Some(sel)),
        _ => Ok(None),
    }
}

async fn is_unique(dom: &dyn DomAccessor, selector: &str, root: NodeId) -> Result<bool, DomError> {
    match dom.query_selector_all(selector, root).await {
        Ok(hits) => Ok(hits.len() == 1),
        Err(DomError::InvalidSelector { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
