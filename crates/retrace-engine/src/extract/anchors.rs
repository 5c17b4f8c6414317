//! Context around an element that tells look-alikes apart.
//!
//! The same functions produce disambiguators at record time and measure candidates
//! against them at replay time, so both sides always agree on what was measured.

use crate::dom::{self, DomAccessor};
use retrace_common::error::DomError;
use retrace_common::protocol::NodeId;

pub const NEARBY_TEXT_LEN: usize = 40;

const LANDMARK_ROLES: &[&str] = &[
    "banner",
    "complementary",
    "contentinfo",
    "dialog",
    "form",
    "main",
    "navigation",
    "region",
    "search",
];

/// 0-based position among element siblings with the same tag, and how many there are.
pub async fn same_tag_position(
    dom: &dyn DomAccessor,
    node: NodeId,
) -> Result<Option<(usize, usize)>, DomError> {
    let Some(el) = dom.element(node).await? else {
        return Ok(None);
    };
    let Some(parent) = dom.parent(node).await? else {
        return Ok(Some((0, 1)));
    };
    let mut index = None;
    let mut count = 0;
    for sibling in dom.children(parent).await? {
        let Some(info) = dom.element(sibling).await? else {
            continue;
        };
        if info.tag != el.tag {
            continue;
        }
        if sibling == node {
            index = Some(count);
        }
        count += 1;
    }
    Ok(index.map(|i| (i, count)))
}

/// Text read next to the element: the closest preceding sibling with text, else the
/// parent's own text.
pub async fn nearby_text(dom: &dyn DomAccessor, node: NodeId) -> Result<Option<String>, DomError> {
    let Some(parent) = dom.parent(node).await? else {
        return Ok(None);
    };
    let siblings = dom.children(parent).await?;
    if let Some(pos) = siblings.iter().position(|&s| s == node) {
        for &prev in siblings[..pos].iter().rev() {
            if let Some(info) = dom.element(prev).await?
                && !info.text.is_empty()
            {
                return Ok(Some(cap(&info.text)));
            }
        }
    }
    Ok(dom
        .element(parent)
        .await?
        .map(|p| p.own_text)
        .filter(|t| !t.is_empty())
        .map(|t| cap(&t)))
}

/// Nearest landmark ancestor as `role` or `role "name"`.
pub async fn landmark(dom: &dyn DomAccessor, node: NodeId) -> Result<Option<String>, DomError> {
    for ancestor in dom::ancestors(dom, node).await? {
        let Some(info) = dom.element(ancestor).await? else {
            continue;
        };
        let Some(role) = info.role() else {
            continue;
        };
        if !LANDMARK_ROLES.contains(&role.as_str()) {
            continue;
        }
        return Ok(Some(match dom.accessible_name(ancestor).await? {
            Some(name) => format!("{} \"{}\"", role, name),
            None => role,
        }));
    }
    Ok(None)
}

fn cap(text: &str) -> String {
    text.chars().take(NEARBY_TEXT_LEN).collect::<String>().trim_end().to_string()
}
