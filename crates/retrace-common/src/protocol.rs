use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque handle to a live element, only meaningful within a single poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// Point-in-time read of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub id: NodeId,
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Direct (non-descendant) text, whitespace-normalized.
    #[serde(default)]
    pub own_text: String,
    /// Full text content, whitespace-normalized.
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub state: ElementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
}

impl ElementInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    /// Explicit `role` attribute, falling back to the implicit ARIA role of the tag.
    pub fn role(&self) -> Option<String> {
        if let Some(role) = self.attr("role") {
            let role = role.trim();
            if !role.is_empty() {
                return Some(role.to_lowercase());
            }
        }
        implicit_role(&self.tag, self.attr("type"), self.has_attr("href")).map(str::to_string)
    }
}

/// Implicit ARIA role for common tags.
pub fn implicit_role(tag: &str, input_type: Option<&str>, has_href: bool) -> Option<&'static str> {
    let role = match tag.to_lowercase().as_str() {
        "button" => "button",
        "a" if has_href => "link",
        "select" => "combobox",
        "textarea" => "textbox",
        "dialog" => "dialog",
        "nav" => "navigation",
        "main" => "main",
        "header" => "banner",
        "footer" => "contentinfo",
        "aside" => "complementary",
        "form" => "form",
        "table" => "table",
        "tr" => "row",
        "td" => "cell",
        "th" => "columnheader",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "option" => "option",
        "img" => "img",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "input" => match input_type.map(str::to_lowercase).as_deref() {
            Some("checkbox") => "checkbox",
            Some("radio") => "radio",
            Some("submit") | Some("button") | Some("reset") => "button",
            Some("range") => "slider",
            Some("search") => "searchbox",
            Some("hidden") => return None,
            _ => "textbox",
        },
        _ => return None,
    };
    Some(role)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementState {
    pub hidden: bool,
    pub disabled: bool,
    pub checked: bool,
    pub focused: bool,
    pub selected: bool,
    pub readonly: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Cheap structural summary of a subtree, compared across poll ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomFingerprint {
    pub node_count: usize,
    pub html_len: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkActivity {
    /// Requests currently in flight.
    pub inflight: u32,
    /// Monotonic count of requests started since page load.
    pub started: u64,
}

/// Collapse runs of whitespace and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, attrs: &[(&str, &str)]) -> ElementInfo {
        ElementInfo {
            id: NodeId(1),
            tag: tag.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            own_text: String::new(),
            text: String::new(),
            value: None,
            state: ElementState::default(),
            rect: None,
        }
    }

    #[test]
    fn test_explicit_role_wins() {
        let el = element("div", &[("role", "Option")]);
        assert_eq!(el.role().as_deref(), Some("option"));
    }

    #[test]
    fn test_implicit_roles() {
        assert_eq!(element("button", &[]).role().as_deref(), Some("button"));
        assert_eq!(element("a", &[]).role(), None);
        assert_eq!(element("a", &[("href", "/x")]).role().as_deref(), Some("link"));
        assert_eq!(
            element("input", &[("type", "checkbox")]).role().as_deref(),
            Some("checkbox")
        );
        assert_eq!(element("input", &[]).role().as_deref(), Some("textbox"));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Sign \n\t in  "), "Sign in");
        assert_eq!(normalize_text(""), "");
    }
}
