use crate::protocol::normalize_text;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The DOM subtree a search is restricted to.
///
/// `Iframe` and `ShadowRoot` paths are host selectors joined by ` >> `, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Page,
    Modal,
    Iframe(String),
    Section(String),
    TableRow(String),
    Container(String),
    Widget(String),
    ShadowRoot(String),
}

pub const PATH_SEPARATOR: &str = " >> ";

/// Longest `TableRow` key, in characters.
pub const ROW_KEY_LEN: usize = 40;

/// The `TableRow` key a cell with this text yields.
pub fn row_key(cell_text: &str) -> String {
    let key: String = normalize_text(cell_text).chars().take(ROW_KEY_LEN).collect();
    key.trim().to_string()
}

/// Whether a cell's text is the cell a `TableRow` key was taken from. Case-insensitive.
pub fn is_row_key_cell(cell_text: &str, key: &str) -> bool {
    let key = row_key(key);
    !key.is_empty() && row_key(cell_text).to_lowercase() == key.to_lowercase()
}

impl Scope {
    /// Next wider scope, if widening is meaningful.
    ///
    /// Frames and shadow roots are separate documents, and anything behind a modal is
    /// not interactable, so those never widen.
    pub fn widen(&self) -> Option<Scope> {
        match self {
            Scope::Section(_) | Scope::TableRow(_) | Scope::Container(_) | Scope::Widget(_) => {
                Some(Scope::Page)
            }
            Scope::Page | Scope::Modal | Scope::Iframe(_) | Scope::ShadowRoot(_) => None,
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self, Scope::Page)
    }

    /// Host selectors for `Iframe` / `ShadowRoot` paths.
    pub fn path_segments(path: &str) -> Vec<&str> {
        path.split(PATH_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Page => write!(f, "page"),
            Scope::Modal => write!(f, "modal"),
            Scope::Iframe(p) => write!(f, "iframe({})", p),
            Scope::Section(s) => write!(f, "section({})", s),
            Scope::TableRow(k) => write!(f, "table-row({})", k),
            Scope::Container(s) => write!(f, "container({})", s),
            Scope::Widget(s) => write!(f, "widget({})", s),
            Scope::ShadowRoot(p) => write!(f, "shadow-root({})", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widen_one_level() {
        assert_eq!(Scope::Section("#main".into()).widen(), Some(Scope::Page));
        assert_eq!(Scope::TableRow("Alice".into()).widen(), Some(Scope::Page));
        assert_eq!(Scope::Page.widen(), None);
        assert_eq!(Scope::Modal.widen(), None);
        assert_eq!(Scope::Iframe("#pay".into()).widen(), None);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&Scope::TableRow("Alice".into())).unwrap();
        assert_eq!(json, r#"{"type":"table_row","value":"Alice"}"#);
        let page: Scope = serde_json::from_str(r#"{"type":"page"}"#).unwrap();
        assert_eq!(page, Scope::Page);
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(
            Scope::path_segments("#outer >> iframe.inner"),
            vec!["#outer", "iframe.inner"]
        );
        assert!(Scope::path_segments("  ").is_empty());
    }

    #[test]
    fn test_row_key_cell_matches_whole_text() {
        assert!(is_row_key_cell("  bob ", "Bob"));
        assert!(!is_row_key_cell("Bobby", "Bob"));
        assert!(!is_row_key_cell("", ""));
        let long = "x".repeat(60);
        assert_eq!(row_key(&long).chars().count(), ROW_KEY_LEN);
        assert!(is_row_key_cell(&long, &row_key(&long)));
    }
}
