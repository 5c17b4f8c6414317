//! Selector matcher for `SnapshotDom`.
//!
//! Covers the selectors the feature extractor emits and the common shapes found in
//! legacy recordings: type, `*`, `#id`, `.class`, attribute tests (`=`, `~=`, `^=`,
//! `$=`, `*=`), `:nth-of-type(n)`, `:nth-child(n)`, descendant and child combinators,
//! and `,` lists. Anything else is rejected so the finder can skip the strategy.

/// Tree operations the matcher needs.
pub trait TreeView {
    fn tag(&self, node: usize) -> &str;
    fn attr(&self, node: usize, name: &str) -> Option<&str>;
    /// Parent within the same document (never crosses a frame or shadow boundary).
    fn match_parent(&self, node: usize) -> Option<usize>;
    /// 1-based position among element siblings, optionally counting only same-tag ones.
    fn sibling_position(&self, node: usize, same_tag: bool) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq)]
struct ComplexSelector {
    parts: Vec<Compound>,
    /// `combinators[i]` joins `parts[i]` and `parts[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
    nth_of_type: Option<usize>,
    nth_child: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrTest {
    name: String,
    op: AttrOp,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AttrOp {
    Exists,
    Equals,
    Word,
    Prefix,
    Suffix,
    Substring,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<SelectorList, String> {
        let mut parser = Parser {
            chars: input.chars().collect(),
            pos: 0,
        };
        parser.parse_list()
    }

    pub fn matches<T: TreeView + ?Sized>(&self, tree: &T, node: usize) -> bool {
        self.selectors
            .iter()
            .any(|s| s.matches_from(tree, node, s.parts.len() - 1))
    }
}

impl ComplexSelector {
    fn matches_from<T: TreeView + ?Sized>(&self, tree: &T, node: usize, idx: usize) -> bool {
        if !self.parts[idx].matches(tree, node) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => tree
                .match_parent(node)
                .is_some_and(|p| self.matches_from(tree, p, idx - 1)),
            Combinator::Descendant => {
                let mut current = tree.match_parent(node);
                while let Some(p) = current {
                    if self.matches_from(tree, p, idx - 1) {
                        return true;
                    }
                    current = tree.match_parent(p);
                }
                false
            }
        }
    }
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.nth_of_type.is_none()
            && self.nth_child.is_none()
    }

    fn matches<T: TreeView + ?Sized>(&self, tree: &T, node: usize) -> bool {
        if let Some(tag) = &self.tag
            && !tree.tag(node).eq_ignore_ascii_case(tag)
        {
            return false;
        }
        if !self.ids.iter().all(|id| tree.attr(node, "id") == Some(id)) {
            return false;
        }
        if !self.classes.is_empty() {
            let class_attr = tree.attr(node, "class").unwrap_or("");
            let has = |c: &String| class_attr.split_whitespace().any(|t| t == c);
            if !self.classes.iter().all(has) {
                return false;
            }
        }
        for test in &self.attrs {
            let Some(actual) = tree.attr(node, &test.name) else {
                return false;
            };
            let ok = match test.op {
                AttrOp::Exists => true,
                AttrOp::Equals => actual == test.value,
                AttrOp::Word => actual.split_whitespace().any(|w| w == test.value),
                AttrOp::Prefix => !test.value.is_empty() && actual.starts_with(&test.value),
                AttrOp::Suffix => !test.value.is_empty() && actual.ends_with(&test.value),
                AttrOp::Substring => !test.value.is_empty() && actual.contains(&test.value),
            };
            if !ok {
                return false;
            }
        }
        if let Some(n) = self.nth_of_type
            && tree.sibling_position(node, true) != n
        {
            return false;
        }
        if let Some(n) = self.nth_child
            && tree.sibling_position(node, false) != n
        {
            return false;
        }
        true
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self) -> Result<SelectorList, String> {
        let mut selectors = vec![];
        loop {
            self.skip_ws();
            selectors.push(self.parse_complex()?);
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(',') => {
                    self.pos += 1;
                }
                Some(c) => return Err(format!("unexpected '{}' at {}", c, self.pos)),
            }
        }
        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, String> {
        let mut parts = vec![self.parse_compound()?];
        let mut combinators = vec![];
        loop {
            let had_ws = self.skip_ws();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    Combinator::Child
                }
                Some('+') | Some('~') => {
                    return Err("sibling combinators are not supported".into());
                }
                Some(_) if had_ws => Combinator::Descendant,
                Some(c) => return Err(format!("unexpected '{}' at {}", c, self.pos)),
            };
            combinators.push(combinator);
            parts.push(self.parse_compound()?);
        }
        Ok(ComplexSelector { parts, combinators })
    }

    fn parse_compound(&mut self) -> Result<Compound, String> {
        let mut compound = Compound::default();
        let mut universal = false;
        if self.peek() == Some('*') {
            self.pos += 1;
            universal = true;
        } else if self.peek().is_some_and(is_ident_start) {
            compound.tag = Some(self.parse_ident()?.to_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.ids.push(self.parse_ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.parse_attr()?);
                }
                Some(':') => {
                    self.pos += 1;
                    self.parse_pseudo(&mut compound)?;
                }
                _ => break,
            }
        }
        if compound.is_empty() && !universal {
            return Err(format!("expected selector at {}", self.pos));
        }
        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, String> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.pos += 1;
                match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err("dangling escape".into()),
                }
            } else if is_ident_char(c) {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(format!("expected identifier at {}", self.pos));
        }
        Ok(out)
    }

    fn parse_attr(&mut self) -> Result<AttrTest, String> {
        self.skip_ws();
        let name = self.parse_ident()?;
        self.skip_ws();
        let op = match self.bump() {
            Some(']') => {
                return Ok(AttrTest {
                    name,
                    op: AttrOp::Exists,
                    value: String::new(),
                });
            }
            Some('=') => AttrOp::Equals,
            Some(c @ ('~' | '^' | '$' | '*')) => {
                if self.bump() != Some('=') {
                    return Err(format!("expected '=' after '{}'", c));
                }
                match c {
                    '~' => AttrOp::Word,
                    '^' => AttrOp::Prefix,
                    '$' => AttrOp::Suffix,
                    _ => AttrOp::Substring,
                }
            }
            other => return Err(format!("bad attribute operator {:?}", other)),
        };
        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                self.parse_quoted(q)?
            }
            _ => self.parse_ident()?,
        };
        self.skip_ws();
        if self.bump() != Some(']') {
            return Err("unterminated attribute selector".into());
        }
        Ok(AttrTest { name, op, value })
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".into()),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err("dangling escape".into()),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_pseudo(&mut self, compound: &mut Compound) -> Result<(), String> {
        let name = self.parse_ident()?.to_lowercase();
        if self.bump() != Some('(') {
            return Err(format!("unsupported pseudo-class :{}", name));
        }
        let mut arg = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated pseudo-class".into()),
                Some(')') => break,
                Some(c) => arg.push(c),
            }
        }
        let n: usize = arg
            .trim()
            .parse()
            .map_err(|_| format!("unsupported :{}({}) argument", name, arg))?;
        if n == 0 {
            return Err(format!(":{}(0) never matches", name));
        }
        match name.as_str() {
            "nth-of-type" => compound.nth_of_type = Some(n),
            "nth-child" => compound.nth_child = Some(n),
            _ => return Err(format!("unsupported pseudo-class :{}", name)),
        }
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '-' || c == '\\'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Quote a value for use inside an attribute selector.
pub fn quote_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Whether `value` can be written as a bare identifier (`#value`, `.value`).
pub fn is_plain_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        Some('-') => {}
        _ => return false,
    }
    value.chars().all(is_ident_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// body > form#login > (input[name=email], button.primary, button)
    struct Tree;

    impl TreeView for Tree {
        fn tag(&self, node: usize) -> &str {
            ["body", "form", "input", "button", "button"][node]
        }

        fn attr(&self, node: usize, name: &str) -> Option<&str> {
            match (node, name) {
                (1, "id") => Some("login"),
                (2, "name") => Some("email"),
                (3, "class") => Some("btn primary"),
                (3, "data-testid") => Some("submit-btn"),
                _ => None,
            }
        }

        fn match_parent(&self, node: usize) -> Option<usize> {
            match node {
                0 => None,
                1 => Some(0),
                _ => Some(1),
            }
        }

        fn sibling_position(&self, node: usize, same_tag: bool) -> usize {
            match (node, same_tag) {
                (3, true) => 1,
                (4, true) => 2,
                (n, _) if n >= 2 => n - 1,
                _ => 1,
            }
        }
    }

    fn hits(selector: &str) -> Vec<usize> {
        let list = SelectorList::parse(selector).unwrap();
        (0..5).filter(|&n| list.matches(&Tree, n)).collect()
    }

    #[test]
    fn test_simple_selectors() {
        assert_eq!(hits("#login"), vec![1]);
        assert_eq!(hits("button"), vec![3, 4]);
        assert_eq!(hits(".primary"), vec![3]);
        assert_eq!(hits("input[name=\"email\"]"), vec![2]);
        assert_eq!(hits("[data-testid^='submit']"), vec![3]);
        assert_eq!(hits("*"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_combinators_and_positions() {
        assert_eq!(hits("form > button:nth-of-type(2)"), vec![4]);
        assert_eq!(hits("body button"), vec![3, 4]);
        assert_eq!(hits("body > button"), Vec::<usize>::new());
        assert_eq!(hits("#login > :nth-child(1)"), vec![2]);
        assert_eq!(hits("input, .primary"), vec![2, 3]);
    }

    #[test]
    fn test_rejects_unsupported_syntax() {
        assert!(SelectorList::parse("div:hover").is_err());
        assert!(SelectorList::parse("a + b").is_err());
        assert!(SelectorList::parse("[unterminated").is_err());
        assert!(SelectorList::parse("").is_err());
        assert!(SelectorList::parse("button:nth-of-type(x)").is_err());
    }

    #[test]
    fn test_ident_helpers() {
        assert!(is_plain_ident("submit-btn"));
        assert!(!is_plain_ident("1abc"));
        assert!(!is_plain_ident("a:b"));
        assert_eq!(quote_value("say \"hi\""), r#""say \"hi\"""#);
    }
}
