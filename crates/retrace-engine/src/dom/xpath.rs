//! XPath subset for `SnapshotDom`.
//!
//! Location paths only: `/` and `//` steps, name tests and `*`, and predicates of the
//! forms `[n]`, `[last()]`, `[@a]`, `[@a='v']`, `[text()='v']`, `[.='v']`,
//! `[normalize-space()='v']` and `[contains(@a|text()|., 'v')]`. A leading `.` makes the
//! path relative to the query root; otherwise it starts at the owning document.

use super::selector::TreeView;
use retrace_common::protocol::normalize_text;
use std::collections::BTreeSet;

pub trait XPathTree: TreeView {
    fn children(&self, node: usize) -> &[usize];
    fn is_boundary(&self, node: usize) -> bool;
    fn own_text(&self, node: usize) -> &str;
    fn text_content(&self, node: usize) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    relative: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    descendant: bool,
    /// `None` is `*`.
    name: Option<String>,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    AttrExists(String),
    Equals(Operand, String),
    Contains(Operand, String),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attr(String),
    OwnText,
    StringValue,
}

/// Where evaluation happens: the children of the owning document, and the one boundary
/// host (the query root) whose content may be entered.
pub struct EvalContext<'a> {
    pub document_children: &'a [usize],
    pub root: usize,
}

impl XPath {
    pub fn parse(input: &str) -> Result<XPath, String> {
        let mut p = Parser {
            chars: input.trim().chars().collect(),
            pos: 0,
        };
        p.parse_path()
    }

    /// Matching nodes, in no particular order.
    pub fn evaluate<T: XPathTree + ?Sized>(&self, tree: &T, ctx: &EvalContext<'_>) -> Vec<usize> {
        // `None` is the virtual document node.
        let mut current: Vec<Option<usize>> = if self.relative {
            vec![Some(ctx.root)]
        } else {
            vec![None]
        };
        for step in &self.steps {
            let mut seen = BTreeSet::new();
            for context in &current {
                let parents = if step.descendant {
                    descendants_or_self(tree, ctx, *context)
                } else {
                    vec![*context]
                };
                for parent in parents {
                    let kids = children_of(tree, ctx, parent);
                    let mut matched: Vec<usize> = kids
                        .iter()
                        .copied()
                        .filter(|&k| {
                            step.name
                                .as_ref()
                                .is_none_or(|n| tree.tag(k).eq_ignore_ascii_case(n))
                        })
                        .collect();
                    for predicate in &step.predicates {
                        matched = apply(tree, predicate, matched);
                    }
                    seen.extend(matched);
                }
            }
            current = seen.into_iter().map(Some).collect();
        }
        current.into_iter().flatten().collect()
    }
}

fn children_of<'t, T: XPathTree + ?Sized>(
    tree: &'t T,
    ctx: &EvalContext<'t>,
    node: Option<usize>,
) -> &'t [usize] {
    match node {
        None => ctx.document_children,
        Some(n) if tree.is_boundary(n) && n != ctx.root => &[],
        Some(n) => tree.children(n),
    }
}

fn descendants_or_self<T: XPathTree + ?Sized>(
    tree: &T,
    ctx: &EvalContext<'_>,
    node: Option<usize>,
) -> Vec<Option<usize>> {
    let mut out = vec![node];
    let mut stack: Vec<usize> = children_of(tree, ctx, node).iter().rev().copied().collect();
    while let Some(n) = stack.pop() {
        out.push(Some(n));
        stack.extend(children_of(tree, ctx, Some(n)).iter().rev().copied());
    }
    out
}

fn apply<T: XPathTree + ?Sized>(tree: &T, predicate: &Predicate, nodes: Vec<usize>) -> Vec<usize> {
    match predicate {
        Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
        Predicate::Last => nodes.last().copied().into_iter().collect(),
        Predicate::AttrExists(name) => nodes
            .into_iter()
            .filter(|&n| tree.attr(n, name).is_some())
            .collect(),
        Predicate::Equals(op, value) => nodes
            .into_iter()
            .filter(|&n| operand(tree, op, n).is_some_and(|v| &v == value))
            .collect(),
        Predicate::Contains(op, value) => nodes
            .into_iter()
            .filter(|&n| operand(tree, op, n).is_some_and(|v| v.contains(value.as_str())))
            .collect(),
    }
}

fn operand<T: XPathTree + ?Sized>(tree: &T, op: &Operand, node: usize) -> Option<String> {
    match op {
        Operand::Attr(name) => tree.attr(node, name).map(str::to_string),
        Operand::OwnText => Some(tree.own_text(node).to_string()),
        Operand::StringValue => Some(normalize_text(&tree.text_content(node))),
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

    fn eat(&mut self, s: &str) -> bool {
        let n = s.chars().count();
        if self.pos + n <= self.chars.len()
            && self.chars[self.pos..self.pos + n].iter().copied().eq(s.chars())
        {
            self.pos += n;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_path(&mut self) -> Result<XPath, String> {
        let relative = self.peek() == Some('.') && self.chars.get(self.pos + 1) == Some(&'/');
        if relative {
            self.pos += 1;
        }
        let mut steps = vec![];
        while self.pos < self.chars.len() {
            let descendant = if self.eat("//") {
                true
            } else if self.eat("/") {
                false
            } else {
                return Err(format!("expected '/' at {}", self.pos));
            };
            steps.push(self.parse_step(descendant)?);
        }
        if steps.is_empty() {
            return Err("empty path".into());
        }
        Ok(XPath { relative, steps })
    }

    fn parse_step(&mut self, descendant: bool) -> Result<Step, String> {
        let name = if self.eat("*") {
            None
        } else {
            let name = self.parse_name();
            if name.is_empty() {
                return Err(format!("expected node test at {}", self.pos));
            }
            if self.eat("::") || self.peek() == Some('(') {
                return Err(format!("axis or node-type test '{}' is not supported", name));
            }
            Some(name)
        };
        let mut predicates = vec![];
        while self.eat("[") {
            self.skip_ws();
            predicates.push(self.parse_predicate()?);
            self.skip_ws();
            if !self.eat("]") {
                return Err(format!("unterminated predicate at {}", self.pos));
            }
        }
        Ok(Step {
            descendant,
            name,
            predicates,
        })
    }

    fn parse_name(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    fn parse_predicate(&mut self) -> Result<Predicate, String> {
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                digits.push(c);
                self.pos += 1;
            }
            return match digits.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Predicate::Position(n)),
                _ => Err(format!("bad position '{}'", digits)),
            };
        }
        if self.eat("last()") {
            return Ok(Predicate::Last);
        }
        if self.eat("contains(") {
            self.skip_ws();
            let op = self.parse_operand()?;
            self.skip_ws();
            if !self.eat(",") {
                return Err("expected ',' in contains()".into());
            }
            self.skip_ws();
            let value = self.parse_literal()?;
            self.skip_ws();
            if !self.eat(")") {
                return Err("unterminated contains()".into());
            }
            return Ok(Predicate::Contains(op, value));
        }
        let op = self.parse_operand()?;
        self.skip_ws();
        if !self.eat("=") {
            return match op {
                Operand::Attr(name) => Ok(Predicate::AttrExists(name)),
                _ => Err(format!("expected '=' at {}", self.pos)),
            };
        }
        self.skip_ws();
        let value = self.parse_literal()?;
        Ok(Predicate::Equals(op, value))
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        if self.eat("@") {
            let name = self.parse_name();
            if name.is_empty() {
                return Err("expected attribute name".into());
            }
            return Ok(Operand::Attr(name));
        }
        if self.eat("text()") {
            return Ok(Operand::OwnText);
        }
        if self.eat("normalize-space()") || self.eat("normalize-space(.)") || self.eat(".") {
            return Ok(Operand::StringValue);
        }
        Err(format!("unsupported predicate at {}", self.pos))
    }

    fn parse_literal(&mut self) -> Result<String, String> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format!("expected string literal at {}", self.pos)),
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err("unterminated string literal".into()),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

/// Quote a string as an XPath literal.
pub fn literal(value: &str) -> Option<String> {
    if !value.contains('\'') {
        Some(format!("'{}'", value))
    } else if !value.contains('"') {
        Some(format!("\"{}\"", value))
    } else {
        None
    }
}
