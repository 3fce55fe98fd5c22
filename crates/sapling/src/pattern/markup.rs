//! Markup patterns
//!
//! A markup pattern is a tree of element patterns. Each element pattern
//! carries a quantifier saying how many consecutive sibling elements it
//! matches; text patterns and lazy wildcards (`*`) sit between them.
//! Whitespace-only text nodes are ignored.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::value::{MarkupElement, MarkupNode, Value};

use super::StringPattern;

/// How many consecutive sibling elements an element pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantifier {
    /// Exactly one
    #[default]
    One,
    /// Zero or one
    Optional,
    /// At least one
    OneOrMore,
    /// Any number
    ZeroOrMore,
}

impl Quantifier {
    fn allows_zero(self) -> bool {
        matches!(self, Quantifier::Optional | Quantifier::ZeroOrMore)
    }

    fn symbol(self) -> &'static str {
        match self {
            Quantifier::One => "",
            Quantifier::Optional => "?",
            Quantifier::OneOrMore => "+",
            Quantifier::ZeroOrMore => "*",
        }
    }
}

/// Pattern of a markup element.
#[derive(Clone, PartialEq)]
pub struct MarkupPatternElement {
    tag: Arc<str>,
    quantifier: Quantifier,
    attributes: Vec<(Arc<str>, StringPattern)>,
    children: Vec<MarkupPatternNode>,
}

/// Child of an element pattern.
#[derive(Clone, PartialEq)]
pub enum MarkupPatternNode {
    /// Element pattern
    Element(MarkupPatternElement),
    /// Text, compared to a text child
    ConstText(Arc<str>),
    /// Lazy wildcard
    Wildcard,
}

impl MarkupPatternNode {
    /// Text child pattern.
    pub fn text(s: &str) -> Self {
        MarkupPatternNode::ConstText(Arc::from(s))
    }
}

impl From<MarkupPatternElement> for MarkupPatternNode {
    fn from(e: MarkupPatternElement) -> Self {
        MarkupPatternNode::Element(e)
    }
}

impl MarkupPatternElement {
    /// Element pattern matching exactly one `tag` element without children.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: Arc::from(tag),
            quantifier: Quantifier::One,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set the quantifier.
    pub fn quantifier(mut self, quantifier: Quantifier) -> Self {
        self.quantifier = quantifier;
        self
    }

    /// Require an attribute whose value matches `pattern`.
    pub fn attribute(mut self, name: &str, pattern: StringPattern) -> Self {
        self.attributes.push((Arc::from(name), pattern));
        self
    }

    /// Append a child pattern.
    pub fn child(mut self, child: impl Into<MarkupPatternNode>) -> Self {
        self.children.push(child.into());
        self
    }

    fn matches(&self, ctx: &Context, element: &MarkupElement) -> bool {
        if element.tag != self.tag {
            return false;
        }
        let attributes_match = self.attributes.iter().all(|(name, pattern)| {
            element
                .attribute(name)
                .is_some_and(|v| pattern.test_str(ctx, v))
        });
        if !attributes_match {
            return false;
        }
        let children: Vec<&MarkupNode> = element
            .children
            .iter()
            .filter(|c| !c.is_whitespace_text())
            .collect();
        match_children(ctx, &self.children, &children, 0, 0)
    }
}

fn is_wildcard(node: Option<&MarkupPatternNode>) -> bool {
    matches!(node, Some(MarkupPatternNode::Wildcard))
}

fn text_matches(patterns: &[MarkupPatternNode], pi: usize, expected: &str, text: &str) -> bool {
    let after_wildcard = pi > 0 && is_wildcard(patterns.get(pi - 1));
    let before_wildcard = is_wildcard(patterns.get(pi + 1));
    match (after_wildcard, before_wildcard) {
        (true, true) => text.contains(expected),
        (true, false) => text.ends_with(expected),
        (false, true) => text.starts_with(expected),
        (false, false) => text == expected,
    }
}

/// Check whether the child pattern at `pi` accepts `node` as its first node.
fn starts_match(
    ctx: &Context,
    patterns: &[MarkupPatternNode],
    pi: usize,
    pattern: &MarkupPatternNode,
    node: &MarkupNode,
) -> bool {
    match (pattern, node) {
        (MarkupPatternNode::Wildcard, _) => true,
        (MarkupPatternNode::ConstText(expected), MarkupNode::Text(text)) => {
            text_matches(patterns, pi, expected, text)
        }
        (MarkupPatternNode::Element(element), MarkupNode::Element(e)) => element.matches(ctx, e),
        _ => false,
    }
}

fn match_children(
    ctx: &Context,
    patterns: &[MarkupPatternNode],
    nodes: &[&MarkupNode],
    pi: usize,
    ni: usize,
) -> bool {
    let Some(pattern) = patterns.get(pi) else {
        return ni == nodes.len();
    };
    match pattern {
        MarkupPatternNode::Wildcard => {
            let Some(next) = patterns.get(pi + 1) else {
                return true;
            };
            // lazy: stop before the first node the next pattern accepts
            let first = (ni..nodes.len()).find(|&k| starts_match(ctx, patterns, pi + 1, next, nodes[k]));
            match (first, next) {
                (Some(k), _) => match_children(ctx, patterns, nodes, pi + 1, k),
                (None, MarkupPatternNode::Element(e)) if e.quantifier.allows_zero() => {
                    match_children(ctx, patterns, nodes, pi + 1, nodes.len())
                }
                (None, _) => false,
            }
        }
        MarkupPatternNode::ConstText(expected) => {
            let Some(MarkupNode::Text(text)) = nodes.get(ni) else {
                return false;
            };
            text_matches(patterns, pi, expected, text)
                && match_children(ctx, patterns, nodes, pi + 1, ni + 1)
        }
        MarkupPatternNode::Element(element) => {
            let run = nodes[ni..]
                .iter()
                .take_while(|n| n.as_element().is_some_and(|e| element.matches(ctx, e)))
                .count();
            let counts: Vec<usize> = match element.quantifier {
                Quantifier::One if run == 1 => vec![1],
                Quantifier::One => vec![],
                Quantifier::Optional if run > 1 => vec![],
                Quantifier::Optional => (0..=run).rev().collect(),
                Quantifier::OneOrMore => (1..=run).rev().collect(),
                Quantifier::ZeroOrMore => (0..=run).rev().collect(),
            };
            counts
                .into_iter()
                .any(|n| match_children(ctx, patterns, nodes, pi + 1, ni + n))
        }
    }
}

/// A pattern matching markup trees.
#[derive(Clone, PartialEq)]
pub struct MarkupPattern {
    root: MarkupPatternElement,
}

impl MarkupPattern {
    /// Pattern whose root element is `root`; the root's quantifier is
    /// ignored.
    pub fn new(root: MarkupPatternElement) -> Self {
        Self { root }
    }

    /// Root element pattern.
    pub fn root(&self) -> &MarkupPatternElement {
        &self.root
    }

    /// Match a markup tree.
    pub fn matches(&self, ctx: &Context, node: &MarkupNode) -> bool {
        match node {
            MarkupNode::Element(e) => self.root.matches(ctx, e),
            MarkupNode::Text(_) => false,
        }
    }

    pub(super) fn test(&self, ctx: &Context, value: &Value) -> bool {
        match value {
            Value::Markup(node) => self.matches(ctx, node),
            _ => false,
        }
    }
}

fn write_element(f: &mut fmt::Formatter<'_>, e: &MarkupPatternElement) -> fmt::Result {
    write!(f, "<{}{}", e.tag, e.quantifier.symbol())?;
    for (name, pattern) in &e.attributes {
        write!(f, " {}={:?}", name, pattern)?;
    }
    write!(f, ">")?;
    for child in &e.children {
        match child {
            MarkupPatternNode::Element(c) => write_element(f, c)?,
            MarkupPatternNode::ConstText(t) => write!(f, "{t}")?,
            MarkupPatternNode::Wildcard => write!(f, "*")?,
        }
    }
    write!(f, "</{}>", e.tag)
}

impl fmt::Debug for MarkupPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%")?;
        write_element(f, &self.root)
    }
}
