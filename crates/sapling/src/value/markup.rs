//! Markup trees

use std::sync::Arc;

/// A markup element (`<div class="a">...</div>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupElement {
    /// Tag name
    pub tag: Arc<str>,
    /// Attributes in source order
    pub attributes: Vec<(Arc<str>, Arc<str>)>,
    /// Children
    pub children: Vec<MarkupNode>,
}

/// A markup node: an element or a text node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    /// Element
    Element(MarkupElement),
    /// Text
    Text(Arc<str>),
}

impl MarkupNode {
    /// Create an element without attributes.
    pub fn element(tag: &str, children: Vec<MarkupNode>) -> Self {
        MarkupNode::Element(MarkupElement {
            tag: Arc::from(tag),
            attributes: Vec::new(),
            children,
        })
    }

    /// Create an element with attributes.
    pub fn element_with_attributes(
        tag: &str,
        attributes: &[(&str, &str)],
        children: Vec<MarkupNode>,
    ) -> Self {
        MarkupNode::Element(MarkupElement {
            tag: Arc::from(tag),
            attributes: attributes
                .iter()
                .map(|(k, v)| (Arc::from(*k), Arc::from(*v)))
                .collect(),
            children,
        })
    }

    /// Create a text node.
    pub fn text(s: &str) -> Self {
        MarkupNode::Text(Arc::from(s))
    }

    /// Check whether the node is a text node holding only whitespace.
    pub fn is_whitespace_text(&self) -> bool {
        matches!(self, MarkupNode::Text(t) if t.trim().is_empty())
    }

    /// The element, if the node is one.
    pub fn as_element(&self) -> Option<&MarkupElement> {
        match self {
            MarkupNode::Element(e) => Some(e),
            MarkupNode::Text(_) => None,
        }
    }
}

impl MarkupElement {
    /// Value of an attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| &**v)
    }
}

impl std::fmt::Display for MarkupNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkupNode::Text(t) => f.write_str(t),
            MarkupNode::Element(e) => {
                write!(f, "<{}", e.tag)?;
                for (k, v) in &e.attributes {
                    write!(f, " {k}={v:?}")?;
                }
                write!(f, ">")?;
                for child in &e.children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{}>", e.tag)
            }
        }
    }
}
