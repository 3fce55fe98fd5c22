//! Path patterns with named segments (`/users/{:id}/posts`)

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Result, RuntimeError};
use crate::value::Value;

#[derive(Clone, PartialEq)]
enum Segment {
    Literal(Arc<str>),
    Named(Arc<str>),
}

/// A path template. `{:name}` stands for one non-empty segment.
#[derive(Clone, PartialEq)]
pub struct NamedSegmentPathPattern {
    template: Arc<str>,
    segments: Vec<Segment>,
}

impl NamedSegmentPathPattern {
    /// Parse a template such as `/home/{:username}`.
    pub fn parse(template: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            RuntimeError::InvalidArgument(format!("invalid path template {template:?}: {reason}"))
        };
        let Some(rest) = template.strip_prefix('/') else {
            return Err(invalid("not absolute"));
        };
        let mut segments = Vec::new();
        let mut seen = Vec::<&str>::new();
        for segment in rest.split('/') {
            if let Some(name) = segment.strip_prefix("{:").and_then(|s| s.strip_suffix('}')) {
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
                    return Err(invalid("bad segment name"));
                }
                if seen.contains(&name) {
                    return Err(invalid("duplicate segment name"));
                }
                seen.push(name);
                segments.push(Segment::Named(Arc::from(name)));
            } else if segment.contains(['{', '}']) {
                return Err(invalid("named segments must span a whole segment"));
            } else {
                segments.push(Segment::Literal(Arc::from(segment)));
            }
        }
        Ok(Self {
            template: Arc::from(template),
            segments,
        })
    }

    /// The template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of the named segments, in order.
    pub fn names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Named(n) => Some(&**n),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    fn match_str<'a>(&self, path: &'a str) -> Option<Vec<(&Arc<str>, &'a str)>> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut groups = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if **lit == *part => {}
                Segment::Literal(_) => return None,
                Segment::Named(_) if part.is_empty() => return None,
                Segment::Named(name) => groups.push((name, part)),
            }
        }
        Some(groups)
    }

    pub(super) fn test(&self, value: &Value) -> bool {
        match value {
            Value::Path(p) => self.match_str(p.as_str()).is_some(),
            _ => false,
        }
    }

    /// Groups of a match: `0` holds the whole path, every named segment its
    /// value.
    pub fn match_groups(&self, value: &Value) -> Option<IndexMap<Arc<str>, Value>> {
        let Value::Path(path) = value else {
            return None;
        };
        let groups = self.match_str(path.as_str())?;
        let mut result = IndexMap::new();
        result.insert(Arc::from("0"), Value::Path(path.clone()));
        for (name, part) in groups {
            result.insert(name.clone(), Value::string(part));
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse() {
        let p = NamedSegmentPathPattern::parse("/users/{:id}/posts/{:post}").unwrap();
        assert_eq!(p.names(), vec!["id", "post"]);
        assert!(NamedSegmentPathPattern::parse("users/{:id}").is_err());
        assert!(NamedSegmentPathPattern::parse("/a/{:id}x").is_err());
        assert!(NamedSegmentPathPattern::parse("/{:a}/{:a}").is_err());
    }

    #[test]
    fn test_groups() {
        let p = NamedSegmentPathPattern::parse("/users/{:id}/posts").unwrap();
        let groups = p.match_groups(&Value::path("/users/42/posts")).unwrap();
        assert_eq!(groups.get("id"), Some(&Value::string("42")));
        assert_eq!(groups.get("0"), Some(&Value::path("/users/42/posts")));
        assert!(p.match_groups(&Value::path("/users//posts")).is_none());
        assert!(p.match_groups(&Value::path("/users/42")).is_none());
        assert!(!p.test(&Value::string("/users/42/posts")));
    }
}
