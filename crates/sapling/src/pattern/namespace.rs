//! Pattern namespaces (`%http.`)

use std::sync::Arc;

use indexmap::IndexMap;

use super::Pattern;

/// A named group of patterns.
pub struct PatternNamespace {
    name: Arc<str>,
    patterns: IndexMap<Arc<str>, Pattern>,
}

impl PatternNamespace {
    /// Create a namespace.
    pub fn new<K: AsRef<str>>(name: &str, patterns: impl IntoIterator<Item = (K, Pattern)>) -> Self {
        Self {
            name: Arc::from(name),
            patterns: patterns
                .into_iter()
                .map(|(k, p)| (Arc::from(k.as_ref()), p))
                .collect(),
        }
    }

    /// Name of the namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pattern of the namespace named `member`.
    pub fn get(&self, member: &str) -> Option<&Pattern> {
        self.patterns.get(member)
    }

    /// Member names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(|k| &**k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let ns = PatternNamespace::new("num", [("int", Pattern::int()), ("float", Pattern::float())]);
        assert_eq!(ns.name(), "num");
        assert_eq!(ns.get("int"), Some(&Pattern::int()));
        assert!(ns.get("str").is_none());
        assert_eq!(ns.names().collect::<Vec<_>>(), vec!["int", "float"]);
    }
}
