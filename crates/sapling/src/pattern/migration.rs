//! Schema migrations
//!
//! [`migration_operations`] compares the current pattern of a stored value
//! with its next pattern and lists the operations turning values of the
//! former into values of the latter. Operations are located by a
//! pseudo-path: a UNIX-like path whose segments are property names,
//! positional indices, or `*` for the general element of a list.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::{Result, RuntimeError};
use crate::value::Path;

use super::{EntryPattern, Pattern, PatternKind, SequencePattern};

/// Kind of a migration operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOpKind {
    /// The value at the pseudo-path is replaced
    Replace,
    /// The property at the pseudo-path is removed
    Remove,
    /// A property is added at the pseudo-path
    Include {
        /// Whether the new property is optional
        optional: bool,
    },
    /// An optional property becomes required and must be initialized where
    /// it is missing
    NillableInit,
}

impl MigrationOpKind {
    /// Name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            MigrationOpKind::Replace => "replace",
            MigrationOpKind::Remove => "remove",
            MigrationOpKind::Include { .. } => "include",
            MigrationOpKind::NillableInit => "nillable-init",
        }
    }
}

/// A migration operation.
#[derive(Clone, PartialEq)]
pub struct MigrationOp {
    /// Kind
    pub kind: MigrationOpKind,
    /// Location
    pub pseudo_path: Path,
    /// Pattern before the migration (`None` for inclusions)
    pub current: Option<Pattern>,
    /// Pattern after the migration (`None` for removals)
    pub next: Option<Pattern>,
}

impl MigrationOp {
    fn new(kind: MigrationOpKind, pseudo_path: Path, current: Option<Pattern>, next: Option<Pattern>) -> Self {
        Self {
            kind,
            pseudo_path,
            current,
            next,
        }
    }
}

impl fmt::Debug for MigrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.pseudo_path)
    }
}

/// Decides whether two distinct patterns describe the same values.
pub type SubtypeEquivalence = Arc<dyn Fn(&Pattern, &Pattern) -> bool + Send + Sync>;

/// Parameters of a migration computation.
#[derive(Clone, Default)]
pub struct MigrationContext {
    equivalence: Option<SubtypeEquivalence>,
}

impl MigrationContext {
    /// Context where only equal patterns are equivalent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat patterns accepted by `equivalence` as equivalent.
    pub fn with_equivalence(
        mut self,
        equivalence: impl Fn(&Pattern, &Pattern) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.equivalence = Some(Arc::new(equivalence));
        self
    }

    fn equivalent(&self, current: &Pattern, next: &Pattern) -> bool {
        current == next || self.equivalence.as_ref().is_some_and(|eq| eq(current, next))
    }
}

/// Check a pseudo-path: absolute, no trailing slash (except the root), no
/// glob characters except `*` as a whole segment.
pub fn validate_pseudo_path(pseudo_path: &str) -> Result<Path> {
    let invalid = || RuntimeError::InvalidMigrationPseudoPath(pseudo_path.to_string());
    if !pseudo_path.starts_with('/') {
        return Err(invalid());
    }
    if pseudo_path == "/" {
        return Ok(Path::root());
    }
    if pseudo_path.ends_with('/') {
        return Err(invalid());
    }
    for segment in pseudo_path[1..].split('/') {
        if segment.is_empty() {
            return Err(invalid());
        }
        if segment != "*" && segment.contains(['*', '?', '[', ']']) {
            return Err(invalid());
        }
    }
    Ok(Path::new(pseudo_path))
}

/// Operations migrating values of `current` to values of `next`.
pub fn migration_operations(
    mctx: &MigrationContext,
    current: &Pattern,
    next: &Pattern,
    pseudo_path: &str,
) -> Result<Vec<MigrationOp>> {
    let path = validate_pseudo_path(pseudo_path)?;
    let mut ops = Vec::new();
    collect(mctx, current, next, &path, &mut ops);
    trace!(pseudo_path, count = ops.len(), "migration operations");
    Ok(ops)
}

fn replace(current: &Pattern, next: &Pattern, path: &Path) -> MigrationOp {
    MigrationOp::new(
        MigrationOpKind::Replace,
        path.clone(),
        Some(current.clone()),
        Some(next.clone()),
    )
}

fn collect(mctx: &MigrationContext, current: &Pattern, next: &Pattern, path: &Path, ops: &mut Vec<MigrationOp>) {
    if mctx.equivalent(current, next) {
        return;
    }
    match (current.kind(), next.kind()) {
        (PatternKind::Object(c), PatternKind::Object(n)) => {
            collect_entries(mctx, current, next, c.entries(), n.entries(), path, ops)
        }
        (PatternKind::Record(c), PatternKind::Record(n)) => {
            collect_entries(mctx, current, next, c.entries(), n.entries(), path, ops)
        }
        (PatternKind::List(c), PatternKind::List(n)) => match (c, n) {
            (SequencePattern::General { element: ce, .. }, SequencePattern::General { element: ne, .. }) => {
                collect(mctx, ce, ne, &path.join("*"), ops)
            }
            (SequencePattern::Positional(ce), SequencePattern::Positional(ne)) if ce.len() == ne.len() => {
                for (i, (c, n)) in ce.iter().zip(ne).enumerate() {
                    collect(mctx, c, n, &path.join(&i.to_string()), ops);
                }
            }
            (SequencePattern::Positional(ce), SequencePattern::General { element: ne, .. }) => {
                for (i, c) in ce.iter().enumerate() {
                    collect(mctx, c, ne, &path.join(&i.to_string()), ops);
                }
            }
            _ => ops.push(replace(current, next, path)),
        },
        _ => ops.push(replace(current, next, path)),
    }
}

fn collect_entries(
    mctx: &MigrationContext,
    current: &Pattern,
    next: &Pattern,
    current_entries: &IndexMap<Arc<str>, EntryPattern>,
    next_entries: &IndexMap<Arc<str>, EntryPattern>,
    path: &Path,
    ops: &mut Vec<MigrationOp>,
) {
    let nothing_kept = !current_entries.is_empty()
        && !next_entries.is_empty()
        && current_entries.keys().all(|k| !next_entries.contains_key(k));
    if nothing_kept {
        ops.push(replace(current, next, path));
        return;
    }

    for (name, entry) in current_entries {
        let entry_path = path.join(name);
        match next_entries.get(name) {
            None => ops.push(MigrationOp::new(
                MigrationOpKind::Remove,
                entry_path,
                Some(entry.pattern.clone()),
                None,
            )),
            Some(next_entry) => {
                let before = ops.len();
                collect(mctx, &entry.pattern, &next_entry.pattern, &entry_path, ops);
                if ops.len() == before && entry.optional && !next_entry.optional {
                    ops.push(MigrationOp::new(
                        MigrationOpKind::NillableInit,
                        entry_path,
                        Some(entry.pattern.clone()),
                        Some(next_entry.pattern.clone()),
                    ));
                }
            }
        }
    }

    for (name, entry) in next_entries {
        if !current_entries.contains_key(name) {
            ops.push(MigrationOp::new(
                MigrationOpKind::Include {
                    optional: entry.optional,
                },
                path.join(name),
                None,
                Some(entry.pattern.clone()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ObjectPattern;
    use pretty_assertions::assert_eq;

    fn summary(ops: &[MigrationOp]) -> Vec<(MigrationOpKind, &str)> {
        ops.iter().map(|op| (op.kind, op.pseudo_path.as_str())).collect()
    }

    #[test]
    fn test_include() {
        let current = Pattern::object(ObjectPattern::new().entry("a", Pattern::int()));
        let next = Pattern::object(
            ObjectPattern::new()
                .entry("a", Pattern::int())
                .optional_entry("b", Pattern::str()),
        );
        let ops = migration_operations(&MigrationContext::new(), &current, &next, "/").unwrap();
        assert_eq!(summary(&ops), vec![(MigrationOpKind::Include { optional: true }, "/b")]);
    }

    #[test]
    fn test_remove_and_nested_replace() {
        let current = Pattern::object(
            ObjectPattern::new()
                .entry("a", Pattern::int())
                .entry("b", Pattern::object(ObjectPattern::new().entry("c", Pattern::int()))),
        );
        let next = Pattern::object(
            ObjectPattern::new().entry("b", Pattern::object(ObjectPattern::new().entry("c", Pattern::str()))),
        );
        let ops = migration_operations(&MigrationContext::new(), &current, &next, "/root").unwrap();
        assert_eq!(
            summary(&ops),
            vec![
                (MigrationOpKind::Remove, "/root/a"),
                (MigrationOpKind::Replace, "/root/b/c"),
            ]
        );
    }

    #[test]
    fn test_disjoint_objects_are_replaced() {
        let current = Pattern::object(ObjectPattern::new().entry("a", Pattern::int()));
        let next = Pattern::object(ObjectPattern::new().entry("b", Pattern::int()));
        let ops = migration_operations(&MigrationContext::new(), &current, &next, "/").unwrap();
        assert_eq!(summary(&ops), vec![(MigrationOpKind::Replace, "/")]);
    }

    #[test]
    fn test_general_list_elements() {
        let current = Pattern::list_of(Pattern::int());
        let next = Pattern::list_of(Pattern::str());
        let ops = migration_operations(&MigrationContext::new(), &current, &next, "/items").unwrap();
        assert_eq!(summary(&ops), vec![(MigrationOpKind::Replace, "/items/*")]);
        let general_to_positional = Pattern::list(vec![Pattern::int()]);
        let ops = migration_operations(&MigrationContext::new(), &current, &general_to_positional, "/").unwrap();
        assert_eq!(summary(&ops), vec![(MigrationOpKind::Replace, "/")]);
    }

    #[test]
    fn test_equivalence_oracle() {
        let current = Pattern::list_of(Pattern::int());
        let next = Pattern::list_of(Pattern::float());
        let numbers = MigrationContext::new().with_equivalence(|a, b| {
            let numeric = [Pattern::int(), Pattern::float()];
            numeric.contains(a) && numeric.contains(b)
        });
        assert!(migration_operations(&numbers, &current, &next, "/").unwrap().is_empty());
        assert_eq!(migration_operations(&MigrationContext::new(), &current, &next, "/").unwrap().len(), 1);
    }

    #[test]
    fn test_pseudo_path_validation() {
        assert!(validate_pseudo_path("/").is_ok());
        assert!(validate_pseudo_path("/a/*/b").is_ok());
        assert!(validate_pseudo_path("/0/1").is_ok());
        for invalid in ["/foo/", "/foo?", "/a*", "/[x]", "foo", "/a//b"] {
            assert!(
                matches!(validate_pseudo_path(invalid), Err(RuntimeError::InvalidMigrationPseudoPath(_))),
                "{invalid}"
            );
        }
    }
}
