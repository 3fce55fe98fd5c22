//! Mutations of watchable values

use std::fmt;

use crate::value::{Path, Value};

/// How deep a watcher (or mutation callback) looks into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum WatchingDepth {
    /// Only mutations of the value itself
    #[default]
    Shallow,
    /// Mutations of the value and of its direct children
    Intermediate,
    /// Mutations at any depth
    Deep,
}

impl WatchingDepth {
    /// Depth to request from a child: `None` when children are not watched.
    pub fn minus_one(self) -> Option<WatchingDepth> {
        match self {
            WatchingDepth::Shallow => None,
            WatchingDepth::Intermediate => Some(WatchingDepth::Shallow),
            WatchingDepth::Deep => Some(WatchingDepth::Deep),
        }
    }

    /// Depth needed to see a mutation happening `n` levels below.
    pub fn plus(self, n: usize) -> WatchingDepth {
        match (self, n) {
            (d, 0) => d,
            (WatchingDepth::Shallow, 1) => WatchingDepth::Intermediate,
            _ => WatchingDepth::Deep,
        }
    }
}

/// Kind of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// New property
    AddProp,
    /// Property set to a new value
    UpdateProp,
    /// Property removed
    RemoveProp,
    /// Element inserted in a sequence
    InsertElemAtIndex,
    /// Element of a sequence replaced
    SetElemAtIndex,
    /// Element of a sequence removed
    RemovePosition,
    /// New dictionary entry
    AddEntry,
    /// Dictionary entry set to a new value
    UpdateEntry,
    /// Dictionary entry removed
    RemoveEntry,
    /// Mutation specific to a value type
    SpecificMutation,
    /// Unspecified mutation
    UnspecifiedMutation,
}

impl MutationKind {
    /// Name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            MutationKind::AddProp => "add-prop",
            MutationKind::UpdateProp => "update-prop",
            MutationKind::RemoveProp => "remove-prop",
            MutationKind::InsertElemAtIndex => "insert-elem-at-index",
            MutationKind::SetElemAtIndex => "set-elem-at-index",
            MutationKind::RemovePosition => "remove-position",
            MutationKind::AddEntry => "add-entry",
            MutationKind::UpdateEntry => "update-entry",
            MutationKind::RemoveEntry => "remove-entry",
            MutationKind::SpecificMutation => "specific-mutation",
            MutationKind::UnspecifiedMutation => "unspecified-mutation",
        }
    }

    /// Parse a kind from its name.
    pub fn from_name(name: &str) -> Option<MutationKind> {
        [
            MutationKind::AddProp,
            MutationKind::UpdateProp,
            MutationKind::RemoveProp,
            MutationKind::InsertElemAtIndex,
            MutationKind::SetElemAtIndex,
            MutationKind::RemovePosition,
            MutationKind::AddEntry,
            MutationKind::UpdateEntry,
            MutationKind::RemoveEntry,
            MutationKind::SpecificMutation,
            MutationKind::UnspecifiedMutation,
        ]
        .into_iter()
        .find(|k| k.name() == name)
    }
}

/// Immutable description of a change.
///
/// `path` locates the changed part relative to the watched value; `depth`
/// is the minimum watching depth needed to observe the mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Kind
    pub kind: MutationKind,
    /// Main payload (new value, inserted element...)
    pub data0: Value,
    /// Secondary payload (index, key...)
    pub data1: Value,
    /// Minimum depth needed to observe the mutation
    pub depth: WatchingDepth,
    /// Location of the change
    pub path: Path,
}

impl Mutation {
    /// Create a shallow mutation.
    pub fn new(kind: MutationKind, data0: Value, data1: Value, path: Path) -> Self {
        Self {
            kind,
            data0,
            data1,
            depth: WatchingDepth::Shallow,
            path,
        }
    }

    /// Mutation for a property set on an object.
    pub fn prop(kind: MutationKind, name: &str, value: Value) -> Self {
        Self::new(kind, value, Value::Nil, Path::root().join(name))
    }

    /// Same mutation located under `parent`.
    pub fn relocalized(&self, parent: &Path) -> Mutation {
        Mutation {
            path: parent.join_path(&self.path),
            ..self.clone()
        }
    }

    /// Same mutation seen from a value `levels` levels above, under `prefix`.
    pub fn from_child(&self, prefix: &Path, levels: usize) -> Mutation {
        Mutation {
            depth: self.depth.plus(levels),
            ..self.relocalized(prefix)
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutation({} {})", self.kind.name(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_combinators() {
        assert_eq!(WatchingDepth::Shallow.minus_one(), None);
        assert_eq!(WatchingDepth::Intermediate.minus_one(), Some(WatchingDepth::Shallow));
        assert_eq!(WatchingDepth::Deep.minus_one(), Some(WatchingDepth::Deep));
        assert_eq!(WatchingDepth::Shallow.plus(1), WatchingDepth::Intermediate);
        assert_eq!(WatchingDepth::Shallow.plus(2), WatchingDepth::Deep);
        assert_eq!(WatchingDepth::Intermediate.plus(1), WatchingDepth::Deep);
        assert!(WatchingDepth::Shallow < WatchingDepth::Deep);
    }

    #[test]
    fn test_relocalized() {
        let m = Mutation::prop(MutationKind::UpdateProp, "n", Value::Int(2));
        assert_eq!(m.path.as_str(), "/n");
        let r = m.relocalized(&Path::new("/obj"));
        assert_eq!(r.path.as_str(), "/obj/n");
        let c = m.from_child(&Path::new("/child"), 1);
        assert_eq!(c.depth, WatchingDepth::Intermediate);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(MutationKind::from_name("add-prop"), Some(MutationKind::AddProp));
        assert_eq!(MutationKind::from_name("nope"), None);
    }
}
