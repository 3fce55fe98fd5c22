//! Object, record, list, tuple and option patterns

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::iter::{BoxedIterator, CartesianIterator, ChainIterator, IteratorConfiguration};
use crate::value::{IntRange, Object, Record, Tuple, Value};

use super::{ComplexPropertyConstraint, Pattern};

/// Pattern of one property.
#[derive(Clone, PartialEq)]
pub struct EntryPattern {
    /// Pattern the property's value must match
    pub pattern: Pattern,
    /// Whether the property may be absent
    pub optional: bool,
}

fn test_entries(
    ctx: &Context,
    entries: &IndexMap<Arc<str>, EntryPattern>,
    inexact: bool,
    keys: &[Arc<str>],
    get: impl Fn(&str) -> Option<Value>,
) -> bool {
    for (name, entry) in entries {
        match get(name) {
            Some(value) => {
                if !entry.pattern.test(ctx, &value) {
                    return false;
                }
            }
            None if entry.optional => {}
            None => return false,
        }
    }
    inexact || keys.iter().all(|k| entries.contains_key(k))
}

fn write_entries(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    entries: &IndexMap<Arc<str>, EntryPattern>,
    inexact: bool,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, (name, entry)) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        let opt = if entry.optional { "?" } else { "" };
        write!(f, "{name}{opt}: {:?}", entry.pattern)?;
    }
    if inexact {
        write!(f, "{}...", if entries.is_empty() { "" } else { ", " })?;
    }
    write!(f, "}}")
}

/// Optional entries past this many are left out of iterated values.
const MAX_VARIED_OPTIONAL_ENTRIES: usize = 6;

/// Key sets an iterator walks: the required entries plus every subset of
/// the iterable optional entries, in sorted key order, required-only first.
/// Returns `None` when a required entry is not iterable.
fn entry_variants(
    ctx: &Context,
    entries: &IndexMap<Arc<str>, EntryPattern>,
) -> Option<Vec<(Vec<Arc<str>>, Vec<Pattern>)>> {
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let required: Vec<Pattern> = sorted
        .iter()
        .filter(|(_, e)| !e.optional)
        .map(|(_, e)| e.pattern.clone())
        .collect();
    if !all_iterable(ctx, &required) {
        return None;
    }
    let varied: Vec<&Arc<str>> = sorted
        .iter()
        .filter(|(_, e)| e.optional && all_iterable(ctx, std::slice::from_ref(&e.pattern)))
        .map(|(k, _)| *k)
        .take(MAX_VARIED_OPTIONAL_ENTRIES)
        .collect();

    let variants: Vec<(Vec<Arc<str>>, Vec<Pattern>)> = (0..1usize << varied.len())
        .map(|mask| {
            sorted
                .iter()
                .filter(|(k, e)| {
                    !e.optional
                        || varied
                            .iter()
                            .position(|v| v == k)
                            .is_some_and(|bit| mask & (1 << bit) != 0)
                })
                .map(|(k, e)| ((*k).clone(), e.pattern.clone()))
                .unzip()
        })
        .collect();
    Some(variants)
}

fn all_iterable(ctx: &Context, patterns: &[Pattern]) -> bool {
    patterns
        .iter()
        .all(|p| p.iterator(ctx, &IteratorConfiguration::default()).is_some())
}

// ═══════════════════════════════════════════════════════════════════════
// Object
// ═══════════════════════════════════════════════════════════════════════

/// Object pattern: per-property patterns plus complex property
/// constraints (`self.min < self.max`).
#[derive(Clone, Default, PartialEq)]
pub struct ObjectPattern {
    entries: IndexMap<Arc<str>, EntryPattern>,
    inexact: bool,
    constraints: Vec<ComplexPropertyConstraint>,
}

impl ObjectPattern {
    /// Exact object pattern without entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required entry.
    pub fn entry(mut self, name: &str, pattern: Pattern) -> Self {
        let entry = EntryPattern { pattern, optional: false };
        self.entries.insert(Arc::from(name), entry);
        self
    }

    /// Add an optional entry.
    pub fn optional_entry(mut self, name: &str, pattern: Pattern) -> Self {
        let entry = EntryPattern { pattern, optional: true };
        self.entries.insert(Arc::from(name), entry);
        self
    }

    /// Accept properties without an entry.
    pub fn inexact(mut self) -> Self {
        self.inexact = true;
        self
    }

    /// Add a complex property constraint.
    pub fn with_constraint(mut self, constraint: ComplexPropertyConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &IndexMap<Arc<str>, EntryPattern> {
        &self.entries
    }

    /// Whether extra properties are accepted.
    pub fn is_inexact(&self) -> bool {
        self.inexact
    }

    /// Complex property constraints.
    pub fn constraints(&self) -> &[ComplexPropertyConstraint] {
        &self.constraints
    }

    pub(super) fn test(&self, ctx: &Context, value: &Value) -> bool {
        let Value::Object(obj) = value else {
            return false;
        };
        let keys = obj.prop_names();
        if !test_entries(ctx, &self.entries, self.inexact, &keys, |k| obj.prop(k)) {
            return false;
        }
        if self.constraints.is_empty() {
            return true;
        }
        let evaluator = ctx.constraint_evaluator();
        self.constraints
            .iter()
            .all(|c| matches!(evaluator.eval(ctx, c.source(), value), Ok(true)))
    }

    pub(super) fn iterator(&self, ctx: &Context) -> Option<BoxedIterator> {
        let iterators = entry_variants(ctx, &self.entries)?
            .into_iter()
            .map(|(keys, patterns)| {
                let builder = move |values: Vec<Value>| {
                    Some(Value::Object(Object::from_pairs(keys.iter().cloned().zip(values))))
                };
                Box::new(CartesianIterator::new(patterns, Box::new(builder))) as BoxedIterator
            })
            .collect();
        Some(Box::new(ChainIterator::new(iterators)))
    }
}

impl fmt::Debug for ObjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_entries(f, "%{", &self.entries, self.inexact)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Record
// ═══════════════════════════════════════════════════════════════════════

/// Record pattern.
#[derive(Clone, Default, PartialEq)]
pub struct RecordPattern {
    entries: IndexMap<Arc<str>, EntryPattern>,
    inexact: bool,
}

impl RecordPattern {
    /// Exact record pattern without entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required entry.
    pub fn entry(mut self, name: &str, pattern: Pattern) -> Self {
        let entry = EntryPattern { pattern, optional: false };
        self.entries.insert(Arc::from(name), entry);
        self
    }

    /// Add an optional entry.
    pub fn optional_entry(mut self, name: &str, pattern: Pattern) -> Self {
        let entry = EntryPattern { pattern, optional: true };
        self.entries.insert(Arc::from(name), entry);
        self
    }

    /// Accept entries without a pattern.
    pub fn inexact(mut self) -> Self {
        self.inexact = true;
        self
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &IndexMap<Arc<str>, EntryPattern> {
        &self.entries
    }

    /// Whether extra entries are accepted.
    pub fn is_inexact(&self) -> bool {
        self.inexact
    }

    pub(super) fn test(&self, ctx: &Context, value: &Value) -> bool {
        let Value::Record(rec) = value else {
            return false;
        };
        let keys: Vec<Arc<str>> = rec.keys().cloned().collect();
        test_entries(ctx, &self.entries, self.inexact, &keys, |k| rec.get(k).cloned())
    }

    pub(super) fn iterator(&self, ctx: &Context) -> Option<BoxedIterator> {
        let iterators = entry_variants(ctx, &self.entries)?
            .into_iter()
            .map(|(keys, patterns)| {
                let builder = move |values: Vec<Value>| {
                    let entries: IndexMap<Arc<str>, Value> = keys.iter().cloned().zip(values).collect();
                    Record::new(entries).ok().map(|r| Value::Record(Arc::new(r)))
                };
                Box::new(CartesianIterator::new(patterns, Box::new(builder))) as BoxedIterator
            })
            .collect();
        Some(Box::new(ChainIterator::new(iterators)))
    }
}

impl fmt::Debug for RecordPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_entries(f, "%#{", &self.entries, self.inexact)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// List & tuple
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
pub(super) enum SequenceKind {
    List,
    Tuple,
}

/// Shape of a list or tuple pattern.
#[derive(Clone, PartialEq)]
pub enum SequencePattern {
    /// One pattern per position
    Positional(Vec<Pattern>),
    /// Every element matches `element`
    General {
        /// Element pattern
        element: Pattern,
        /// Allowed lengths, if restricted
        length: Option<IntRange>,
    },
}

impl SequencePattern {
    /// Homogeneous sequence of any length.
    pub fn general(element: Pattern) -> Self {
        SequencePattern::General { element, length: None }
    }

    /// Homogeneous sequence whose length is in `length`.
    pub fn general_with_length(element: Pattern, length: IntRange) -> Self {
        SequencePattern::General {
            element,
            length: Some(length),
        }
    }

    pub(super) fn test_elements(&self, ctx: &Context, elements: &[Value]) -> bool {
        match self {
            SequencePattern::Positional(patterns) => {
                patterns.len() == elements.len()
                    && patterns.iter().zip(elements).all(|(p, e)| p.test(ctx, e))
            }
            SequencePattern::General { element, length } => {
                length.map_or(true, |r| r.contains(elements.len() as i64))
                    && elements.iter().all(|e| element.test(ctx, e))
            }
        }
    }

    pub(super) fn iterator(&self, ctx: &Context, kind: SequenceKind) -> Option<BoxedIterator> {
        let SequencePattern::Positional(patterns) = self else {
            return None;
        };
        if !all_iterable(ctx, patterns) {
            return None;
        }
        let builder = move |values: Vec<Value>| match kind {
            SequenceKind::List => Some(Value::list(values)),
            SequenceKind::Tuple => Tuple::new(values).ok().map(|t| Value::Tuple(Arc::new(t))),
        };
        Some(Box::new(CartesianIterator::new(patterns.clone(), Box::new(builder))))
    }
}

impl fmt::Debug for SequencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencePattern::Positional(patterns) => {
                write!(f, "[")?;
                for (i, p) in patterns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", p)?;
                }
                write!(f, "]")
            }
            SequencePattern::General { element, length: None } => write!(f, "[]{:?}", element),
            SequencePattern::General {
                element,
                length: Some(r),
            } => write!(f, "[]{:?}{{{}..{}}}", element, r.start, r.end),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Option
// ═══════════════════════════════════════════════════════════════════════

/// Pattern of a named option (`--verbose=%bool`).
#[derive(Clone, PartialEq)]
pub struct OptionPattern {
    /// Option name
    pub name: Arc<str>,
    /// Pattern of the option's value
    pub value: Pattern,
}

impl OptionPattern {
    pub(super) fn test(&self, ctx: &Context, value: &Value) -> bool {
        match value {
            Value::Option(o) => o.name == self.name && self.value.test(ctx, &o.value),
            _ => false,
        }
    }
}
