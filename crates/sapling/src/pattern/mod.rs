//! Patterns
//!
//! A [`Pattern`] is a first-class value that tests other values. Patterns
//! are a tagged variant ([`PatternKind`]) sharing four operations:
//!
//! - [`Pattern::test`]: total and pure, a failed test is just `false`
//! - [`Pattern::iterator`]: members of the pattern's language, when they can
//!   be enumerated in a deterministic order
//! - [`Pattern::string_pattern`]: the string pattern witnessed, if any
//! - [`Pattern::call`]: builds a refined pattern (`int(0..10)`)

mod algebra;
mod composite;
mod constraint;
mod function;
mod markup;
mod migration;
mod namespace;
mod path;
mod reactive;
mod string;
mod types;

pub use composite::{EntryPattern, ObjectPattern, OptionPattern, RecordPattern, SequencePattern};
pub use constraint::{ComplexPropertyConstraint, ConstraintEvaluator, SelfExprEvaluator};
pub use function::FunctionPattern;
pub use markup::{MarkupPattern, MarkupPatternElement, MarkupPatternNode, Quantifier};
pub use migration::{
    migration_operations, validate_pseudo_path, MigrationContext, MigrationOp, MigrationOpKind,
    SubtypeEquivalence,
};
pub use namespace::PatternNamespace;
pub use path::NamedSegmentPathPattern;
pub use reactive::MutationPattern;
pub use string::{RegexPattern, RepeatedStringPattern, SequenceStringPattern, StringPattern};
pub use types::{builtin_type_names, TypePattern};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::iter::{BoxedIterator, ElementsIterator, IntRangeIterator, IteratorConfiguration};
use crate::value::{IntRange, TransientId, Value, WeakValue};
use crate::watch::MutationKind;

/// The variants of [`Pattern`].
#[derive(PartialEq)]
pub enum PatternKind {
    /// Accepts every value
    Any,
    /// Accepts the values of a built-in type
    Type(TypePattern),
    /// Accepts values equal to the given one
    Exact(Value),
    /// Object pattern
    Object(ObjectPattern),
    /// Record pattern
    Record(RecordPattern),
    /// List pattern
    List(SequencePattern),
    /// Tuple pattern
    Tuple(SequencePattern),
    /// Option pattern
    Option(OptionPattern),
    /// Accepts what any case accepts
    Union(Vec<Pattern>),
    /// Accepts what every case accepts
    Intersection(Vec<Pattern>),
    /// Accepts what `base` accepts and `removed` rejects
    Difference {
        /// Base pattern
        base: Pattern,
        /// Removed pattern
        removed: Pattern,
    },
    /// Accepts nil and what the inner pattern accepts
    Optional(Pattern),
    /// String pattern
    String(StringPattern),
    /// Integers of an inclusive range
    IntRange(IntRange),
    /// Function pattern
    Function(FunctionPattern),
    /// Events whose payload matches the inner pattern, if any
    Event(Option<Pattern>),
    /// Mutation pattern
    Mutation(MutationPattern),
    /// Path template with named segments (`/users/{:id}`)
    NamedSegmentPath(NamedSegmentPathPattern),
    /// Markup pattern
    Markup(MarkupPattern),
}

/// A pattern. Cloning a pattern shares it.
#[derive(Clone)]
pub struct Pattern(Arc<PatternKind>);

impl Pattern {
    /// Wrap a pattern variant.
    pub fn new(kind: PatternKind) -> Pattern {
        Pattern(Arc::new(kind))
    }

    /// The variant.
    pub fn kind(&self) -> &PatternKind {
        &self.0
    }

    /// Name of the variant (`object`, `list`, `union`...).
    pub fn kind_name(&self) -> &'static str {
        match self.kind() {
            PatternKind::Any => "any",
            PatternKind::Type(_) => "type",
            PatternKind::Exact(_) => "exact-value",
            PatternKind::Object(_) => "object",
            PatternKind::Record(_) => "record",
            PatternKind::List(_) => "list",
            PatternKind::Tuple(_) => "tuple",
            PatternKind::Option(_) => "option",
            PatternKind::Union(_) => "union",
            PatternKind::Intersection(_) => "intersection",
            PatternKind::Difference { .. } => "difference",
            PatternKind::Optional(_) => "optional",
            PatternKind::String(_) => "string",
            PatternKind::IntRange(_) => "int-range",
            PatternKind::Function(_) => "function",
            PatternKind::Event(_) => "event",
            PatternKind::Mutation(_) => "mutation",
            PatternKind::NamedSegmentPath(_) => "named-segment-path",
            PatternKind::Markup(_) => "markup",
        }
    }

    /// Identity of the pattern.
    pub fn transient_id(&self) -> Option<TransientId> {
        Some(TransientId::of(&self.0))
    }

    /// Non-owning handle on the pattern.
    pub fn downgrade(&self) -> WeakValue {
        WeakValue::of(&self.0)
    }

    /// Check whether a value holding this pattern can be cloned. Built-in
    /// type patterns are process-wide singletons and cannot.
    pub fn is_clonable(&self) -> bool {
        !matches!(self.kind(), PatternKind::Type(_))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Constructors
    // ═══════════════════════════════════════════════════════════════════

    /// Pattern accepting every value.
    pub fn any() -> Pattern {
        Pattern::new(PatternKind::Any)
    }

    /// Built-in type pattern by name (`int`, `str`, `obj`...).
    pub fn named_type(name: &str) -> Option<Pattern> {
        types::builtin(name)
    }

    /// The `int` type pattern.
    pub fn int() -> Pattern {
        types::builtin_or_any("int")
    }

    /// The `float` type pattern.
    pub fn float() -> Pattern {
        types::builtin_or_any("float")
    }

    /// The `bool` type pattern.
    pub fn bool() -> Pattern {
        types::builtin_or_any("bool")
    }

    /// The `str` type pattern (every string-like value).
    pub fn str() -> Pattern {
        types::builtin_or_any("str")
    }

    /// Pattern accepting values equal to `value`.
    pub fn exact(value: Value) -> Pattern {
        Pattern::new(PatternKind::Exact(value))
    }

    /// Pattern accepting the integers of an inclusive range.
    pub fn int_range(range: IntRange) -> Pattern {
        Pattern::new(PatternKind::IntRange(range))
    }

    /// Object pattern.
    pub fn object(pattern: ObjectPattern) -> Pattern {
        Pattern::new(PatternKind::Object(pattern))
    }

    /// Record pattern.
    pub fn record(pattern: RecordPattern) -> Pattern {
        Pattern::new(PatternKind::Record(pattern))
    }

    /// List pattern with one pattern per position.
    pub fn list(elements: Vec<Pattern>) -> Pattern {
        Pattern::new(PatternKind::List(SequencePattern::Positional(elements)))
    }

    /// List pattern whose elements all match `element`.
    pub fn list_of(element: Pattern) -> Pattern {
        Pattern::new(PatternKind::List(SequencePattern::general(element)))
    }

    /// Tuple pattern with one pattern per position.
    pub fn tuple(elements: Vec<Pattern>) -> Pattern {
        Pattern::new(PatternKind::Tuple(SequencePattern::Positional(elements)))
    }

    /// Tuple pattern whose elements all match `element`.
    pub fn tuple_of(element: Pattern) -> Pattern {
        Pattern::new(PatternKind::Tuple(SequencePattern::general(element)))
    }

    /// Option pattern.
    pub fn option(name: &str, value: Pattern) -> Pattern {
        Pattern::new(PatternKind::Option(OptionPattern {
            name: Arc::from(name),
            value,
        }))
    }

    /// String pattern.
    pub fn string(pattern: StringPattern) -> Pattern {
        Pattern::new(PatternKind::String(pattern))
    }

    /// Function pattern.
    pub fn function(pattern: FunctionPattern) -> Pattern {
        Pattern::new(PatternKind::Function(pattern))
    }

    /// Event pattern; `None` accepts every event.
    pub fn event(payload: Option<Pattern>) -> Pattern {
        Pattern::new(PatternKind::Event(payload))
    }

    /// Mutation pattern.
    pub fn mutation(kind: MutationKind, data: Option<Pattern>) -> Pattern {
        Pattern::new(PatternKind::Mutation(MutationPattern { kind, data }))
    }

    /// Path pattern with named segments (`/home/{:username}`).
    pub fn named_segment_path(template: &str) -> Result<Pattern> {
        let pattern = NamedSegmentPathPattern::parse(template)?;
        Ok(Pattern::new(PatternKind::NamedSegmentPath(pattern)))
    }

    /// Markup pattern.
    pub fn markup(pattern: MarkupPattern) -> Pattern {
        Pattern::new(PatternKind::Markup(pattern))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Operations
    // ═══════════════════════════════════════════════════════════════════

    /// Test a value against the pattern.
    pub fn test(&self, ctx: &Context, value: &Value) -> bool {
        match self.kind() {
            PatternKind::Any => true,
            PatternKind::Type(t) => t.test(value),
            PatternKind::Exact(expected) => expected == value,
            PatternKind::Object(p) => p.test(ctx, value),
            PatternKind::Record(p) => p.test(ctx, value),
            PatternKind::List(p) => match value {
                Value::List(l) => p.test_elements(ctx, &l.elements()),
                _ => false,
            },
            PatternKind::Tuple(p) => match value {
                Value::Tuple(t) => p.test_elements(ctx, t.elements()),
                _ => false,
            },
            PatternKind::Option(p) => p.test(ctx, value),
            PatternKind::Union(cases) => cases.iter().any(|c| c.test(ctx, value)),
            PatternKind::Intersection(cases) => cases.iter().all(|c| c.test(ctx, value)),
            PatternKind::Difference { base, removed } => {
                base.test(ctx, value) && !removed.test(ctx, value)
            }
            PatternKind::Optional(inner) => value.is_nil() || inner.test(ctx, value),
            PatternKind::String(p) => p.test(ctx, value),
            PatternKind::IntRange(r) => matches!(value, Value::Int(n) if r.contains(*n)),
            PatternKind::Function(p) => p.test(value),
            PatternKind::Event(payload) => match value {
                Value::Event(e) => payload.as_ref().map_or(true, |p| p.test(ctx, &e.value)),
                _ => false,
            },
            PatternKind::Mutation(p) => p.test(ctx, value),
            PatternKind::NamedSegmentPath(p) => p.test(value),
            PatternKind::Markup(p) => p.test(ctx, value),
        }
    }

    /// Iterator over the members of the pattern's language, filtered by
    /// `config`. `None` when the language cannot be enumerated.
    pub fn iterator(&self, ctx: &Context, config: &IteratorConfiguration) -> Option<BoxedIterator> {
        let it: BoxedIterator = match self.kind() {
            PatternKind::Exact(v) => Box::new(ElementsIterator::new(vec![v.clone()])),
            PatternKind::IntRange(r) => Box::new(IntRangeIterator::new(*r)),
            PatternKind::Object(p) => p.iterator(ctx)?,
            PatternKind::Record(p) => p.iterator(ctx)?,
            PatternKind::List(p) => p.iterator(ctx, composite::SequenceKind::List)?,
            PatternKind::Tuple(p) => p.iterator(ctx, composite::SequenceKind::Tuple)?,
            PatternKind::Union(cases) => algebra::union_iterator(ctx, cases)?,
            PatternKind::Intersection(cases) => algebra::intersection_iterator(ctx, cases)?,
            PatternKind::Difference { base, removed } => {
                algebra::difference_iterator(ctx, base, removed)?
            }
            PatternKind::Optional(inner) => algebra::optional_iterator(ctx, inner)?,
            PatternKind::String(p) => p.iterator(ctx)?,
            _ => return None,
        };
        Some(config.wrap(it))
    }

    /// The string pattern this pattern witnesses, if any.
    pub fn string_pattern(&self) -> Option<StringPattern> {
        match self.kind() {
            PatternKind::String(p) => Some(p.clone()),
            PatternKind::Exact(Value::Str(s)) => Some(StringPattern::Exact(s.clone())),
            PatternKind::Union(cases) => cases
                .iter()
                .map(Pattern::string_pattern)
                .collect::<Option<Vec<_>>>()
                .map(StringPattern::Union),
            _ => None,
        }
    }

    /// Build a refined pattern from arguments (`int(0..10)`, `list(int)`).
    pub fn call(&self, args: &[Value]) -> Result<Pattern> {
        match self.kind() {
            PatternKind::Type(t) => t.call(args),
            _ => Err(RuntimeError::PatternNotCallable),
        }
    }

    /// Named groups of a match: path segments for named-segment path
    /// patterns, named elements for sequence string patterns. The whole
    /// match is stored under `0`.
    pub fn match_groups(&self, ctx: &Context, value: &Value) -> Option<IndexMap<Arc<str>, Value>> {
        match self.kind() {
            PatternKind::NamedSegmentPath(p) => p.match_groups(value),
            PatternKind::String(StringPattern::Sequence(p)) => p.match_groups(ctx, value),
            _ => None,
        }
    }

    /// Union of `cases`. Members present in several cases are iterated once
    /// per case.
    pub fn union(cases: Vec<Pattern>) -> Pattern {
        Pattern::new(PatternKind::Union(cases))
    }

    /// Intersection of `cases`.
    pub fn intersection(cases: Vec<Pattern>) -> Pattern {
        Pattern::new(PatternKind::Intersection(cases))
    }

    /// Values accepted by `base` and rejected by `removed`.
    pub fn difference(base: Pattern, removed: Pattern) -> Pattern {
        Pattern::new(PatternKind::Difference { base, removed })
    }

    /// Nil or what `inner` accepts. `inner` must not accept nil.
    pub fn optional(ctx: &Context, inner: Pattern) -> Result<Pattern> {
        if inner.test(ctx, &Value::Nil) {
            return Err(RuntimeError::InvalidArgument(format!(
                "{:?} already accepts nil, it cannot be made optional",
                inner
            )));
        }
        Ok(Pattern::new(PatternKind::Optional(inner)))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Pattern], sep: &str) -> fmt::Result {
    for (i, p) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{:?}", p)?;
    }
    Ok(())
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PatternKind::Any => write!(f, "%any"),
            PatternKind::Type(t) => write!(f, "%{}", t.name()),
            PatternKind::Exact(v) => write!(f, "%({:?})", v),
            PatternKind::Object(p) => write!(f, "{:?}", p),
            PatternKind::Record(p) => write!(f, "{:?}", p),
            PatternKind::List(p) => write!(f, "%{:?}", p),
            PatternKind::Tuple(p) => write!(f, "%#{:?}", p),
            PatternKind::Option(p) => write!(f, "%--{}={:?}", p.name, p.value),
            PatternKind::Union(cases) => {
                write!(f, "(| ")?;
                write_list(f, cases, " | ")?;
                write!(f, ")")
            }
            PatternKind::Intersection(cases) => {
                write!(f, "(& ")?;
                write_list(f, cases, " & ")?;
                write!(f, ")")
            }
            PatternKind::Difference { base, removed } => write!(f, "({:?} \\ {:?})", base, removed),
            PatternKind::Optional(inner) => write!(f, "{:?}?", inner),
            PatternKind::String(p) => write!(f, "{:?}", p),
            PatternKind::IntRange(r) => write!(f, "%int({}..{})", r.start, r.end),
            PatternKind::Function(p) => write!(f, "{:?}", p),
            PatternKind::Event(None) => write!(f, "%event"),
            PatternKind::Event(Some(p)) => write!(f, "%event({:?})", p),
            PatternKind::Mutation(p) => write!(f, "{:?}", p),
            PatternKind::NamedSegmentPath(p) => write!(f, "%{}", p.template()),
            PatternKind::Markup(p) => write!(f, "{:?}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::iter::collect_values;
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_algebra() {
        let ctx = ctx();
        let union = Pattern::union(vec![Pattern::int(), Pattern::str()]);
        assert!(union.test(&ctx, &Value::Int(7)));
        assert!(!union.test(&ctx, &Value::Bool(true)));

        let inter = Pattern::intersection(vec![Pattern::int(), Pattern::int_range(IntRange::new(0, 10))]);
        assert!(inter.test(&ctx, &Value::Int(5)));
        assert!(!inter.test(&ctx, &Value::Int(11)));

        let diff = Pattern::difference(Pattern::int(), Pattern::exact(Value::Int(0)));
        assert!(!diff.test(&ctx, &Value::Int(0)));
        assert!(diff.test(&ctx, &Value::Int(1)));

        let opt = Pattern::optional(&ctx, Pattern::int()).unwrap();
        assert!(opt.test(&ctx, &Value::Nil));
        assert!(Pattern::optional(&ctx, opt).is_err());
    }

    #[test]
    fn test_union_iteration_keeps_duplicates() {
        let ctx = ctx();
        let union = Pattern::union(vec![
            Pattern::int_range(IntRange::new(1, 2)),
            Pattern::int_range(IntRange::new(2, 3)),
        ]);
        let mut it = union.iterator(&ctx, &IteratorConfiguration::default()).unwrap();
        assert_eq!(
            collect_values(&ctx, it.as_mut()),
            vec![Value::Int(1), Value::Int(2), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn test_optional_iterates_nil_first() {
        let ctx = ctx();
        let opt = Pattern::optional(&ctx, Pattern::exact(Value::Int(4))).unwrap();
        let mut it = opt.iterator(&ctx, &IteratorConfiguration::default()).unwrap();
        assert_eq!(collect_values(&ctx, it.as_mut()), vec![Value::Nil, Value::Int(4)]);
    }

    #[test]
    fn test_difference_and_intersection_filter_first_case() {
        let ctx = ctx();
        let range = Pattern::int_range(IntRange::new(0, 4));
        let diff = Pattern::difference(range.clone(), Pattern::exact(Value::Int(2)));
        let mut it = diff.iterator(&ctx, &IteratorConfiguration::default()).unwrap();
        assert_eq!(
            collect_values(&ctx, it.as_mut()),
            vec![Value::Int(0), Value::Int(1), Value::Int(3), Value::Int(4)]
        );

        let inter = Pattern::intersection(vec![range, Pattern::int_range(IntRange::new(3, 9))]);
        let mut it = inter.iterator(&ctx, &IteratorConfiguration::default()).unwrap();
        assert_eq!(collect_values(&ctx, it.as_mut()), vec![Value::Int(3), Value::Int(4)]);
    }

    #[test]
    fn test_call() {
        let ctx = ctx();
        let small = Pattern::int().call(&[Value::IntRange(IntRange::new(0, 9))]).unwrap();
        assert!(small.test(&ctx, &Value::Int(9)));
        assert!(!small.test(&ctx, &Value::Int(10)));
        assert!(matches!(
            Pattern::any().call(&[]),
            Err(RuntimeError::PatternNotCallable)
        ));
    }

    #[test]
    fn test_string_pattern_witness() {
        let union = Pattern::union(vec![
            Pattern::exact(Value::string("a")),
            Pattern::exact(Value::string("b")),
        ]);
        assert!(union.string_pattern().is_some());
        assert!(Pattern::int().string_pattern().is_none());
    }

    #[test]
    fn test_type_patterns_are_not_clonable() {
        assert!(!Pattern::int().is_clonable());
        assert!(Pattern::exact(Value::Int(1)).is_clonable());
        assert!(matches!(
            Value::Pattern(Pattern::int()).deep_clone(),
            Err(RuntimeError::NotClonable)
        ));
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(Pattern::list_of(Pattern::int()), Pattern::list_of(Pattern::int()));
        assert!(Pattern::list_of(Pattern::int()) != Pattern::list_of(Pattern::str()));
    }
}
