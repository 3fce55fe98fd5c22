//! Iterators over values
//!
//! A [`ValueIterator`] yields `(key, value)` pairs: indices for sequences,
//! property names for objects and records, keys for dictionaries. Pattern
//! iterators yield the members of a pattern's language, keyed by position.

use std::collections::VecDeque;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::value::{IntRange, RuneRange, Value};

/// An iterator over `(key, value)` pairs.
pub trait ValueIterator: Send {
    /// Check whether another pair is available.
    fn has_next(&mut self, ctx: &Context) -> bool;

    /// Next pair.
    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)>;
}

/// Boxed iterator.
pub type BoxedIterator = Box<dyn ValueIterator>;

/// Key and value filters applied on top of an iterator.
#[derive(Clone, Default)]
pub struct IteratorConfiguration {
    /// Only pairs whose key is accepted are emitted
    pub key_filter: Option<Pattern>,
    /// Only pairs whose value is accepted are emitted
    pub value_filter: Option<Pattern>,
}

impl IteratorConfiguration {
    /// Configuration without filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key filter.
    pub fn with_key_filter(mut self, filter: Pattern) -> Self {
        self.key_filter = Some(filter);
        self
    }

    /// Set the value filter.
    pub fn with_value_filter(mut self, filter: Pattern) -> Self {
        self.value_filter = Some(filter);
        self
    }

    /// Wrap `it` in the filtering iterator matching the configuration.
    pub fn wrap(&self, it: BoxedIterator) -> BoxedIterator {
        match (&self.key_filter, &self.value_filter) {
            (None, None) => it,
            (Some(k), None) => Box::new(KeyFilteredIterator::new(it, k.clone())),
            (None, Some(v)) => Box::new(ValueFilteredIterator::new(it, v.clone())),
            (Some(k), Some(v)) => {
                Box::new(KeyValueFilteredIterator::new(it, k.clone(), v.clone()))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Basic iterators
// ═══════════════════════════════════════════════════════════════════════

/// Iterator without elements.
pub struct EmptyIterator;

impl ValueIterator for EmptyIterator {
    fn has_next(&mut self, _ctx: &Context) -> bool {
        false
    }

    fn next(&mut self, _ctx: &Context) -> Option<(Value, Value)> {
        None
    }
}

/// Iterator over a snapshot of elements, keyed by index.
pub struct ElementsIterator {
    elements: VecDeque<Value>,
    index: i64,
}

impl ElementsIterator {
    /// Create an iterator over `elements`.
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            elements: elements.into(),
            index: 0,
        }
    }
}

impl ValueIterator for ElementsIterator {
    fn has_next(&mut self, _ctx: &Context) -> bool {
        !self.elements.is_empty()
    }

    fn next(&mut self, _ctx: &Context) -> Option<(Value, Value)> {
        let value = self.elements.pop_front()?;
        let key = Value::Int(self.index);
        self.index += 1;
        Some((key, value))
    }
}

/// Iterator over a snapshot of `(key, value)` entries.
pub struct EntriesIterator {
    entries: VecDeque<(Value, Value)>,
}

impl EntriesIterator {
    /// Create an iterator over `entries`.
    pub fn new(entries: Vec<(Value, Value)>) -> Self {
        Self {
            entries: entries.into(),
        }
    }
}

impl ValueIterator for EntriesIterator {
    fn has_next(&mut self, _ctx: &Context) -> bool {
        !self.entries.is_empty()
    }

    fn next(&mut self, _ctx: &Context) -> Option<(Value, Value)> {
        self.entries.pop_front()
    }
}

/// Ascending iterator over an integer range.
pub struct IntRangeIterator {
    next: i64,
    end: i64,
    index: i64,
    exhausted: bool,
}

impl IntRangeIterator {
    /// Create an iterator over `range`.
    pub fn new(range: IntRange) -> Self {
        Self {
            next: range.start,
            end: range.end,
            index: 0,
            exhausted: range.is_empty(),
        }
    }
}

impl ValueIterator for IntRangeIterator {
    fn has_next(&mut self, _ctx: &Context) -> bool {
        !self.exhausted
    }

    fn next(&mut self, _ctx: &Context) -> Option<(Value, Value)> {
        if self.exhausted {
            return None;
        }
        let n = self.next;
        if n == self.end {
            self.exhausted = true;
        } else {
            self.next += 1;
        }
        let key = Value::Int(self.index);
        self.index += 1;
        Some((key, Value::Int(n)))
    }
}

/// Ascending iterator over a rune range.
pub struct RuneRangeIterator {
    next: Option<char>,
    end: char,
    index: i64,
}

impl RuneRangeIterator {
    /// Create an iterator over `range`.
    pub fn new(range: RuneRange) -> Self {
        Self {
            next: (range.start <= range.end).then_some(range.start),
            end: range.end,
            index: 0,
        }
    }
}

impl ValueIterator for RuneRangeIterator {
    fn has_next(&mut self, _ctx: &Context) -> bool {
        self.next.is_some()
    }

    fn next(&mut self, _ctx: &Context) -> Option<(Value, Value)> {
        let c = self.next?;
        // skip the surrogate gap
        self.next = if c == self.end {
            None
        } else {
            (c as u32 + 1..=self.end as u32).find_map(char::from_u32)
        };
        let key = Value::Int(self.index);
        self.index += 1;
        Some((key, Value::Rune(c)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Combinators
// ═══════════════════════════════════════════════════════════════════════

/// Concatenation of iterators, re-keyed by position. Duplicates are kept.
pub struct ChainIterator {
    iterators: VecDeque<BoxedIterator>,
    index: i64,
}

impl ChainIterator {
    /// Create the concatenation of `iterators`.
    pub fn new(iterators: Vec<BoxedIterator>) -> Self {
        Self {
            iterators: iterators.into(),
            index: 0,
        }
    }
}

impl ValueIterator for ChainIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        while let Some(first) = self.iterators.front_mut() {
            if first.has_next(ctx) {
                return true;
            }
            self.iterators.pop_front();
        }
        false
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        if !self.has_next(ctx) {
            return None;
        }
        let (_, value) = self.iterators.front_mut()?.next(ctx)?;
        let key = Value::Int(self.index);
        self.index += 1;
        Some((key, value))
    }
}

/// Predicate deciding which values a [`FilterIterator`] keeps.
pub type ValuePredicate = Box<dyn Fn(&Context, &Value) -> bool + Send>;

/// Iterator keeping the values accepted by a predicate, re-keyed by
/// position.
pub struct FilterIterator {
    inner: BoxedIterator,
    predicate: ValuePredicate,
    peeked: Option<Value>,
    index: i64,
}

impl FilterIterator {
    /// Create a filtering iterator.
    pub fn new(inner: BoxedIterator, predicate: ValuePredicate) -> Self {
        Self {
            inner,
            predicate,
            peeked: None,
            index: 0,
        }
    }
}

impl ValueIterator for FilterIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        while let Some((_, value)) = self.inner.next(ctx) {
            if (self.predicate)(ctx, &value) {
                self.peeked = Some(value);
                return true;
            }
        }
        false
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        if !self.has_next(ctx) {
            return None;
        }
        let value = self.peeked.take()?;
        let key = Value::Int(self.index);
        self.index += 1;
        Some((key, value))
    }
}

/// Builds a value from one element of each component; combinations it
/// rejects are skipped.
pub type CombinationBuilder = Box<dyn Fn(Vec<Value>) -> Option<Value> + Send>;

/// Cartesian product of the languages of several patterns.
///
/// The last component varies fastest. Exhausted components are restarted by
/// asking their pattern for a fresh iterator.
pub struct CartesianIterator {
    components: Vec<Pattern>,
    builder: CombinationBuilder,
    iterators: Vec<BoxedIterator>,
    current: Vec<Value>,
    pending: Option<Value>,
    started: bool,
    exhausted: bool,
    index: i64,
}

impl CartesianIterator {
    /// Create the product of `components`. Every component must be
    /// iterable.
    pub fn new(components: Vec<Pattern>, builder: CombinationBuilder) -> Self {
        Self {
            components,
            builder,
            iterators: Vec::new(),
            current: Vec::new(),
            pending: None,
            started: false,
            exhausted: false,
            index: 0,
        }
    }

    fn fresh(&self, ctx: &Context, i: usize) -> BoxedIterator {
        self.components[i]
            .iterator(ctx, &IteratorConfiguration::default())
            .unwrap_or_else(|| Box::new(EmptyIterator))
    }

    fn start(&mut self, ctx: &Context) {
        self.started = true;
        for i in 0..self.components.len() {
            let mut it = self.fresh(ctx, i);
            match it.next(ctx) {
                Some((_, v)) => {
                    self.current.push(v);
                    self.iterators.push(it);
                }
                None => {
                    self.exhausted = true;
                    return;
                }
            }
        }
        self.pending = (self.builder)(self.current.clone());
    }

    fn advance(&mut self, ctx: &Context) {
        let mut i = self.components.len();
        while i > 0 {
            i -= 1;
            if let Some((_, v)) = self.iterators[i].next(ctx) {
                self.current[i] = v;
                for j in i + 1..self.components.len() {
                    let mut it = self.fresh(ctx, j);
                    match it.next(ctx) {
                        Some((_, v)) => self.current[j] = v,
                        None => {
                            self.exhausted = true;
                            return;
                        }
                    }
                    self.iterators[j] = it;
                }
                self.pending = (self.builder)(self.current.clone());
                return;
            }
        }
        self.exhausted = true;
    }
}

impl ValueIterator for CartesianIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        if !self.started {
            self.start(ctx);
        }
        while self.pending.is_none() && !self.exhausted {
            self.advance(ctx);
        }
        self.pending.is_some()
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        if !self.has_next(ctx) {
            return None;
        }
        let value = self.pending.take()?;
        let key = Value::Int(self.index);
        self.index += 1;
        Some((key, value))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Key / value filters
// ═══════════════════════════════════════════════════════════════════════

fn peek_matching(
    ctx: &Context,
    inner: &mut BoxedIterator,
    peeked: &mut Option<(Value, Value)>,
    accept: impl Fn(&Value, &Value) -> bool,
) -> bool {
    if peeked.is_some() {
        return true;
    }
    while let Some((k, v)) = inner.next(ctx) {
        if accept(&k, &v) {
            *peeked = Some((k, v));
            return true;
        }
    }
    false
}

/// Emits the pairs whose key is accepted by a pattern.
pub struct KeyFilteredIterator {
    inner: BoxedIterator,
    filter: Pattern,
    peeked: Option<(Value, Value)>,
}

impl KeyFilteredIterator {
    /// Create the iterator.
    pub fn new(inner: BoxedIterator, filter: Pattern) -> Self {
        Self {
            inner,
            filter,
            peeked: None,
        }
    }
}

impl ValueIterator for KeyFilteredIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        let filter = &self.filter;
        peek_matching(ctx, &mut self.inner, &mut self.peeked, |k, _| {
            filter.test(ctx, k)
        })
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        if !self.has_next(ctx) {
            return None;
        }
        self.peeked.take()
    }
}

/// Emits the pairs whose value is accepted by a pattern.
pub struct ValueFilteredIterator {
    inner: BoxedIterator,
    filter: Pattern,
    peeked: Option<(Value, Value)>,
}

impl ValueFilteredIterator {
    /// Create the iterator.
    pub fn new(inner: BoxedIterator, filter: Pattern) -> Self {
        Self {
            inner,
            filter,
            peeked: None,
        }
    }
}

impl ValueIterator for ValueFilteredIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        let filter = &self.filter;
        peek_matching(ctx, &mut self.inner, &mut self.peeked, |_, v| {
            filter.test(ctx, v)
        })
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        if !self.has_next(ctx) {
            return None;
        }
        self.peeked.take()
    }
}

/// Emits the pairs whose key and value are both accepted.
pub struct KeyValueFilteredIterator {
    inner: BoxedIterator,
    key_filter: Pattern,
    value_filter: Pattern,
    peeked: Option<(Value, Value)>,
}

impl KeyValueFilteredIterator {
    /// Create the iterator.
    pub fn new(inner: BoxedIterator, key_filter: Pattern, value_filter: Pattern) -> Self {
        Self {
            inner,
            key_filter,
            value_filter,
            peeked: None,
        }
    }
}

impl ValueIterator for KeyValueFilteredIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        let (kf, vf) = (&self.key_filter, &self.value_filter);
        peek_matching(ctx, &mut self.inner, &mut self.peeked, |k, v| {
            kf.test(ctx, k) && vf.test(ctx, v)
        })
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        if !self.has_next(ctx) {
            return None;
        }
        self.peeked.take()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Iterable values
// ═══════════════════════════════════════════════════════════════════════

impl Value {
    /// Iterator over the value's elements, filtered by `config`.
    pub fn iterator(&self, ctx: &Context, config: &IteratorConfiguration) -> Result<BoxedIterator> {
        let it: BoxedIterator = match self {
            Value::List(l) => Box::new(ElementsIterator::new(l.elements())),
            Value::Tuple(t) => Box::new(ElementsIterator::new(t.elements().to_vec())),
            Value::KeyList(k) => Box::new(ElementsIterator::new(
                k.keys.iter().map(|key| Value::Str(key.clone())).collect(),
            )),
            Value::Object(o) => Box::new(EntriesIterator::new(
                o.entries()
                    .into_iter()
                    .map(|(k, v)| (Value::Str(k), v))
                    .collect(),
            )),
            Value::Record(r) => Box::new(EntriesIterator::new(
                r.iter().map(|(k, v)| (Value::Str(k.clone()), v.clone())).collect(),
            )),
            Value::Dictionary(d) => Box::new(EntriesIterator::new(d.entries())),
            Value::IntRange(r) => Box::new(IntRangeIterator::new(*r)),
            Value::RuneRange(r) => Box::new(RuneRangeIterator::new(*r)),
            Value::RuneSlice(s) => Box::new(ElementsIterator::new(
                s.runes().into_iter().map(Value::Rune).collect(),
            )),
            Value::ByteSlice(s) => Box::new(ElementsIterator::new(
                s.bytes().into_iter().map(Value::Byte).collect(),
            )),
            Value::Str(s) => Box::new(ElementsIterator::new(s.chars().map(Value::Rune).collect())),
            Value::Pattern(p) => match p.iterator(ctx, &IteratorConfiguration::default()) {
                Some(it) => it,
                None => return Err(RuntimeError::type_error("iterable pattern", self)),
            },
            other => return Err(RuntimeError::type_error("iterable", other)),
        };
        Ok(config.wrap(it))
    }
}

/// Check whether at least one element of `iterable` matches `pattern`.
pub fn some(ctx: &Context, iterable: &Value, pattern: &Pattern) -> Result<bool> {
    let mut it = iterable.iterator(ctx, &IteratorConfiguration::default())?;
    while let Some((_, v)) = it.next(ctx) {
        if pattern.test(ctx, &v) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check whether every element of `iterable` matches `pattern`.
pub fn all(ctx: &Context, iterable: &Value, pattern: &Pattern) -> Result<bool> {
    let mut it = iterable.iterator(ctx, &IteratorConfiguration::default())?;
    while let Some((_, v)) = it.next(ctx) {
        if !pattern.test(ctx, &v) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Collect the remaining values of an iterator.
pub fn collect_values(ctx: &Context, it: &mut dyn ValueIterator) -> Vec<Value> {
    let mut values = Vec::new();
    while let Some((_, v)) = it.next(ctx) {
        values.push(v);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_int_range_iterator_is_inclusive() {
        let ctx = ctx();
        let mut it = IntRangeIterator::new(IntRange::new(1, 3));
        assert_eq!(
            collect_values(&ctx, &mut it),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        assert!(!it.has_next(&ctx));
    }

    #[test]
    fn test_key_filter_peeks_once() {
        let ctx = ctx();
        let list = Value::int_list(vec![10, 20, 30]);
        let config = IteratorConfiguration::new().with_key_filter(Pattern::exact(Value::Int(1)));
        let mut it = list.iterator(&ctx, &config).unwrap();
        assert!(it.has_next(&ctx));
        assert!(it.has_next(&ctx));
        assert_eq!(it.next(&ctx), Some((Value::Int(1), Value::Int(20))));
        assert!(!it.has_next(&ctx));
    }

    #[test]
    fn test_key_value_filter() {
        let ctx = ctx();
        let obj = Value::object(vec![("a", Value::Int(1)), ("b", Value::string("x"))]);
        let config = IteratorConfiguration::new()
            .with_key_filter(Pattern::str())
            .with_value_filter(Pattern::int());
        let mut it = obj.iterator(&ctx, &config).unwrap();
        assert_eq!(
            it.next(&ctx),
            Some((Value::string("a"), Value::Int(1)))
        );
        assert_eq!(it.next(&ctx), None);
    }

    #[test]
    fn test_some_requires_a_match() {
        let ctx = ctx();
        let empty = Value::list(vec![]);
        assert!(!some(&ctx, &empty, &Pattern::int()).unwrap());
        assert!(all(&ctx, &empty, &Pattern::int()).unwrap());

        let mixed = Value::list(vec![Value::Bool(true), Value::Int(1)]);
        assert!(some(&ctx, &mixed, &Pattern::int()).unwrap());
        assert!(!all(&ctx, &mixed, &Pattern::int()).unwrap());
    }

    #[test]
    fn test_not_iterable() {
        let ctx = ctx();
        assert!(Value::Int(3)
            .iterator(&ctx, &IteratorConfiguration::default())
            .is_err());
    }
}
