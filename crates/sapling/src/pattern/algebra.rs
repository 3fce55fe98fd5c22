//! Iterators of union, intersection, difference and optional patterns

use crate::context::Context;
use crate::iter::{BoxedIterator, ChainIterator, ElementsIterator, FilterIterator, IteratorConfiguration};
use crate::value::Value;

use super::Pattern;

fn plain_iterator(ctx: &Context, pattern: &Pattern) -> Option<BoxedIterator> {
    pattern.iterator(ctx, &IteratorConfiguration::default())
}

/// Cases in declaration order. A value accepted by several cases is yielded
/// once per case.
pub(super) fn union_iterator(ctx: &Context, cases: &[Pattern]) -> Option<BoxedIterator> {
    let iterators = cases
        .iter()
        .map(|c| plain_iterator(ctx, c))
        .collect::<Option<Vec<_>>>()?;
    Some(Box::new(ChainIterator::new(iterators)))
}

/// The first case, filtered by the others.
pub(super) fn intersection_iterator(ctx: &Context, cases: &[Pattern]) -> Option<BoxedIterator> {
    let (first, others) = cases.split_first()?;
    let inner = plain_iterator(ctx, first)?;
    let others = others.to_vec();
    let keep = move |ctx: &Context, v: &Value| others.iter().all(|p| p.test(ctx, v));
    Some(Box::new(FilterIterator::new(inner, Box::new(keep))))
}

/// The base, without what `removed` accepts.
pub(super) fn difference_iterator(
    ctx: &Context,
    base: &Pattern,
    removed: &Pattern,
) -> Option<BoxedIterator> {
    let inner = plain_iterator(ctx, base)?;
    let removed = removed.clone();
    let keep = move |ctx: &Context, v: &Value| !removed.test(ctx, v);
    Some(Box::new(FilterIterator::new(inner, Box::new(keep))))
}

/// Nil, then the inner pattern's members.
pub(super) fn optional_iterator(ctx: &Context, inner: &Pattern) -> Option<BoxedIterator> {
    let nil: BoxedIterator = Box::new(ElementsIterator::new(vec![Value::Nil]));
    Some(Box::new(ChainIterator::new(vec![nil, plain_iterator(ctx, inner)?])))
}
