//! String patterns
//!
//! String patterns describe regular languages over strings. Matching is a
//! backtracking search: every element reports the set of positions where a
//! match starting at a given position can end, and sequences fold those sets
//! element by element.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::iter::{BoxedIterator, CartesianIterator, ChainIterator, ElementsIterator};
use crate::iter::{IntRangeIterator, RuneRangeIterator, ValueIterator};
use crate::value::{IntRange, Record, RuneRange, Value};

use super::Pattern;

const UNBOUNDED: i64 = i64::MAX;

/// A regex string pattern; always matched against the whole string.
#[derive(Clone)]
pub struct RegexPattern {
    source: Arc<str>,
    anchored: Regex,
}

impl RegexPattern {
    /// Compile a regex pattern.
    pub fn new(source: &str) -> Result<Self> {
        let anchored = Regex::new(&format!("^(?:{source})$"))
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid regex {source:?}: {e}")))?;
        Ok(Self {
            source: Arc::from(source),
            anchored,
        })
    }

    /// Source of the regex.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Concatenation of string patterns; elements may be named.
#[derive(Clone, PartialEq)]
pub struct SequenceStringPattern {
    elements: Vec<(Option<Arc<str>>, StringPattern)>,
}

impl SequenceStringPattern {
    /// Elements with their optional names.
    pub fn elements(&self) -> &[(Option<Arc<str>>, StringPattern)] {
        &self.elements
    }

    /// Split `s` into one segment per element, as byte ranges.
    fn split(&self, ctx: &Context, s: &str) -> Option<Vec<(usize, usize)>> {
        fn go(
            ctx: &Context,
            elements: &[(Option<Arc<str>>, StringPattern)],
            s: &str,
            start: usize,
            out: &mut Vec<(usize, usize)>,
        ) -> bool {
            let Some(((_, first), rest)) = elements.split_first() else {
                return start == s.len();
            };
            for end in first.ends(ctx, s, start).into_iter().rev() {
                out.push((start, end));
                if go(ctx, rest, s, end, out) {
                    return true;
                }
                out.pop();
            }
            false
        }
        let mut out = Vec::with_capacity(self.elements.len());
        go(ctx, &self.elements, s, 0, &mut out).then_some(out)
    }

    pub(super) fn match_groups(&self, ctx: &Context, value: &Value) -> Option<IndexMap<Arc<str>, Value>> {
        let s = value.to_string_content()?;
        let segments = self.split(ctx, &s)?;
        let mut groups = IndexMap::new();
        groups.insert(Arc::from("0"), Value::string(&s));
        for ((name, _), (start, end)) in self.elements.iter().zip(segments) {
            if let Some(name) = name {
                groups.insert(name.clone(), Value::string(&s[start..end]));
            }
        }
        Some(groups)
    }
}

/// Repetition of a string pattern.
#[derive(Clone, PartialEq)]
pub struct RepeatedStringPattern {
    element: Box<StringPattern>,
    min: usize,
    max: Option<usize>,
}

/// A pattern matching strings.
#[derive(Clone, PartialEq)]
pub enum StringPattern {
    /// One exact string
    Exact(Arc<str>),
    /// Regex
    Regex(RegexPattern),
    /// Concatenation
    Sequence(SequenceStringPattern),
    /// Any of the cases
    Union(Vec<StringPattern>),
    /// A single rune of the range
    RuneRange(RuneRange),
    /// Decimal representation of an integer of the range
    IntRange(IntRange),
    /// Repetition
    Repeated(RepeatedStringPattern),
    /// Named pattern resolved in the context at match time
    Dynamic(Arc<str>),
}

impl StringPattern {
    /// Pattern matching exactly `s`.
    pub fn exact(s: &str) -> Self {
        StringPattern::Exact(Arc::from(s))
    }

    /// Regex pattern.
    pub fn regex(source: &str) -> Result<Self> {
        Ok(StringPattern::Regex(RegexPattern::new(source)?))
    }

    /// Sequence of optionally named elements.
    pub fn sequence(elements: Vec<(Option<&str>, StringPattern)>) -> Self {
        StringPattern::Sequence(SequenceStringPattern {
            elements: elements
                .into_iter()
                .map(|(name, p)| (name.map(Arc::from), p))
                .collect(),
        })
    }

    /// `element` repeated between `min` and `max` times (`None`: unbounded).
    pub fn repeated(element: StringPattern, min: usize, max: Option<usize>) -> Self {
        StringPattern::Repeated(RepeatedStringPattern {
            element: Box::new(element),
            min,
            max,
        })
    }

    /// Named pattern looked up in the context when matching.
    pub fn dynamic(name: &str) -> Self {
        StringPattern::Dynamic(Arc::from(name))
    }

    fn resolve(ctx: &Context, name: &str) -> Option<StringPattern> {
        ctx.resolve_named_pattern(name)?.string_pattern()
    }

    /// Byte positions where a match of `self` starting at `start` may end,
    /// in ascending order.
    fn ends(&self, ctx: &Context, s: &str, start: usize) -> Vec<usize> {
        let rest = &s[start..];
        let mut ends = match self {
            StringPattern::Exact(x) => {
                if rest.starts_with(&**x) {
                    vec![start + x.len()]
                } else {
                    vec![]
                }
            }
            StringPattern::Regex(r) => boundaries(rest)
                .filter(|&e| r.anchored.is_match(&rest[..e]))
                .map(|e| start + e)
                .collect(),
            StringPattern::RuneRange(r) => match rest.chars().next() {
                Some(c) if r.contains(c) => vec![start + c.len_utf8()],
                _ => vec![],
            },
            StringPattern::IntRange(r) => int_ends(rest, *r).map(|e| start + e).collect(),
            StringPattern::Union(cases) => cases
                .iter()
                .flat_map(|c| c.ends(ctx, s, start))
                .collect(),
            StringPattern::Sequence(seq) => {
                let mut positions = vec![start];
                for (_, element) in &seq.elements {
                    let mut next: Vec<usize> = positions
                        .iter()
                        .flat_map(|&p| element.ends(ctx, s, p))
                        .collect();
                    next.sort_unstable();
                    next.dedup();
                    positions = next;
                    if positions.is_empty() {
                        break;
                    }
                }
                positions
            }
            StringPattern::Repeated(rep) => {
                let mut result = Vec::new();
                let mut positions = vec![start];
                if rep.min == 0 {
                    result.push(start);
                }
                let limit = rep.max.unwrap_or(usize::MAX);
                let mut count = 0;
                while count < limit && !positions.is_empty() {
                    count += 1;
                    let mut next: Vec<usize> = positions
                        .iter()
                        .flat_map(|&p| rep.element.ends(ctx, s, p))
                        .collect();
                    next.sort_unstable();
                    next.dedup();
                    if next == positions {
                        // fixpoint
                        if count >= rep.min {
                            result.extend(&next);
                        }
                        break;
                    }
                    if count >= rep.min {
                        result.extend(&next);
                    }
                    if count > s.len() + rep.min {
                        break;
                    }
                    positions = next;
                }
                result
            }
            StringPattern::Dynamic(name) => match Self::resolve(ctx, name) {
                Some(p) => p.ends(ctx, s, start),
                None => vec![],
            },
        };
        ends.sort_unstable();
        ends.dedup();
        ends
    }

    /// Check whether the whole string matches.
    pub fn test_str(&self, ctx: &Context, s: &str) -> bool {
        self.ends(ctx, s, 0).contains(&s.len())
    }

    pub(super) fn test(&self, ctx: &Context, value: &Value) -> bool {
        match value.to_string_content() {
            Some(s) => self.test_str(ctx, &s),
            None => false,
        }
    }

    /// A regex accepting the same language, when one can be built.
    pub fn regex_source(&self) -> Option<String> {
        match self {
            StringPattern::Exact(x) => Some(regex::escape(x)),
            StringPattern::Regex(r) => Some(r.source.to_string()),
            StringPattern::RuneRange(r) => Some(format!(
                "[\\x{{{:x}}}-\\x{{{:x}}}]",
                r.start as u32, r.end as u32
            )),
            StringPattern::Sequence(seq) => seq
                .elements
                .iter()
                .map(|(_, e)| e.regex_source().map(|r| format!("(?:{r})")))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.concat()),
            StringPattern::Union(cases) => cases
                .iter()
                .map(|c| c.regex_source().map(|r| format!("(?:{r})")))
                .collect::<Option<Vec<_>>>()
                .map(|parts| parts.join("|")),
            StringPattern::Repeated(rep) => {
                let inner = rep.element.regex_source()?;
                Some(match rep.max {
                    Some(max) => format!("(?:{inner}){{{},{}}}", rep.min, max),
                    None => format!("(?:{inner}){{{},}}", rep.min),
                })
            }
            StringPattern::IntRange(_) | StringPattern::Dynamic(_) => None,
        }
    }

    /// The regex witness, compiled.
    pub fn regex_witness(&self) -> Option<RegexPattern> {
        RegexPattern::new(&self.regex_source()?).ok()
    }

    fn length_range_with(&self, ctx: Option<&Context>) -> IntRange {
        match self {
            StringPattern::Exact(x) => {
                let n = x.chars().count() as i64;
                IntRange::new(n, n)
            }
            StringPattern::Regex(_) => IntRange::new(0, UNBOUNDED),
            StringPattern::RuneRange(_) => IntRange::new(1, 1),
            StringPattern::IntRange(r) => {
                let digits = |n: i64| n.to_string().len() as i64;
                IntRange::new(1, digits(r.start).max(digits(r.end)))
            }
            StringPattern::Sequence(seq) => {
                seq.elements
                    .iter()
                    .fold(IntRange::new(0, 0), |acc, (_, e)| {
                        let r = e.length_range_with(ctx);
                        IntRange::new(acc.start.saturating_add(r.start), acc.end.saturating_add(r.end))
                    })
            }
            StringPattern::Union(cases) => {
                let ranges: Vec<IntRange> = cases.iter().map(|c| c.length_range_with(ctx)).collect();
                let min = ranges.iter().map(|r| r.start).min().unwrap_or(0);
                let max = ranges.iter().map(|r| r.end).max().unwrap_or(0);
                IntRange::new(min, max)
            }
            StringPattern::Repeated(rep) => {
                let r = rep.element.length_range_with(ctx);
                let max = match rep.max {
                    Some(max) => r.end.saturating_mul(max as i64),
                    None if r.end == 0 => 0,
                    None => UNBOUNDED,
                };
                IntRange::new(r.start.saturating_mul(rep.min as i64), max)
            }
            StringPattern::Dynamic(name) => match ctx.and_then(|ctx| Self::resolve(ctx, name)) {
                Some(p) => p.length_range_with(ctx),
                None => IntRange::new(0, UNBOUNDED),
            },
        }
    }

    /// Range of the lengths (in runes) of matching strings. Dynamic elements
    /// count as unbounded.
    pub fn length_range(&self) -> IntRange {
        self.length_range_with(None)
    }

    /// Like [`StringPattern::length_range`], resolving dynamic elements in
    /// `ctx`.
    pub fn effective_length_range(&self, ctx: &Context) -> IntRange {
        self.length_range_with(Some(ctx))
    }

    /// Parse a string. Sequences with named elements yield a record of the
    /// named segments, integer ranges an integer, everything else the string.
    pub fn parse(&self, ctx: &Context, s: &str) -> Result<Value> {
        let fail = |reason: &str| RuntimeError::ParseFailure {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        if !self.test_str(ctx, s) {
            return Err(fail(&format!("does not match {:?}", self)));
        }
        match self {
            StringPattern::IntRange(_) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| fail(&e.to_string())),
            StringPattern::Sequence(seq) if seq.elements.iter().any(|(n, _)| n.is_some()) => {
                let segments = seq.split(ctx, s).ok_or_else(|| fail("no split"))?;
                let entries: IndexMap<Arc<str>, Value> = seq
                    .elements
                    .iter()
                    .zip(segments)
                    .filter_map(|((name, _), (a, b))| {
                        name.clone().map(|n| (n, Value::string(&s[a..b])))
                    })
                    .collect();
                Ok(Value::Record(Arc::new(Record::new(entries)?)))
            }
            _ => Ok(Value::string(s)),
        }
    }

    /// Non-overlapping longest matches, scanning left to right.
    pub fn find_matches(&self, ctx: &Context, s: &str) -> Vec<Value> {
        let mut matches = Vec::new();
        let mut start = 0;
        while start < s.len() {
            match self.ends(ctx, s, start).into_iter().filter(|&e| e > start).max() {
                Some(end) => {
                    matches.push(Value::string(&s[start..end]));
                    start = end;
                }
                None => {
                    start += s[start..].chars().next().map_or(1, char::len_utf8);
                }
            }
        }
        matches
    }

    pub(super) fn iterator(&self, ctx: &Context) -> Option<BoxedIterator> {
        match self {
            StringPattern::Exact(x) => Some(Box::new(ElementsIterator::new(vec![Value::Str(
                x.clone(),
            )]))),
            StringPattern::RuneRange(r) => Some(Box::new(ToStringIterator(Box::new(
                RuneRangeIterator::new(*r),
            )))),
            StringPattern::IntRange(r) => Some(Box::new(ToStringIterator(Box::new(
                IntRangeIterator::new(*r),
            )))),
            StringPattern::Union(cases) => {
                let iterators = cases
                    .iter()
                    .map(|c| c.iterator(ctx))
                    .collect::<Option<Vec<_>>>()?;
                Some(Box::new(ChainIterator::new(iterators)))
            }
            StringPattern::Sequence(seq) => {
                for (_, e) in &seq.elements {
                    e.iterator(ctx)?;
                }
                let components = seq
                    .elements
                    .iter()
                    .map(|(_, e)| Pattern::string(e.clone()))
                    .collect();
                let concat = |parts: Vec<Value>| {
                    let mut s = String::new();
                    for part in &parts {
                        s.push_str(&part.to_string_content()?);
                    }
                    Some(Value::string(s))
                };
                Some(Box::new(CartesianIterator::new(components, Box::new(concat))))
            }
            StringPattern::Dynamic(name) => Self::resolve(ctx, name)?.iterator(ctx),
            StringPattern::Regex(_) | StringPattern::Repeated(_) => None,
        }
    }
}

/// Char boundaries of `s`, including its end.
fn boundaries(s: &str) -> impl Iterator<Item = usize> + '_ {
    s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len()))
}

/// Ends of decimal integers in `range` at the start of `s`.
fn int_ends(s: &str, range: IntRange) -> impl Iterator<Item = usize> + '_ {
    let sign = usize::from(s.starts_with('-'));
    let digits = s[sign..].bytes().take_while(u8::is_ascii_digit).count();
    (sign + 1..=sign + digits).filter(move |&e| s[..e].parse::<i64>().is_ok_and(|n| range.contains(n)))
}

struct ToStringIterator(BoxedIterator);

impl ValueIterator for ToStringIterator {
    fn has_next(&mut self, ctx: &Context) -> bool {
        self.0.has_next(ctx)
    }

    fn next(&mut self, ctx: &Context) -> Option<(Value, Value)> {
        let (key, value) = self.0.next(ctx)?;
        let s = match value {
            Value::Rune(c) => c.to_string(),
            Value::Int(n) => n.to_string(),
            other => other.to_string(),
        };
        Some((key, Value::string(s)))
    }
}

impl fmt::Debug for StringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringPattern::Exact(x) => write!(f, "{:?}", x.as_ref()),
            StringPattern::Regex(r) => write!(f, "%`{}`", r.source),
            StringPattern::Sequence(seq) => {
                write!(f, "%str(")?;
                for (i, (name, e)) in seq.elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    match name {
                        Some(name) => write!(f, "{name}:{:?}", e)?,
                        None => write!(f, "{:?}", e)?,
                    }
                }
                write!(f, ")")
            }
            StringPattern::Union(cases) => {
                write!(f, "(|")?;
                for case in cases {
                    write!(f, " {:?}", case)?;
                }
                write!(f, ")")
            }
            StringPattern::RuneRange(r) => write!(f, "'{}'..'{}'", r.start, r.end),
            StringPattern::IntRange(r) => write!(f, "%int-str({}..{})", r.start, r.end),
            StringPattern::Repeated(rep) => match rep.max {
                Some(max) => write!(f, "({:?}){{{},{}}}", rep.element, rep.min, max),
                None => write!(f, "({:?}){{{},}}", rep.element, rep.min),
            },
            StringPattern::Dynamic(name) => write!(f, "%{name}"),
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

    fn key_value() -> StringPattern {
        StringPattern::sequence(vec![
            (Some("key"), StringPattern::repeated(StringPattern::RuneRange(RuneRange::new('a', 'z')), 1, None)),
            (None, StringPattern::exact("=")),
            (Some("value"), StringPattern::IntRange(IntRange::new(0, 999))),
        ])
    }

    #[test]
    fn test_sequence_matching() {
        let ctx = ctx();
        let p = key_value();
        assert!(p.test_str(&ctx, "port=80"));
        assert!(!p.test_str(&ctx, "port=1000"));
        assert!(!p.test_str(&ctx, "=80"));
        assert!(!p.test_str(&ctx, "Port=80"));
    }

    #[test]
    fn test_parse_named_sequence() {
        let ctx = ctx();
        let parsed = key_value().parse(&ctx, "port=80").unwrap();
        let expected = Value::record(vec![("key", Value::string("port")), ("value", Value::string("80"))]).unwrap();
        assert_eq!(parsed, expected);
        assert!(matches!(
            key_value().parse(&ctx, "port"),
            Err(RuntimeError::ParseFailure { .. })
        ));
        assert_eq!(
            StringPattern::IntRange(IntRange::new(-5, 5)).parse(&ctx, "-3").unwrap(),
            Value::Int(-3)
        );
    }

    #[test]
    fn test_regex_is_anchored() {
        let ctx = ctx();
        let p = StringPattern::regex("[0-9]+").unwrap();
        assert!(p.test_str(&ctx, "123"));
        assert!(!p.test_str(&ctx, "a123"));
        assert!(StringPattern::regex("(").is_err());
    }

    #[test]
    fn test_find_matches() {
        let ctx = ctx();
        let p = StringPattern::repeated(StringPattern::RuneRange(RuneRange::new('0', '9')), 1, None);
        assert_eq!(
            p.find_matches(&ctx, "a12 b3"),
            vec![Value::string("12"), Value::string("3")]
        );
    }

    #[test]
    fn test_length_ranges() {
        let ctx = ctx();
        assert_eq!(StringPattern::exact("abc").length_range(), IntRange::new(3, 3));
        assert_eq!(key_value().length_range(), IntRange::new(3, UNBOUNDED));
        let bounded = StringPattern::repeated(StringPattern::exact("ab"), 1, Some(3));
        assert_eq!(bounded.length_range(), IntRange::new(2, 6));

        let dynamic = StringPattern::sequence(vec![
            (None, StringPattern::exact("#")),
            (None, StringPattern::dynamic("digit")),
        ]);
        assert_eq!(dynamic.length_range(), IntRange::new(1, UNBOUNDED));
        ctx.add_named_pattern(
            "digit",
            Pattern::string(StringPattern::RuneRange(RuneRange::new('0', '9'))),
        )
        .unwrap();
        assert_eq!(dynamic.effective_length_range(&ctx), IntRange::new(2, 2));
        assert!(dynamic.test_str(&ctx, "#7"));
    }

    #[test]
    fn test_regex_witness() {
        let ctx = ctx();
        let p = StringPattern::sequence(vec![
            (None, StringPattern::exact("v")),
            (None, StringPattern::RuneRange(RuneRange::new('0', '9'))),
        ]);
        let regex = p.regex_witness().unwrap();
        assert!(StringPattern::Regex(regex).test_str(&ctx, "v1"));
        assert!(StringPattern::IntRange(IntRange::new(0, 1)).regex_witness().is_none());
    }

    #[test]
    fn test_sequence_iteration_varies_last_element_fastest() {
        let ctx = ctx();
        let p = StringPattern::sequence(vec![
            (None, StringPattern::RuneRange(RuneRange::new('a', 'b'))),
            (None, StringPattern::IntRange(IntRange::new(1, 2))),
        ]);
        let mut it = p.iterator(&ctx).unwrap();
        let values = collect_values(&ctx, it.as_mut());
        let expected: Vec<Value> = ["a1", "a2", "b1", "b2"].into_iter().map(Value::string).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_match_groups() {
        let ctx = ctx();
        let pattern = Pattern::string(key_value());
        let groups = pattern.match_groups(&ctx, &Value::string("a=1")).unwrap();
        assert_eq!(groups.get("0"), Some(&Value::string("a=1")));
        assert_eq!(groups.get("key"), Some(&Value::string("a")));
    }
}
