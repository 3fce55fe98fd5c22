//! Structural equality
//!
//! Pointer-bearing values first compare by identity. Pairs of composites
//! already under comparison are assumed equal, so cyclic graphs terminate.

use std::collections::HashSet;
use std::sync::Arc;

use super::*;

type Visited = HashSet<(TransientId, TransientId)>;

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut visited = Visited::new();
        equal(self, other, &mut visited)
    }
}

fn floats_equal(a: f64, b: f64) -> bool {
    a == b || a.to_bits() == b.to_bits()
}

fn all_equal(a: &[Value], b: &[Value], visited: &mut Visited) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equal(x, y, visited))
}

fn equal(a: &Value, b: &Value, visited: &mut Visited) -> bool {
    if let (Some(x), Some(y)) = (a.transient_id(), b.transient_id()) {
        if x == y {
            return true;
        }
        if !visited.insert((x, y)) {
            return true;
        }
    }

    match (a, b) {
        // Atomic immutables
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Rune(x), Value::Rune(y)) => x == y,
        (Value::Byte(x), Value::Byte(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => floats_equal(*x, *y),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Path(x), Value::Path(y)) => x == y,
        (Value::PathPattern(x), Value::PathPattern(y)) => x == y,
        (Value::Url(x), Value::Url(y)) => x == y,
        (Value::Host(x), Value::Host(y)) => x == y,
        (Value::HostPattern(x), Value::HostPattern(y)) => x == y,
        (Value::UrlPattern(x), Value::UrlPattern(y)) => x == y,
        (Value::Scheme(x), Value::Scheme(y)) => x == y,
        (Value::EmailAddress(x), Value::EmailAddress(y)) => x == y,
        (Value::Identifier(x), Value::Identifier(y)) => x == y,
        (Value::PropertyName(x), Value::PropertyName(y)) => x == y,
        (Value::CheckedString(x), Value::CheckedString(y)) => x == y,
        (Value::Mimetype(x), Value::Mimetype(y)) => x == y,
        (Value::ByteCount(x), Value::ByteCount(y)) => x == y,
        (Value::LineCount(x), Value::LineCount(y)) => x == y,
        (Value::RuneCount(x), Value::RuneCount(y)) => x == y,
        (Value::ByteRate(x), Value::ByteRate(y)) => x == y,
        (Value::SimpleRate(x), Value::SimpleRate(y)) => x == y,
        (Value::Duration(x), Value::Duration(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::FileMode(x), Value::FileMode(y)) => x == y,
        (Value::RuneRange(x), Value::RuneRange(y)) => x == y,
        (Value::IntRange(x), Value::IntRange(y)) => x == y,
        (Value::QuantityRange(x), Value::QuantityRange(y)) => {
            x.inclusive_end == y.inclusive_end
                && equal(&x.end, &y.end, visited)
                && match (&x.start, &y.start) {
                    (Some(s1), Some(s2)) => equal(s1, s2, visited),
                    (None, None) => true,
                    _ => false,
                }
        }
        (Value::Port(x), Value::Port(y)) => x == y,
        (Value::Color(x), Value::Color(y)) => x == y,
        (Value::Option(x), Value::Option(y)) => {
            x.name == y.name && equal(&x.value, &y.value, visited)
        }

        // Mutable composites
        (Value::Object(x), Value::Object(y)) => {
            let (ex, ey) = (x.entries(), y.entries());
            ex.len() == ey.len()
                && ex.iter().all(|(k, v)| match y.prop(k) {
                    Some(other) => equal(v, &other, visited),
                    None => false,
                })
        }
        (Value::List(x), Value::List(y)) => all_equal(&x.elements(), &y.elements(), visited),
        (Value::Dictionary(x), Value::Dictionary(y)) => {
            let ex = x.entries();
            ex.len() == y.len()
                && ex.iter().all(|(k, v)| match y.get(k) {
                    Some(other) => equal(v, &other, visited),
                    None => false,
                })
        }
        (Value::RuneSlice(x), Value::RuneSlice(y)) => x.runes() == y.runes(),
        (Value::ByteSlice(x), Value::ByteSlice(y)) => x.bytes() == y.bytes(),
        (Value::StringConcat(x), Value::StringConcat(y)) => x.concatenate() == y.concatenate(),
        (Value::BytesConcat(x), Value::BytesConcat(y)) => x.concatenate() == y.concatenate(),

        // Immutable composites
        (Value::Record(x), Value::Record(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| match y.get(k) {
                    Some(other) => equal(v, other, visited),
                    None => false,
                })
        }
        (Value::Tuple(x), Value::Tuple(y)) => all_equal(x.elements(), y.elements(), visited),
        (Value::KeyList(x), Value::KeyList(y)) => x == y,

        // Patterns and markup
        (Value::Pattern(x), Value::Pattern(y)) => x == y,
        (Value::Markup(x), Value::Markup(y)) => x == y,

        // Reactive values
        (Value::Event(x), Value::Event(y)) => {
            x.time == y.time && equal(&x.value, &y.value, visited)
        }
        (Value::Mutation(x), Value::Mutation(y)) => x == y,
        (Value::Publication(x), Value::Publication(y)) => Arc::ptr_eq(x, y),
        (Value::Message(x), Value::Message(y)) => {
            equal(x.data(), y.data(), visited)
        }

        (Value::ModuleArgs(x), Value::ModuleArgs(y)) => {
            let (vx, vy): (Vec<_>, Vec<_>) = (x.iter().collect(), y.iter().collect());
            vx.len() == vy.len()
                && vx
                    .iter()
                    .zip(&vy)
                    .all(|((k1, v1), (k2, v2))| k1 == k2 && equal(v1, v2, visited))
        }
        (Value::AstNode(x), Value::AstNode(y)) => x == y,

        // Identity-bearing values were compared by transient id above
        _ => false,
    }
}
