//! Display and Debug implementations for Value
//!
//! The Debug form is the canonical representation: dictionaries index their
//! keys by it, so structurally equal immutable values print the same.

use std::fmt;
use std::time::UNIX_EPOCH;

use super::*;

/// Nesting depth past which composites print as `...`.
const MAX_REPR_DEPTH: usize = 16;

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = &'a Value>,
    close: &str,
    depth: usize,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        repr(item, f, depth + 1)?;
    }
    write!(f, "{close}")
}

fn write_entries<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    entries: impl Iterator<Item = (&'a str, &'a Value)>,
    close: &str,
    depth: usize,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, (k, v)) in entries.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{k}: ")?;
        repr(v, f, depth + 1)?;
    }
    write!(f, "{close}")
}

fn repr(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    if depth > MAX_REPR_DEPTH {
        return write!(f, "...");
    }
    match value {
        Value::Nil => write!(f, "nil"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Rune(c) => write!(f, "'{}'", c),
        Value::Byte(b) => write!(f, "0x{:02x}", b),
        Value::Int(n) => write!(f, "{}", n),
        Value::Float(n) => write!(f, "{:?}", n),
        Value::Str(s) => write!(f, "{:?}", s.as_ref()),
        Value::Path(p) => write!(f, "{}", p),
        Value::PathPattern(p) => write!(f, "{}", p),
        Value::Url(u) => write!(f, "{}", u),
        Value::Host(h) => write!(f, "{}", h),
        Value::HostPattern(h) => write!(f, "{}", h),
        Value::UrlPattern(u) => write!(f, "{}", u),
        Value::Scheme(s) => write!(f, "{}", s),
        Value::EmailAddress(s) => write!(f, "emailaddr\"{}\"", s),
        Value::Identifier(s) => write!(f, "#{}", s),
        Value::PropertyName(s) => write!(f, ".{}", s),
        Value::CheckedString(c) => write!(f, "%{}`{}`", c.pattern_name, c.value),
        Value::Mimetype(s) => write!(f, "mime\"{}\"", s),
        Value::ByteCount(n) => write!(f, "{}B", n),
        Value::LineCount(n) => write!(f, "{}ln", n),
        Value::RuneCount(n) => write!(f, "{}rn", n),
        Value::ByteRate(n) => write!(f, "{}B/s", n),
        Value::SimpleRate(n) => write!(f, "{}x/s", n),
        Value::Duration(d) => write!(f, "{:?}", d),
        Value::DateTime(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => write!(f, "datetime({}ms)", d.as_millis()),
            Err(e) => write!(f, "datetime(-{}ms)", e.duration().as_millis()),
        },
        Value::FileMode(m) => write!(f, "FileMode({:o})", m),
        Value::RuneRange(r) => write!(f, "'{}'..'{}'", r.start, r.end),
        Value::QuantityRange(r) => {
            if let Some(start) = &r.start {
                repr(start, f, depth + 1)?;
            }
            write!(f, "{}", if r.inclusive_end { ".." } else { "..<" })?;
            repr(&r.end, f, depth + 1)
        }
        Value::IntRange(r) => write!(f, "{}..{}", r.start, r.end),
        Value::Port(p) => match &p.scheme {
            Some(s) => write!(f, ":{}/{}", p.number, s),
            None => write!(f, ":{}", p.number),
        },
        Value::Color(c) => write!(f, "#{:02x}{:02x}{:02x}", c.r, c.g, c.b),
        Value::Option(o) => {
            write!(f, "--{}=", o.name)?;
            repr(&o.value, f, depth + 1)
        }

        Value::Object(o) => {
            let entries = o.entries();
            write_entries(
                f,
                "{",
                entries.iter().map(|(k, v)| (&**k, v)),
                "}",
                depth,
            )
        }
        Value::List(l) => write_seq(f, "[", l.elements().iter(), "]", depth),
        Value::Dictionary(d) => {
            write!(f, ":{{")?;
            for (i, (k, v)) in d.entries().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                repr(k, f, depth + 1)?;
                write!(f, ": ")?;
                repr(v, f, depth + 1)?;
            }
            write!(f, "}}")
        }
        Value::RuneSlice(r) => write!(f, "runes{:?}", r.to_string()),
        Value::ByteSlice(b) => write!(f, "0x[{}]", hex(&b.bytes())),
        Value::StringConcat(c) => write!(f, "{:?}", c.concatenate()),
        Value::BytesConcat(c) => write!(f, "0x[{}]", hex(&c.concatenate())),

        Value::Record(r) => {
            let mut entries: Vec<_> = r.iter().map(|(k, v)| (&**k, v)).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            write_entries(f, "#{", entries.into_iter(), "}", depth)
        }
        Value::Tuple(t) => write_seq(f, "#[", t.elements().iter(), "]", depth),
        Value::KeyList(k) => {
            write!(f, ".{{")?;
            for (i, key) in k.keys.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", key)?;
            }
            write!(f, "}}")
        }

        Value::Pattern(p) => write!(f, "{:?}", p),
        Value::PatternNamespace(ns) => write!(f, "<pattern-namespace {}>", ns.name()),
        Value::Markup(m) => write!(f, "{}", m),

        Value::Event(e) => {
            write!(f, "Event(")?;
            repr(&e.value, f, depth + 1)?;
            write!(f, ")")
        }
        Value::Mutation(m) => write!(f, "{}", m),
        Value::Watcher(_) => write!(f, "<watcher>"),
        Value::EventSource(_) => write!(f, "<event-source>"),
        Value::Subscription(_) => write!(f, "<subscription>"),
        Value::Publication(p) => {
            write!(f, "Publication(")?;
            repr(p.data(), f, depth + 1)?;
            write!(f, ")")
        }
        Value::Message(m) => {
            write!(f, "Message(")?;
            repr(m.data(), f, depth + 1)?;
            write!(f, ")")
        }

        Value::Function(func) => match &func.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<fn>"),
        },
        Value::Struct(s) => {
            let fields = s.fields();
            write!(f, "{} ", s.type_name)?;
            write_entries(f, "{ ", fields.iter().map(|(k, v)| (&**k, v)), " }", depth)
        }
        Value::ModuleArgs(args) => {
            write_entries(f, "ModuleArgs{", args.iter().map(|(k, v)| (&**k, v)), "}", depth)
        }
        Value::Opaque(o) => write!(f, "{:?}", o),
        Value::AstNode(n) => write!(f, "<{} {:?}>", n.kind, n.source),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        repr(self, f, 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display is more user-friendly, Debug is more detailed
        match self {
            Value::Str(s) => write!(f, "{}", s.as_ref()),
            Value::Rune(c) => write!(f, "{}", c),
            Value::StringConcat(c) => write!(f, "{}", c.concatenate()),
            Value::RuneSlice(r) => write!(f, "{}", r),
            Value::CheckedString(c) => write!(f, "{}", c.value),
            _ => fmt::Debug::fmt(self, f),
        }
    }
}
