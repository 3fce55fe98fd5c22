//! Value trait implementations: constructors, predicates, extractors, From traits

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::error::Result;

use super::*;

// ═══════════════════════════════════════════════════════════════════
// Convenience Constructors
// ═══════════════════════════════════════════════════════════════════

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Create a path value
    pub fn path(s: &str) -> Self {
        Value::Path(Path::new(s))
    }

    /// Create a path pattern value
    pub fn path_pattern(s: &str) -> Self {
        Value::PathPattern(PathPattern::new(s))
    }

    /// Create a URL value, validating it
    pub fn url(s: &str) -> Result<Self> {
        Ok(Value::Url(Url::parse(s)?))
    }

    /// Create a host value, validating it
    pub fn host(s: &str) -> Result<Self> {
        Ok(Value::Host(Host::parse(s)?))
    }

    /// Create an identifier value
    pub fn identifier(s: &str) -> Self {
        Value::Identifier(Arc::from(s))
    }

    /// Create a property name value
    pub fn property_name(s: &str) -> Self {
        Value::PropertyName(Arc::from(s))
    }

    /// Create an option value
    pub fn option(name: &str, value: Value) -> Self {
        Value::Option(Arc::new(OptionValue {
            name: Arc::from(name),
            value,
        }))
    }

    /// Create an object value
    pub fn object(pairs: Vec<(&str, Value)>) -> Self {
        Value::Object(Object::from_pairs(pairs))
    }

    /// Create a list of arbitrary values
    pub fn list(values: Vec<Value>) -> Self {
        Value::List(List::from_values(values))
    }

    /// Create an integer list
    pub fn int_list(values: Vec<i64>) -> Self {
        Value::List(List::from_ints(values))
    }

    /// Create a record value; every value must be immutable
    pub fn record(pairs: Vec<(&str, Value)>) -> Result<Self> {
        let entries: IndexMap<Arc<str>, Value> =
            pairs.into_iter().map(|(k, v)| (Arc::from(k), v)).collect();
        Ok(Value::Record(Arc::new(Record::new(entries)?)))
    }

    /// Create a tuple value; every element must be immutable
    pub fn tuple(elements: Vec<Value>) -> Result<Self> {
        Ok(Value::Tuple(Arc::new(Tuple::new(elements)?)))
    }

    /// Create a key list value
    pub fn key_list(keys: &[&str]) -> Self {
        Value::KeyList(Arc::new(KeyList::new(
            keys.iter().map(|k| Arc::from(*k)).collect(),
        )))
    }

    /// Create a dictionary value; keys must be immutable
    pub fn dictionary(pairs: Vec<(Value, Value)>) -> Result<Self> {
        Ok(Value::Dictionary(Dictionary::new(pairs)?))
    }

    /// Create a rune slice value
    pub fn rune_slice(s: &str) -> Self {
        Value::RuneSlice(RuneSlice::new(s.chars().collect()))
    }

    /// Create a mutable byte slice value
    pub fn byte_slice(bytes: impl Into<Vec<u8>>) -> Self {
        Value::ByteSlice(ByteSlice::new(bytes.into()))
    }

    /// Create a function value
    pub fn function(f: FunctionValue) -> Self {
        Value::Function(Arc::new(f))
    }

    /// Create a markup value
    pub fn markup(node: MarkupNode) -> Self {
        Value::Markup(Arc::new(node))
    }

    /// Create a pattern value
    pub fn pattern(p: Pattern) -> Self {
        Value::Pattern(p)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Type Predicates
    // ═══════════════════════════════════════════════════════════════════
    /// Check if value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Check if value is a string-like value
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            Value::Str(_)
                | Value::StringConcat(_)
                | Value::RuneSlice(_)
                | Value::CheckedString(_)
                | Value::EmailAddress(_)
                | Value::Identifier(_)
        )
    }

    /// Check if value is a byte sequence
    pub fn is_bytes_like(&self) -> bool {
        matches!(self, Value::ByteSlice(_) | Value::BytesConcat(_))
    }

    /// Check if value is a quantity (count, rate, duration)
    pub fn is_quantity(&self) -> bool {
        matches!(
            self,
            Value::ByteCount(_)
                | Value::LineCount(_)
                | Value::RuneCount(_)
                | Value::ByteRate(_)
                | Value::SimpleRate(_)
                | Value::Duration(_)
        )
    }

    /// Check if value is a pattern
    pub fn is_pattern(&self) -> bool {
        matches!(self, Value::Pattern(_))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Extractors (return Option for safe access)
    // ═══════════════════════════════════════════════════════════════════
    /// Extract boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::CheckedString(c) => Some(&c.value),
            Value::EmailAddress(s) | Value::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// Extract the string content of any string-like value
    pub fn to_string_content(&self) -> Option<String> {
        match self {
            Value::StringConcat(c) => Some(c.concatenate()),
            Value::RuneSlice(r) => Some(r.to_string()),
            other => other.as_str().map(str::to_string),
        }
    }

    /// Extract the bytes of a byte sequence
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::ByteSlice(b) => Some(b.bytes()),
            Value::BytesConcat(c) => Some(c.concatenate()),
            _ => None,
        }
    }

    /// Extract path value
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Extract object value
    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Extract list value
    pub fn as_list(&self) -> Option<&Arc<List>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Extract pattern value
    pub fn as_pattern(&self) -> Option<&Pattern> {
        match self {
            Value::Pattern(p) => Some(p),
            _ => None,
        }
    }

    /// Extract mutation value
    pub fn as_mutation(&self) -> Option<&Arc<Mutation>> {
        match self {
            Value::Mutation(m) => Some(m),
            _ => None,
        }
    }

    /// Extract duration value
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// From Trait Implementations
// ═══════════════════════════════════════════════════════════════════

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Rune(c)
    }
}

impl From<u8> for Value {
    fn from(b: u8) -> Self {
        Value::Byte(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Path> for Value {
    fn from(p: Path) -> Self {
        Value::Path(p)
    }
}

impl From<Url> for Value {
    fn from(u: Url) -> Self {
        Value::Url(u)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}

impl From<Pattern> for Value {
    fn from(p: Pattern) -> Self {
        Value::Pattern(p)
    }
}

impl From<Mutation> for Value {
    fn from(m: Mutation) -> Self {
        Value::Mutation(Arc::new(m))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Nil,
        }
    }
}
