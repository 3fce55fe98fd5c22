//! Built-in type patterns

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Result, RuntimeError};
use crate::value::Value;

use super::{Pattern, PatternKind};

type TypeTest = fn(&Value) -> bool;

/// A pattern accepting the values of a built-in type.
#[derive(Clone)]
pub struct TypePattern {
    name: &'static str,
    test: TypeTest,
}

impl TypePattern {
    /// Name of the type (`int`, `obj`...).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(super) fn test(&self, value: &Value) -> bool {
        (self.test)(value)
    }

    pub(super) fn call(&self, args: &[Value]) -> Result<Pattern> {
        let arg = match args {
            [arg] => arg,
            _ => {
                return Err(RuntimeError::InvalidArgument(format!(
                    "%{} expects one argument, got {}",
                    self.name,
                    args.len()
                )))
            }
        };
        match (self.name, arg) {
            ("int", Value::IntRange(r)) => Ok(Pattern::int_range(*r)),
            ("list", Value::Pattern(elem)) => Ok(Pattern::list_of(elem.clone())),
            ("tuple", Value::Pattern(elem)) => Ok(Pattern::tuple_of(elem.clone())),
            ("event", Value::Pattern(payload)) => Ok(Pattern::event(Some(payload.clone()))),
            ("event", value) => Ok(Pattern::event(Some(Pattern::exact(value.clone())))),
            ("int", other) => Err(RuntimeError::type_error("int range", other)),
            ("list" | "tuple", other) => Err(RuntimeError::type_error("pattern", other)),
            _ => Err(RuntimeError::PatternNotCallable),
        }
    }
}

impl PartialEq for TypePattern {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for TypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name)
    }
}

const BUILTIN_TYPES: &[(&str, TypeTest)] = &[
    ("nil", |v| matches!(v, Value::Nil)),
    ("bool", |v| matches!(v, Value::Bool(_))),
    ("int", |v| matches!(v, Value::Int(_))),
    ("float", |v| matches!(v, Value::Float(_))),
    ("rune", |v| matches!(v, Value::Rune(_))),
    ("byte", |v| matches!(v, Value::Byte(_))),
    ("str", Value::is_string_like),
    ("path", |v| matches!(v, Value::Path(_))),
    ("path-pattern", |v| matches!(v, Value::PathPattern(_))),
    ("url", |v| matches!(v, Value::Url(_))),
    ("host", |v| matches!(v, Value::Host(_))),
    ("scheme", |v| matches!(v, Value::Scheme(_))),
    ("email-addr", |v| matches!(v, Value::EmailAddress(_))),
    ("obj", |v| matches!(v, Value::Object(_))),
    ("rec", |v| matches!(v, Value::Record(_))),
    ("list", |v| matches!(v, Value::List(_))),
    ("tuple", |v| matches!(v, Value::Tuple(_))),
    ("dict", |v| matches!(v, Value::Dictionary(_))),
    ("runes", |v| matches!(v, Value::RuneSlice(_))),
    ("bytes", Value::is_bytes_like),
    ("keylist", |v| matches!(v, Value::KeyList(_))),
    ("filemode", |v| matches!(v, Value::FileMode(_))),
    ("date", |v| matches!(v, Value::DateTime(_))),
    ("duration", |v| matches!(v, Value::Duration(_))),
    ("int-range", |v| matches!(v, Value::IntRange(_))),
    ("rune-range", |v| matches!(v, Value::RuneRange(_))),
    ("pattern", |v| matches!(v, Value::Pattern(_))),
    ("markup", |v| matches!(v, Value::Markup(_))),
    ("event", |v| matches!(v, Value::Event(_))),
    ("mutation", |v| matches!(v, Value::Mutation(_))),
    ("watcher", |v| matches!(v, Value::Watcher(_))),
    ("fn", |v| matches!(v, Value::Function(_))),
];

static BUILTINS: LazyLock<HashMap<&'static str, Pattern>> = LazyLock::new(|| {
    BUILTIN_TYPES
        .iter()
        .map(|(name, test)| {
            let kind = PatternKind::Type(TypePattern { name: *name, test: *test });
            (*name, Pattern::new(kind))
        })
        .collect()
});

pub(super) fn builtin(name: &str) -> Option<Pattern> {
    BUILTINS.get(name).cloned()
}

pub(super) fn builtin_or_any(name: &str) -> Pattern {
    builtin(name).unwrap_or_else(Pattern::any)
}

/// Names of the built-in type patterns.
pub fn builtin_type_names() -> Vec<&'static str> {
    BUILTIN_TYPES.iter().map(|(name, _)| *name).collect()
}
