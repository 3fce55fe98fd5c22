//! Function patterns

use std::fmt;

use crate::value::Value;

use super::Pattern;

/// Accepts functions whose parameter list matches structurally: same arity,
/// same variadicity, and for every parameter the same pattern (`None` for
/// untyped parameters).
#[derive(Clone, PartialEq, Default)]
pub struct FunctionPattern {
    /// Parameter patterns
    pub params: Vec<Option<Pattern>>,
    /// Whether the last parameter is variadic
    pub variadic: bool,
}

impl FunctionPattern {
    /// Function pattern with the given parameter patterns.
    pub fn new(params: Vec<Option<Pattern>>) -> Self {
        Self { params, variadic: false }
    }

    /// Mark the last parameter as variadic.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub(super) fn test(&self, value: &Value) -> bool {
        let Value::Function(f) = value else {
            return false;
        };
        f.variadic == self.variadic
            && f.params.len() == self.params.len()
            && f.params.iter().zip(&self.params).all(|(param, expected)| param.pattern == *expected)
    }
}

impl fmt::Debug for FunctionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if self.variadic && i + 1 == self.params.len() {
                write!(f, "...")?;
            }
            match p {
                Some(p) => write!(f, "{:?}", p)?,
                None => write!(f, "_")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};
    use crate::value::{FunctionValue, Parameter};
    use std::sync::Arc;

    #[test]
    fn test_function_pattern() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let add = FunctionValue::new(
            "add",
            vec![Parameter::typed("a", Pattern::int()), Parameter::new("b")],
            Arc::new(|_, _| Ok(Value::Nil)),
        );
        let add = Value::function(add);
        let matching = Pattern::function(FunctionPattern::new(vec![Some(Pattern::int()), None]));
        let other = Pattern::function(FunctionPattern::new(vec![Some(Pattern::int())]));
        assert!(matching.test(&ctx, &add));
        assert!(!other.test(&ctx, &add));
        assert!(!Pattern::function(FunctionPattern::new(vec![Some(Pattern::int()), None]).variadic())
            .test(&ctx, &add));
        assert_eq!(format!("{:?}", matching), "%fn(%int, _)");
    }
}
