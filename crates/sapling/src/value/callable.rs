//! Callable values: native functions with typed parameters

use std::sync::Arc;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;

use super::Value;

/// Type alias for native function bodies
pub type NativeFnPtr = Arc<dyn Fn(&Context, &[Value]) -> Result<Value> + Send + Sync>;

/// A function parameter.
#[derive(Clone)]
pub struct Parameter {
    /// Parameter name
    pub name: Arc<str>,

    /// Pattern arguments must match (`None` accepts anything)
    pub pattern: Option<Pattern>,
}

impl Parameter {
    /// An untyped parameter.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            pattern: None,
        }
    }

    /// A parameter whose arguments must match `pattern`.
    pub fn typed(name: &str, pattern: Pattern) -> Self {
        Self {
            name: Arc::from(name),
            pattern: Some(pattern),
        }
    }
}

/// A function value.
///
/// The body is a native closure; the evaluator wraps compiled code the same
/// way.
#[derive(Clone)]
pub struct FunctionValue {
    /// Function name (`None` for anonymous functions)
    pub name: Option<Arc<str>>,

    /// Parameters
    pub params: Vec<Parameter>,

    /// Whether the last parameter collects the remaining arguments
    pub variadic: bool,

    /// Whether the function assigns global variables (such functions are
    /// bound to their module's state and can be neither shared nor cloned)
    pub assigns_globals: bool,

    /// The function body
    pub body: NativeFnPtr,
}

impl FunctionValue {
    /// Create a function value.
    pub fn new(name: &str, params: Vec<Parameter>, body: NativeFnPtr) -> Self {
        Self {
            name: Some(Arc::from(name)),
            params,
            variadic: false,
            assigns_globals: false,
            body,
        }
    }

    /// Create an anonymous function value.
    pub fn anonymous(params: Vec<Parameter>, body: NativeFnPtr) -> Self {
        Self {
            name: None,
            params,
            variadic: false,
            assigns_globals: false,
            body,
        }
    }

    /// Make the last parameter variadic (builder pattern)
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Mark the function as assigning globals (builder pattern)
    pub fn assigning_globals(mut self) -> Self {
        self.assigns_globals = true;
        self
    }

    /// Number of non-variadic parameters.
    pub fn arity(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }

    /// Call the function after checking the arguments against the parameters.
    pub fn call(&self, ctx: &Context, args: &[Value]) -> Result<Value> {
        let arity = self.arity();
        if args.len() < arity || (!self.variadic && args.len() > arity) {
            return Err(RuntimeError::InvalidArgument(format!(
                "{} expects {}{} argument(s), got {}",
                self.display_name(),
                if self.variadic { "at least " } else { "" },
                arity,
                args.len()
            )));
        }
        for (i, arg) in args.iter().enumerate() {
            let param = &self.params[i.min(self.params.len().saturating_sub(1))];
            if let Some(pattern) = &param.pattern {
                if !pattern.test(ctx, arg) {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "argument {} of {} does not match its pattern",
                        param.name,
                        self.display_name()
                    )));
                }
            }
        }
        (self.body)(ctx, args)
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

impl std::fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FunctionValue({})", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    fn add() -> FunctionValue {
        FunctionValue::new(
            "add",
            vec![
                Parameter::typed("a", Pattern::int()),
                Parameter::typed("b", Pattern::int()),
            ],
            Arc::new(|_, args| match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                _ => Ok(Value::Nil),
            }),
        )
    }

    #[test]
    fn test_call_checks_arity_and_patterns() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let f = add();
        assert_eq!(f.call(&ctx, &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
        assert!(f.call(&ctx, &[Value::Int(1)]).is_err());
        assert!(f.call(&ctx, &[Value::Int(1), Value::Bool(true)]).is_err());
    }

    #[test]
    fn test_variadic() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let f = FunctionValue::anonymous(
            vec![Parameter::new("rest")],
            Arc::new(|_, args| Ok(Value::Int(args.len() as i64))),
        )
        .variadic();
        assert_eq!(f.call(&ctx, &[]).unwrap(), Value::Int(0));
        assert_eq!(
            f.call(&ctx, &[Value::Nil, Value::Nil]).unwrap(),
            Value::Int(2)
        );
    }
}
