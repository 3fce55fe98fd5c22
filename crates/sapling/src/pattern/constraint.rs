//! Complex property constraints
//!
//! An object pattern may carry constraints relating several properties of
//! the matched object (`self.min <= self.max`). Constraint expressions are
//! stored as source text; the context's [`ConstraintEvaluator`] evaluates
//! them with the matched value as `self`.

use std::cmp::Ordering;
use std::sync::Arc;

use quote::ToTokens;
use syn::visit::Visit;

use crate::context::Context;
use crate::error::{type_name, Result, RuntimeError};
use crate::value::Value;

/// Evaluates constraint expressions.
pub trait ConstraintEvaluator: Send + Sync {
    /// Evaluate `expr` with `subject` bound to `self`.
    fn eval(&self, ctx: &Context, expr: &str, subject: &Value) -> Result<bool>;
}

/// A constraint over several properties of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexPropertyConstraint {
    source: Arc<str>,
    properties: Vec<Arc<str>>,
}

struct SelfFields(Vec<Arc<str>>);

impl<'ast> Visit<'ast> for SelfFields {
    fn visit_expr_field(&mut self, field: &'ast syn::ExprField) {
        if is_self(&field.base) {
            if let syn::Member::Named(ident) = &field.member {
                let name: Arc<str> = Arc::from(ident.to_string());
                if !self.0.contains(&name) {
                    self.0.push(name);
                }
            }
        }
        syn::visit::visit_expr_field(self, field);
    }
}

impl ComplexPropertyConstraint {
    /// Parse a constraint expression.
    pub fn new(source: &str) -> Result<Self> {
        let expr = parse(source)?;
        let mut fields = SelfFields(Vec::new());
        fields.visit_expr(&expr);
        Ok(Self {
            source: Arc::from(source),
            properties: fields.0,
        })
    }

    /// Source of the expression.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Properties of `self` the expression reads.
    pub fn properties(&self) -> &[Arc<str>] {
        &self.properties
    }
}

fn parse(source: &str) -> Result<syn::Expr> {
    syn::parse_str::<syn::Expr>(source).map_err(|e| RuntimeError::ParseFailure {
        input: source.to_string(),
        reason: e.to_string(),
    })
}

fn is_self(expr: &syn::Expr) -> bool {
    matches!(expr, syn::Expr::Path(p) if p.path.is_ident("self"))
}

fn fail(expr: &impl ToTokens, reason: &str) -> RuntimeError {
    RuntimeError::ConstraintEvaluation(format!("{}: {}", expr.to_token_stream(), reason))
}

/// Tree-walk evaluator of simple expressions over `self`: literals,
/// property access, arithmetic, comparisons, boolean operators and
/// `.len()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfExprEvaluator;

impl ConstraintEvaluator for SelfExprEvaluator {
    fn eval(&self, _ctx: &Context, expr: &str, subject: &Value) -> Result<bool> {
        let expr = parse(expr)?;
        match eval_expr(&expr, subject)? {
            Value::Bool(b) => Ok(b),
            other => Err(fail(&expr, &format!("expected bool, got {}", type_name(&other)))),
        }
    }
}

fn eval_expr(expr: &syn::Expr, subject: &Value) -> Result<Value> {
    match expr {
        syn::Expr::Lit(lit) => eval_lit(&lit.lit),
        syn::Expr::Paren(p) => eval_expr(&p.expr, subject),
        syn::Expr::Group(g) => eval_expr(&g.expr, subject),
        syn::Expr::Path(_) if is_self(expr) => Ok(subject.clone()),
        syn::Expr::Field(field) => {
            let base = eval_expr(&field.base, subject)?;
            let syn::Member::Named(ident) = &field.member else {
                return Err(fail(field, "positional fields are not supported"));
            };
            let name = ident.to_string();
            let value = match &base {
                Value::Object(o) => o.prop(&name),
                Value::Record(r) => r.get(&name).cloned(),
                _ => None,
            };
            value.ok_or_else(|| fail(field, &format!("no property {name}")))
        }
        syn::Expr::MethodCall(call) if call.method == "len" && call.args.is_empty() => {
            let receiver = eval_expr(&call.receiver, subject)?;
            let len = match &receiver {
                Value::List(l) => l.len(),
                Value::Tuple(t) => t.len(),
                Value::Object(o) => o.len(),
                Value::Record(r) => r.len(),
                other => match other.to_string_content() {
                    Some(s) => s.chars().count(),
                    None => return Err(fail(call, "value has no length")),
                },
            };
            Ok(Value::Int(len as i64))
        }
        syn::Expr::Unary(unary) => {
            let operand = eval_expr(&unary.expr, subject)?;
            match (&unary.op, operand) {
                (syn::UnOp::Not(_), Value::Bool(b)) => Ok(Value::Bool(!b)),
                (syn::UnOp::Neg(_), Value::Int(n)) => Ok(Value::Int(-n)),
                (syn::UnOp::Neg(_), Value::Float(n)) => Ok(Value::Float(-n)),
                _ => Err(fail(unary, "invalid operand")),
            }
        }
        syn::Expr::Binary(binary) => eval_binary(binary, subject),
        other => Err(fail(other, "unsupported expression")),
    }
}

fn eval_lit(lit: &syn::Lit) -> Result<Value> {
    match lit {
        syn::Lit::Str(s) => Ok(Value::string(s.value())),
        syn::Lit::Char(c) => Ok(Value::Rune(c.value())),
        syn::Lit::Bool(b) => Ok(Value::Bool(b.value)),
        syn::Lit::Int(i) => i
            .base10_parse::<i64>()
            .map(Value::Int)
            .map_err(|e| fail(lit, &e.to_string())),
        syn::Lit::Float(f) => f
            .base10_parse::<f64>()
            .map(Value::Float)
            .map_err(|e| fail(lit, &e.to_string())),
        _ => Err(fail(lit, "unsupported literal")),
    }
}

fn eval_binary(binary: &syn::ExprBinary, subject: &Value) -> Result<Value> {
    let left = eval_expr(&binary.left, subject)?;
    // short-circuit
    match (&binary.op, &left) {
        (syn::BinOp::And(_), Value::Bool(false)) => return Ok(Value::Bool(false)),
        (syn::BinOp::Or(_), Value::Bool(true)) => return Ok(Value::Bool(true)),
        _ => {}
    }
    let right = eval_expr(&binary.right, subject)?;
    let invalid = || fail(binary, &format!("invalid operands {} and {}", type_name(&left), type_name(&right)));

    match &binary.op {
        syn::BinOp::And(_) | syn::BinOp::Or(_) => match &right {
            Value::Bool(b) if matches!(left, Value::Bool(_)) => Ok(Value::Bool(*b)),
            _ => Err(invalid()),
        },
        syn::BinOp::Eq(_) => Ok(Value::Bool(left == right)),
        syn::BinOp::Ne(_) => Ok(Value::Bool(left != right)),
        syn::BinOp::Lt(_) => compare(&left, &right).map(|o| Value::Bool(o.is_lt())).ok_or_else(invalid),
        syn::BinOp::Le(_) => compare(&left, &right).map(|o| Value::Bool(o.is_le())).ok_or_else(invalid),
        syn::BinOp::Gt(_) => compare(&left, &right).map(|o| Value::Bool(o.is_gt())).ok_or_else(invalid),
        syn::BinOp::Ge(_) => compare(&left, &right).map(|o| Value::Bool(o.is_ge())).ok_or_else(invalid),
        op => arithmetic(op, &left, &right).ok_or_else(invalid),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        _ => {
            let a = left.to_string_content()?;
            let b = right.to_string_content()?;
            Some(a.cmp(&b))
        }
    }
}

fn arithmetic(op: &syn::BinOp, left: &Value, right: &Value) -> Option<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let n = match op {
                syn::BinOp::Add(_) => a.checked_add(*b),
                syn::BinOp::Sub(_) => a.checked_sub(*b),
                syn::BinOp::Mul(_) => a.checked_mul(*b),
                syn::BinOp::Div(_) => a.checked_div(*b),
                syn::BinOp::Rem(_) => a.checked_rem(*b),
                _ => None,
            };
            n.map(Value::Int)
        }
        (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
            let a = left.as_float().or_else(|| left.as_int().map(|n| n as f64))?;
            let b = right.as_float().or_else(|| right.as_int().map(|n| n as f64))?;
            let n = match op {
                syn::BinOp::Add(_) => a + b,
                syn::BinOp::Sub(_) => a - b,
                syn::BinOp::Mul(_) => a * b,
                syn::BinOp::Div(_) => a / b,
                _ => return None,
            };
            Some(Value::Float(n))
        }
        (Value::Str(a), Value::Str(b)) if matches!(op, syn::BinOp::Add(_)) => {
            Some(Value::string(format!("{a}{b}")))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::pattern::{ObjectPattern, Pattern};
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    fn range(min: i64, max: i64) -> Value {
        Value::object(vec![("min", Value::Int(min)), ("max", Value::Int(max))])
    }

    #[test]
    fn test_properties_are_collected() {
        let c = ComplexPropertyConstraint::new("self.min <= self.max && self.min >= 0").unwrap();
        let names: Vec<&str> = c.properties().iter().map(|p| &**p).collect();
        assert_eq!(names, vec!["min", "max"]);
        assert!(ComplexPropertyConstraint::new("self.min <=").is_err());
    }

    #[test]
    fn test_evaluator() {
        let ctx = ctx();
        let eval = SelfExprEvaluator;
        assert!(eval.eval(&ctx, "self.min < self.max", &range(1, 2)).unwrap());
        assert!(!eval.eval(&ctx, "self.min < self.max", &range(2, 1)).unwrap());
        assert!(eval.eval(&ctx, "(self.max - self.min) * 2 == 4", &range(1, 3)).unwrap());
        assert!(eval.eval(&ctx, "!(self.min > 10) || self.nope", &range(1, 3)).unwrap());
        assert!(matches!(
            eval.eval(&ctx, "self.min + 1", &range(1, 3)),
            Err(RuntimeError::ConstraintEvaluation(_))
        ));
        assert!(matches!(
            eval.eval(&ctx, "self.nope == 1", &range(1, 3)),
            Err(RuntimeError::ConstraintEvaluation(_))
        ));
    }

    #[test]
    fn test_len() {
        let ctx = ctx();
        let subject = Value::object(vec![("name", Value::string("abc"))]);
        assert!(SelfExprEvaluator.eval(&ctx, "self.name.len() == 3", &subject).unwrap());
    }

    #[test]
    fn test_object_pattern_with_constraint() {
        let ctx = ctx();
        let pattern = Pattern::object(
            ObjectPattern::new()
                .entry("min", Pattern::int())
                .entry("max", Pattern::int())
                .with_constraint(ComplexPropertyConstraint::new("self.min <= self.max").unwrap()),
        );
        assert!(pattern.test(&ctx, &range(0, 5)));
        assert!(!pattern.test(&ctx, &range(6, 5)));
    }
}
