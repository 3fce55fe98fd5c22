//! Host-level compound values: structs, module arguments, opaque handles
//! and syntax nodes

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;

use super::Value;

/// A struct instance with named fields.
///
/// Uses IndexMap to preserve field order. Structs live on the stack of a
/// single module state: they are mutable and never shared.
#[derive(Debug)]
pub struct StructValue {
    /// The struct's type name (e.g., "Point", "Person")
    pub type_name: Arc<str>,

    fields: RwLock<IndexMap<Arc<str>, Value>>,
}

impl StructValue {
    /// Create a new struct
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: Arc::from(type_name),
            fields: RwLock::new(IndexMap::new()),
        }
    }

    /// Add a field (builder pattern)
    pub fn with_field(self, name: &str, value: Value) -> Self {
        self.fields.write().insert(Arc::from(name), value);
        self
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Set an existing field
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        match self.fields.write().get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuntimeError::InvalidArgument(format!(
                "struct {} has no field {name}",
                self.type_name
            ))),
        }
    }

    /// Snapshot of the fields
    pub fn fields(&self) -> Vec<(Arc<str>, Value)> {
        self.fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A module parameter.
#[derive(Clone)]
pub struct ModuleParam {
    /// Parameter name
    pub name: Arc<str>,
    /// Pattern the argument must match
    pub pattern: Pattern,
    /// Default value; parameters without one are required
    pub default: Option<Value>,
}

impl ModuleParam {
    /// A required parameter.
    pub fn required(name: &str, pattern: Pattern) -> Self {
        Self {
            name: Arc::from(name),
            pattern,
            default: None,
        }
    }

    /// An optional parameter with a default value.
    pub fn with_default(name: &str, pattern: Pattern, default: Value) -> Self {
        Self {
            name: Arc::from(name),
            pattern,
            default: Some(default),
        }
    }
}

/// The parameters a module declares.
#[derive(Clone, Default)]
pub struct ModuleParams {
    /// Parameters in declaration order
    pub params: Vec<ModuleParam>,
}

impl ModuleParams {
    /// Create a parameter list.
    pub fn new(params: Vec<ModuleParam>) -> Self {
        Self { params }
    }
}

/// Arguments passed to a module, checked against its parameters.
#[derive(Debug)]
pub struct ModuleArgs {
    values: IndexMap<Arc<str>, Value>,
}

impl ModuleArgs {
    /// Check `provided` against `params`, filling in defaults.
    pub fn new(
        ctx: &Context,
        params: &ModuleParams,
        provided: IndexMap<Arc<str>, Value>,
    ) -> Result<ModuleArgs> {
        if let Some(unknown) = provided
            .keys()
            .find(|k| !params.params.iter().any(|p| &p.name == *k))
        {
            return Err(RuntimeError::InvalidArgument(format!(
                "unknown module argument {unknown}"
            )));
        }
        let mut values = IndexMap::new();
        for param in &params.params {
            let value = match provided.get(&param.name) {
                Some(v) => v.clone(),
                None => param.default.clone().ok_or_else(|| {
                    RuntimeError::InvalidArgument(format!(
                        "missing module argument {}",
                        param.name
                    ))
                })?,
            };
            if !param.pattern.test(ctx, &value) {
                return Err(RuntimeError::InvalidArgument(format!(
                    "module argument {} does not match its pattern",
                    param.name
                )));
            }
            values.insert(param.name.clone(), value);
        }
        Ok(ModuleArgs { values })
    }

    pub(crate) fn from_checked(values: IndexMap<Arc<str>, Value>) -> ModuleArgs {
        ModuleArgs { values }
    }

    /// Value of an argument.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Argument values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values()
    }

    /// Arguments in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.values.iter()
    }
}

/// Wrapper over a single foreign handle.
pub struct Opaque {
    handle: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    /// Wrap a host handle.
    pub fn new<T: Any + Send + Sync>(handle: T) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Borrow the handle as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref()
    }
}

impl std::fmt::Debug for Opaque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Opaque({:p})", Arc::as_ptr(&self.handle))
    }
}

/// A syntax node yielded by the parse-tree provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    /// Node kind (`expr`, `markup`, `init-block`...)
    pub kind: Arc<str>,
    /// Source text of the node
    pub source: Arc<str>,
}

impl AstNode {
    /// Create a node.
    pub fn new(kind: &str, source: &str) -> Self {
        Self {
            kind: Arc::from(kind),
            source: Arc::from(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    #[test]
    fn test_module_args_defaults_and_checks() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let params = ModuleParams::new(vec![
            ModuleParam::required("port", Pattern::int()),
            ModuleParam::with_default("verbose", Pattern::bool(), Value::Bool(false)),
        ]);

        let mut provided = IndexMap::new();
        provided.insert(Arc::from("port"), Value::Int(8080));
        let args = ModuleArgs::new(&ctx, &params, provided).unwrap();
        assert_eq!(args.get("verbose"), Some(&Value::Bool(false)));

        let mut wrong = IndexMap::new();
        wrong.insert(Arc::from("port"), Value::string("x"));
        assert!(ModuleArgs::new(&ctx, &params, wrong).is_err());
        assert!(ModuleArgs::new(&ctx, &params, IndexMap::new()).is_err());
    }

    #[test]
    fn test_struct_set_unknown_field() {
        let s = StructValue::new("Point").with_field("x", Value::Int(1));
        s.set("x", Value::Int(2)).unwrap();
        assert_eq!(s.get("x"), Some(Value::Int(2)));
        assert!(s.set("y", Value::Int(0)).is_err());
    }

    #[test]
    fn test_opaque_downcast() {
        let o = Opaque::new(42u32);
        assert_eq!(o.downcast_ref::<u32>(), Some(&42));
        assert!(o.downcast_ref::<i64>().is_none());
    }
}
