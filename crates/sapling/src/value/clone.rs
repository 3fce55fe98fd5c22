//! Deep cloning with cycle preservation
//!
//! The clone protocol threads a [`CloneMap`] through the traversal: the clone
//! of a pointer-bearing value is registered before its children are cloned,
//! so a cycle back to it returns the clone already placed in the new graph.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Result, RuntimeError};

use super::*;

/// Identity map of a clone traversal: `source identity → { discriminator →
/// clone }`. The discriminator is the slice length for key lists and 0 for
/// every other value.
#[derive(Default)]
pub struct CloneMap {
    clones: HashMap<TransientId, HashMap<usize, Value>>,
}

impl CloneMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone already placed for `id` and `discriminator`.
    pub fn get(&self, id: TransientId, discriminator: usize) -> Option<&Value> {
        self.clones.get(&id)?.get(&discriminator)
    }

    /// Register the clone of `id`.
    pub fn insert(&mut self, id: TransientId, discriminator: usize, clone: Value) {
        self.clones.entry(id).or_default().insert(discriminator, clone);
    }

    /// Number of distinct source values cloned so far.
    pub fn len(&self) -> usize {
        self.clones.len()
    }

    /// Check whether nothing was cloned yet.
    pub fn is_empty(&self) -> bool {
        self.clones.is_empty()
    }
}

impl Value {
    /// Deep copy of the value. Cycles are preserved.
    pub fn deep_clone(&self) -> Result<Value> {
        self.clone_with(&mut CloneMap::new())
    }

    /// Deep copy of the value sharing `map` with the enclosing traversal.
    pub fn clone_with(&self, map: &mut CloneMap) -> Result<Value> {
        let discriminator = match self {
            Value::KeyList(k) => k.len(),
            _ => 0,
        };
        if let Some(id) = self.transient_id() {
            if let Some(clone) = map.get(id, discriminator) {
                return Ok(clone.clone());
            }
        }

        match self {
            Value::Object(obj) => {
                if obj.constraint_id() != 0 {
                    return Err(RuntimeError::NotClonable);
                }
                let _guard = obj.lock().lock(None);
                let copy = Object::empty();
                map.insert(TransientId::of(obj), 0, Value::Object(copy.clone()));
                for (name, value) in obj.entries() {
                    copy.init_prop(name, value.clone_with(map)?);
                }
                if let Some(url) = obj.url() {
                    copy.set_url(url);
                }
                Ok(Value::Object(copy))
            }
            Value::List(list) => {
                if list.constraint_id() != 0 {
                    return Err(RuntimeError::NotClonable);
                }
                let _guard = list.lock().lock(None);
                let copy = List::new(ListData::Values(Vec::new()));
                map.insert(TransientId::of(list), 0, Value::List(copy.clone()));
                let data = match list.data() {
                    ListData::Values(values) => ListData::Values(
                        values
                            .iter()
                            .map(|v| v.clone_with(map))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    other => other,
                };
                copy.init_data(data);
                Ok(Value::List(copy))
            }
            Value::Dictionary(dict) => {
                let _guard = dict.lock().lock(None);
                let copy = Dictionary::new(Vec::new())?;
                map.insert(TransientId::of(dict), 0, Value::Dictionary(copy.clone()));
                for (key, value) in dict.entries() {
                    copy.init_entry(key.clone_with(map)?, value.clone_with(map)?)?;
                }
                Ok(Value::Dictionary(copy))
            }
            Value::RuneSlice(slice) => {
                if slice.constraint_id() != 0 {
                    return Err(RuntimeError::NotClonable);
                }
                let copy = Value::RuneSlice(RuneSlice::new(slice.runes()));
                map.insert(TransientId::of(slice), 0, copy.clone());
                Ok(copy)
            }
            Value::ByteSlice(slice) => {
                if slice.constraint_id() != 0 {
                    return Err(RuntimeError::NotClonable);
                }
                if !slice.is_mutable() {
                    return Ok(self.clone());
                }
                let copy = Value::ByteSlice(ByteSlice::new(slice.bytes()));
                map.insert(TransientId::of(slice), 0, copy.clone());
                Ok(copy)
            }
            Value::BytesConcat(concat) if concat.is_mutable() => {
                let parts = concat
                    .parts
                    .iter()
                    .map(|p| p.clone_with(map))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::BytesConcat(Arc::new(BytesConcatenation::new(parts))))
            }
            Value::Tuple(tuple) => {
                if tuple.constraint_id() != 0 {
                    return Err(RuntimeError::NotClonable);
                }
                Ok(self.clone())
            }
            Value::KeyList(keys) => {
                let copy = Value::KeyList(Arc::new(KeyList::new(keys.keys.clone())));
                map.insert(TransientId::of(keys), discriminator, copy.clone());
                Ok(copy)
            }
            Value::Option(opt) if opt.value.is_mutable() => Ok(Value::Option(Arc::new(
                OptionValue {
                    name: opt.name.clone(),
                    value: opt.value.clone_with(map)?,
                },
            ))),
            Value::Struct(s) => {
                let mut copy = StructValue::new(&s.type_name);
                for (name, value) in s.fields() {
                    copy = copy.with_field(&name, value.clone_with(map)?);
                }
                Ok(Value::Struct(Arc::new(copy)))
            }
            Value::ModuleArgs(args) if self.is_mutable() => {
                let mut values = IndexMap::new();
                for (name, value) in args.iter() {
                    values.insert(name.clone(), value.clone_with(map)?);
                }
                Ok(Value::ModuleArgs(Arc::new(ModuleArgs::from_checked(values))))
            }
            Value::Pattern(p) => {
                if p.is_clonable() {
                    Ok(self.clone())
                } else {
                    Err(RuntimeError::NotClonable)
                }
            }
            Value::Function(f) if f.assigns_globals => Err(RuntimeError::NotClonable),
            Value::AstNode(_)
            | Value::PatternNamespace(_)
            | Value::Watcher(_)
            | Value::EventSource(_)
            | Value::Subscription(_)
            | Value::Opaque(_) => Err(RuntimeError::NotClonable),

            // Immutable values are their own clone
            _ => Ok(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_self_reference_points_to_clone() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let obj = Object::from_pairs([("n", Value::Int(1))]);
        obj.set_prop(&ctx, "self", Value::Object(obj.clone())).unwrap();

        let Value::Object(copy) = Value::Object(obj.clone()).deep_clone().unwrap() else {
            panic!("expected an object");
        };
        assert!(!Arc::ptr_eq(&copy, &obj));
        let Some(Value::Object(inner)) = copy.prop("self") else {
            panic!("expected an object property");
        };
        assert!(Arc::ptr_eq(&inner, &copy));
        assert_eq!(copy.prop("n"), Some(Value::Int(1)));
    }

    #[test]
    fn test_shared_child_is_cloned_once() {
        let child = Value::list(vec![Value::Int(1)]);
        let parent = Value::list(vec![child.clone(), child]);
        let Value::List(copy) = parent.deep_clone().unwrap() else {
            panic!("expected a list");
        };
        let elems = copy.elements();
        assert_eq!(elems[0].transient_id(), elems[1].transient_id());
    }

    #[test]
    fn test_constrained_values_are_not_clonable() {
        let values = vec![
            Value::List(List::with_constraint(ListData::Ints(vec![1]), 1)),
            Value::Tuple(Arc::new(Tuple::with_constraint(vec![], 1).unwrap())),
            Value::RuneSlice(RuneSlice::with_constraint(vec!['a'], 1)),
            Value::ByteSlice(ByteSlice::with_constraint(vec![1], 1)),
        ];
        for v in values {
            assert!(matches!(v.deep_clone(), Err(RuntimeError::NotClonable)));
        }
    }

    #[test]
    fn test_key_lists_use_length_discriminator() {
        let keys = Arc::new(KeyList::new(vec![Arc::from("a"), Arc::from("b")]));
        let mut map = CloneMap::new();
        let first = Value::KeyList(keys.clone()).clone_with(&mut map).unwrap();
        assert!(map.get(TransientId::of(&keys), 2).is_some());
        assert!(map.get(TransientId::of(&keys), 0).is_none());
        assert_eq!(first, Value::KeyList(keys));
    }
}
