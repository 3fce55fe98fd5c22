//! Immutable composites: records, tuples and key lists

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{type_name, Result, RuntimeError};

use super::Value;

fn check_immutable(what: &str, value: &Value) -> Result<()> {
    if value.is_mutable() {
        return Err(RuntimeError::InvalidArgument(format!(
            "{what} elements must be immutable, got {}",
            type_name(value)
        )));
    }
    Ok(())
}

/// An immutable keyed map.
#[derive(Debug, Clone)]
pub struct Record {
    entries: IndexMap<Arc<str>, Value>,
}

impl Record {
    /// Create a record. Every value must be immutable.
    pub fn new(entries: IndexMap<Arc<str>, Value>) -> Result<Record> {
        for v in entries.values() {
            check_immutable("record", v)?;
        }
        Ok(Record { entries })
    }

    /// Value of an entry.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Check whether an entry exists.
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.entries.keys()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the record is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An immutable sequence.
#[derive(Debug, Clone)]
pub struct Tuple {
    elements: Vec<Value>,
    constraint_id: u64,
}

impl Tuple {
    /// Create a tuple. Every element must be immutable.
    pub fn new(elements: Vec<Value>) -> Result<Tuple> {
        Self::with_constraint(elements, 0)
    }

    /// Create a constrained tuple.
    pub fn with_constraint(elements: Vec<Value>, constraint_id: u64) -> Result<Tuple> {
        for v in &elements {
            check_immutable("tuple", v)?;
        }
        Ok(Tuple {
            elements,
            constraint_id,
        })
    }

    /// Id of the constraint the tuple is bound to (0 for none).
    pub fn constraint_id(&self) -> u64 {
        self.constraint_id
    }

    /// Elements.
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Result<&Value> {
        self.elements.get(index).ok_or(RuntimeError::IndexOutOfBounds {
            index,
            len: self.elements.len(),
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check whether the tuple is empty.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// An immutable list of property names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList {
    /// Keys
    pub keys: Vec<Arc<str>>,
}

impl KeyList {
    /// Create a key list.
    pub fn new(keys: Vec<Arc<str>>) -> Self {
        Self { keys }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check whether the key list is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check whether `key` is in the list.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| &**k == key)
    }
}
