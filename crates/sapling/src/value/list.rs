//! Lists over typed underlying lists

use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::{Context, StateId};
use crate::error::{type_name, Result, RuntimeError};
use crate::watch::{
    attach_generic_watcher, CallbackHandle, Mutation, MutationKind, MutationMicrotask,
    MutationWatchingConfiguration, WatchSupport, Watchable, Watcher, WatcherConfiguration,
    WatchingDepth,
};

use super::{Path, SmartLock, Value};

/// Underlying storage of a list. The variant is fixed at creation.
#[derive(Debug, Clone)]
pub enum ListData {
    /// Any values
    Values(Vec<Value>),
    /// Integers
    Ints(Vec<i64>),
    /// Booleans
    Bools(Vec<bool>),
    /// Strings
    Strings(Vec<Arc<str>>),
}

impl ListData {
    /// Name of the element kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ListData::Values(_) => "values",
            ListData::Ints(_) => "integers",
            ListData::Bools(_) => "booleans",
            ListData::Strings(_) => "strings",
        }
    }

    fn len(&self) -> usize {
        match self {
            ListData::Values(v) => v.len(),
            ListData::Ints(v) => v.len(),
            ListData::Bools(v) => v.len(),
            ListData::Strings(v) => v.len(),
        }
    }

    fn get(&self, index: usize) -> Option<Value> {
        match self {
            ListData::Values(v) => v.get(index).cloned(),
            ListData::Ints(v) => v.get(index).map(|n| Value::Int(*n)),
            ListData::Bools(v) => v.get(index).map(|b| Value::Bool(*b)),
            ListData::Strings(v) => v.get(index).map(|s| Value::Str(s.clone())),
        }
    }

    fn incompatible(&self, value: &Value) -> RuntimeError {
        RuntimeError::IncompatibleListElement {
            list_kind: self.kind_name(),
            got: type_name(value).to_string(),
        }
    }

    fn insert(&mut self, index: usize, value: Value) -> Result<()> {
        let accepted = match self {
            ListData::Values(v) => {
                v.insert(index, value.clone());
                true
            }
            ListData::Ints(v) => match value {
                Value::Int(n) => {
                    v.insert(index, n);
                    true
                }
                _ => false,
            },
            ListData::Bools(v) => match value {
                Value::Bool(b) => {
                    v.insert(index, b);
                    true
                }
                _ => false,
            },
            ListData::Strings(v) => match &value {
                Value::Str(s) => {
                    v.insert(index, s.clone());
                    true
                }
                _ => false,
            },
        };
        if accepted {
            Ok(())
        } else {
            Err(self.incompatible(&value))
        }
    }

    fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let accepted = match self {
            ListData::Values(v) => {
                v[index] = value.clone();
                true
            }
            ListData::Ints(v) => match value {
                Value::Int(n) => {
                    v[index] = n;
                    true
                }
                _ => false,
            },
            ListData::Bools(v) => match value {
                Value::Bool(b) => {
                    v[index] = b;
                    true
                }
                _ => false,
            },
            ListData::Strings(v) => match &value {
                Value::Str(s) => {
                    v[index] = s.clone();
                    true
                }
                _ => false,
            },
        };
        if accepted {
            Ok(())
        } else {
            Err(self.incompatible(&value))
        }
    }

    fn remove(&mut self, index: usize) -> Value {
        match self {
            ListData::Values(v) => v.remove(index),
            ListData::Ints(v) => Value::Int(v.remove(index)),
            ListData::Bools(v) => Value::Bool(v.remove(index)),
            ListData::Strings(v) => Value::Str(v.remove(index)),
        }
    }

    fn to_values(&self) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

/// A mutable list. Only shallow watching is supported.
pub struct List {
    data: RwLock<ListData>,
    lock: SmartLock,
    constraint_id: u64,
    watch: WatchSupport,
}

impl List {
    /// Create a list over the given storage.
    pub fn new(data: ListData) -> Arc<List> {
        Self::with_constraint(data, 0)
    }

    /// Create a constrained list.
    pub fn with_constraint(data: ListData, constraint_id: u64) -> Arc<List> {
        Arc::new(List {
            data: RwLock::new(data),
            lock: SmartLock::new(),
            constraint_id,
            watch: WatchSupport::new(),
        })
    }

    /// Create a list of arbitrary values.
    pub fn from_values(values: Vec<Value>) -> Arc<List> {
        Self::new(ListData::Values(values))
    }

    /// Create an integer list.
    pub fn from_ints(values: Vec<i64>) -> Arc<List> {
        Self::new(ListData::Ints(values))
    }

    /// Id of the constraint the list is bound to (0 for none).
    pub fn constraint_id(&self) -> u64 {
        self.constraint_id
    }

    /// The list's smart lock.
    pub fn lock(&self) -> &SmartLock {
        &self.lock
    }

    /// Name of the element kind.
    pub fn kind_name(&self) -> &'static str {
        self.data.read().kind_name()
    }

    /// Snapshot of the underlying storage.
    pub fn data(&self) -> ListData {
        self.data.read().clone()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Result<Value> {
        let data = self.data.read();
        data.get(index).ok_or(RuntimeError::IndexOutOfBounds {
            index,
            len: data.len(),
        })
    }

    /// Snapshot of the elements.
    pub fn elements(&self) -> Vec<Value> {
        self.data.read().to_values()
    }

    /// Append an element.
    pub fn append(&self, ctx: &Context, value: Value) -> Result<()> {
        let index = {
            let _guard = self.lock.lock(ctx.state_id());
            let mut data = self.data.write();
            let index = data.len();
            data.insert(index, value.clone())?;
            index
        };
        self.notify(ctx, MutationKind::InsertElemAtIndex, value, index);
        Ok(())
    }

    /// Append every element of `values`; nothing is appended on failure.
    pub fn append_all(&self, ctx: &Context, values: &[Value]) -> Result<()> {
        let start = {
            let _guard = self.lock.lock(ctx.state_id());
            let mut data = self.data.write();
            let mut extended = data.clone();
            let start = extended.len();
            for v in values {
                let at = extended.len();
                extended.insert(at, v.clone())?;
            }
            *data = extended;
            start
        };
        for (i, v) in values.iter().enumerate() {
            self.notify(ctx, MutationKind::InsertElemAtIndex, v.clone(), start + i);
        }
        Ok(())
    }

    /// Replace the element at `index`.
    pub fn set(&self, ctx: &Context, index: usize, value: Value) -> Result<()> {
        {
            let _guard = self.lock.lock(ctx.state_id());
            let mut data = self.data.write();
            if index >= data.len() {
                return Err(RuntimeError::IndexOutOfBounds {
                    index,
                    len: data.len(),
                });
            }
            data.set(index, value.clone())?;
        }
        self.notify(ctx, MutationKind::SetElemAtIndex, value, index);
        Ok(())
    }

    /// Remove the element at `index`.
    pub fn remove(&self, ctx: &Context, index: usize) -> Result<Value> {
        let removed = {
            let _guard = self.lock.lock(ctx.state_id());
            let mut data = self.data.write();
            if index >= data.len() {
                return Err(RuntimeError::IndexOutOfBounds {
                    index,
                    len: data.len(),
                });
            }
            data.remove(index)
        };
        self.notify(ctx, MutationKind::RemovePosition, Value::Nil, index);
        Ok(removed)
    }

    /// Replace the storage without notification (construction only).
    pub(crate) fn init_data(&self, data: ListData) {
        *self.data.write() = data;
    }

    /// Mark the list and its elements as shared.
    pub fn share(&self, state: Option<StateId>) {
        if self.lock.is_shared() {
            return;
        }
        self.lock.share();
        if let ListData::Values(values) = &*self.data.read() {
            for v in values {
                v.share(state);
            }
        }
    }

    fn notify(&self, ctx: &Context, kind: MutationKind, value: Value, index: usize) {
        let path = Path::root().join(&index.to_string());
        let mutation = Mutation::new(kind, value, Value::Int(index as i64), path);
        self.watch.notify(ctx, mutation);
    }
}

fn check_depth(depth: WatchingDepth) -> Result<()> {
    match depth {
        WatchingDepth::Shallow => Ok(()),
        WatchingDepth::Intermediate => Err(RuntimeError::IntermediateDepthWatchingNotSupported),
        WatchingDepth::Deep => Err(RuntimeError::DeepWatchingNotSupported),
    }
}

impl Watchable for List {
    fn watcher(&self, _ctx: &Context, config: WatcherConfiguration) -> Result<Arc<dyn Watcher>> {
        check_depth(config.depth)?;
        Ok(attach_generic_watcher(&self.watch, config))
    }

    fn on_mutation(
        &self,
        _ctx: &Context,
        microtask: MutationMicrotask,
        config: MutationWatchingConfiguration,
    ) -> Result<CallbackHandle> {
        check_depth(config.depth)?;
        Ok(self.watch.add_callback(microtask, config))
    }

    fn remove_mutation_callback(&self, _ctx: &Context, handle: CallbackHandle) {
        self.watch.remove_callback(handle);
    }
}
