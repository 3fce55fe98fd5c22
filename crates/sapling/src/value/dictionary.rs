//! Dictionaries: maps with arbitrary keys
//!
//! Keys are indexed by their canonical representation so that structurally
//! equal keys (two equal paths, two equal records...) address the same entry.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::context::{Context, StateId};
use crate::error::{Result, RuntimeError};
use crate::watch::{
    attach_generic_watcher, CallbackHandle, Mutation, MutationKind, MutationMicrotask,
    MutationWatchingConfiguration, WatchSupport, Watchable, Watcher, WatcherConfiguration,
    WatchingDepth,
};

use super::{Path, SmartLock, Value};

/// A mutable dictionary.
pub struct Dictionary {
    entries: RwLock<IndexMap<String, (Value, Value)>>,
    lock: SmartLock,
    watch: WatchSupport,
}

impl Dictionary {
    /// Create a dictionary from `(key, value)` pairs. Mutable keys are refused.
    pub fn new(pairs: impl IntoIterator<Item = (Value, Value)>) -> Result<Arc<Dictionary>> {
        let mut entries = IndexMap::new();
        for (k, v) in pairs {
            entries.insert(Self::key_repr(&k)?, (k, v));
        }
        Ok(Arc::new(Dictionary {
            entries: RwLock::new(entries),
            lock: SmartLock::new(),
            watch: WatchSupport::new(),
        }))
    }

    /// Canonical representation of a key.
    pub fn key_repr(key: &Value) -> Result<String> {
        if key.is_mutable() {
            return Err(RuntimeError::InvalidArgument(format!(
                "dictionary keys must be immutable, got {}",
                crate::error::type_name(key)
            )));
        }
        Ok(format!("{:?}", key))
    }

    /// The dictionary's smart lock.
    pub fn lock(&self) -> &SmartLock {
        &self.lock
    }

    /// Value at `key`.
    pub fn get(&self, key: &Value) -> Option<Value> {
        let repr = Self::key_repr(key).ok()?;
        self.entries.read().get(&repr).map(|(_, v)| v.clone())
    }

    /// Check whether `key` is present.
    pub fn has_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Snapshot of the entries.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries.read().values().cloned().collect()
    }

    /// Snapshot of the keys.
    pub fn keys(&self) -> Vec<Value> {
        self.entries.read().values().map(|(k, _)| k.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the value at `key`.
    pub fn set(&self, ctx: &Context, key: Value, value: Value) -> Result<()> {
        let repr = Self::key_repr(&key)?;
        let previous = {
            let _guard = self.lock.lock(ctx.state_id());
            self.entries
                .write()
                .insert(repr.clone(), (key.clone(), value.clone()))
        };
        let kind = if previous.is_some() {
            MutationKind::UpdateEntry
        } else {
            MutationKind::AddEntry
        };
        self.watch
            .notify(ctx, Mutation::new(kind, value, key, Path::root().join(&repr)));
        Ok(())
    }

    /// Remove the entry at `key`.
    pub fn remove(&self, ctx: &Context, key: &Value) -> Result<Option<Value>> {
        let repr = Self::key_repr(key)?;
        let removed = {
            let _guard = self.lock.lock(ctx.state_id());
            self.entries.write().shift_remove(&repr)
        };
        if removed.is_some() {
            self.watch.notify(
                ctx,
                Mutation::new(
                    MutationKind::RemoveEntry,
                    Value::Nil,
                    key.clone(),
                    Path::root().join(&repr),
                ),
            );
        }
        Ok(removed.map(|(_, v)| v))
    }

    /// Mark the dictionary and its values as shared.
    pub fn share(&self, state: Option<StateId>) {
        if self.lock.is_shared() {
            return;
        }
        self.lock.share();
        for (_, v) in self.entries() {
            v.share(state);
        }
    }

    /// Insert an entry without notification (construction only).
    pub(crate) fn init_entry(&self, key: Value, value: Value) -> Result<()> {
        let repr = Self::key_repr(&key)?;
        self.entries.write().insert(repr, (key, value));
        Ok(())
    }
}

impl Watchable for Dictionary {
    fn watcher(&self, _ctx: &Context, config: WatcherConfiguration) -> Result<Arc<dyn Watcher>> {
        if config.depth > WatchingDepth::Shallow {
            return Err(RuntimeError::IntermediateDepthWatchingNotSupported);
        }
        Ok(attach_generic_watcher(&self.watch, config))
    }

    fn on_mutation(
        &self,
        _ctx: &Context,
        microtask: MutationMicrotask,
        config: MutationWatchingConfiguration,
    ) -> Result<CallbackHandle> {
        if config.depth > WatchingDepth::Shallow {
            return Err(RuntimeError::IntermediateDepthWatchingNotSupported);
        }
        Ok(self.watch.add_callback(microtask, config))
    }

    fn remove_mutation_callback(&self, _ctx: &Context, handle: CallbackHandle) {
        self.watch.remove_callback(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    #[test]
    fn test_structurally_equal_keys_share_entry() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let dict = Dictionary::new(vec![]).unwrap();
        dict.set(&ctx, Value::path("/a"), Value::Int(1)).unwrap();
        dict.set(&ctx, Value::path("/a"), Value::Int(2)).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::path("/a")), Some(Value::Int(2)));
        assert_eq!(dict.get(&Value::string("/a")), None);
    }

    #[test]
    fn test_mutable_keys_are_refused() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let dict = Dictionary::new(vec![]).unwrap();
        let key = Value::object(vec![]);
        assert!(dict.set(&ctx, key, Value::Nil).is_err());
    }
}
