//! Objects: ordered, mutable, watchable keyed maps

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::context::{Context, StateId};
use crate::error::Result;
use crate::registry;
use crate::watch::{
    attach_generic_watcher, CallbackHandle, Mutation, MutationKind, MutationMicrotask,
    MutationWatchingConfiguration, WatchSupport, Watchable, Watcher, WatcherConfiguration,
    WatchingDepth,
};

use super::{Path, SmartLock, Url, Value};

/// Mutations coming from children are not relayed past this many path
/// segments (cyclic graphs would relay forever).
const MAX_RELAYED_PATH_SEGMENTS: usize = 16;

#[derive(Default)]
struct ChildWatching {
    depth: Option<WatchingDepth>,
    handles: HashMap<Arc<str>, (Value, CallbackHandle)>,
}

/// An object.
///
/// Objects created with a constraint id check every property change against
/// the registered constraint pattern.
pub struct Object {
    this: Weak<Object>,
    entries: RwLock<IndexMap<Arc<str>, Value>>,
    lock: SmartLock,
    constraint_id: u64,
    url: RwLock<Option<Url>>,
    watch: WatchSupport,
    children: Mutex<ChildWatching>,
}

impl Object {
    /// Create an object.
    pub fn new(entries: IndexMap<Arc<str>, Value>) -> Arc<Object> {
        Self::with_constraint(entries, 0)
    }

    /// Create an empty object.
    pub fn empty() -> Arc<Object> {
        Self::new(IndexMap::new())
    }

    /// Create an object from `(name, value)` pairs.
    pub fn from_pairs<K: AsRef<str>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Arc<Object> {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (Arc::from(k.as_ref()), v))
                .collect(),
        )
    }

    /// Create an object bound to a registered constraint.
    pub fn with_constraint(entries: IndexMap<Arc<str>, Value>, constraint_id: u64) -> Arc<Object> {
        Arc::new_cyclic(|this| Object {
            this: this.clone(),
            entries: RwLock::new(entries),
            lock: SmartLock::new(),
            constraint_id,
            url: RwLock::new(None),
            watch: WatchSupport::new(),
            children: Mutex::new(ChildWatching::default()),
        })
    }

    /// Id of the constraint the object is bound to (0 for none).
    pub fn constraint_id(&self) -> u64 {
        self.constraint_id
    }

    /// The object's smart lock.
    pub fn lock(&self) -> &SmartLock {
        &self.lock
    }

    /// Value of a property.
    pub fn prop(&self, name: &str) -> Option<Value> {
        self.entries.read().get(name).cloned()
    }

    /// Check whether a property exists.
    pub fn has_prop(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Property names in insertion order.
    pub fn prop_names(&self) -> Vec<Arc<str>> {
        self.entries.read().keys().cloned().collect()
    }

    /// Snapshot of the entries.
    pub fn entries(&self) -> Vec<(Arc<str>, Value)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether the object has no property.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// URL of the object when it is persisted.
    pub fn url(&self) -> Option<Url> {
        self.url.read().clone()
    }

    /// Set the URL of the object.
    pub fn set_url(&self, url: Url) {
        *self.url.write() = Some(url);
    }

    /// Insert a property without checks nor notification (construction only).
    pub(crate) fn init_prop(&self, name: Arc<str>, value: Value) {
        self.entries.write().insert(name, value);
    }

    /// Set a property, checking the constraint and notifying observers.
    pub fn set_prop(&self, ctx: &Context, name: &str, value: Value) -> Result<()> {
        let previous = {
            let _guard = self.lock.lock(ctx.state_id());
            let mut entries = self.entries.write();
            if self.constraint_id != 0 {
                let mut candidate = entries.clone();
                candidate.insert(Arc::from(name), value.clone());
                registry::check_constraint(
                    ctx,
                    self.constraint_id,
                    &Value::Object(Object::new(candidate)),
                )?;
            }
            entries.insert(Arc::from(name), value.clone())
        };

        self.rewatch_child(ctx, name, Some(&value));
        let kind = if previous.is_some() {
            MutationKind::UpdateProp
        } else {
            MutationKind::AddProp
        };
        self.watch.notify(ctx, Mutation::prop(kind, name, value));
        Ok(())
    }

    /// Remove a property. Returns the removed value.
    pub fn remove_prop(&self, ctx: &Context, name: &str) -> Result<Option<Value>> {
        let removed = {
            let _guard = self.lock.lock(ctx.state_id());
            let mut entries = self.entries.write();
            if self.constraint_id != 0 {
                let mut candidate = entries.clone();
                candidate.shift_remove(name);
                registry::check_constraint(
                    ctx,
                    self.constraint_id,
                    &Value::Object(Object::new(candidate)),
                )?;
            }
            entries.shift_remove(name)
        };
        if removed.is_some() {
            self.rewatch_child(ctx, name, None);
            self.watch
                .notify(ctx, Mutation::prop(MutationKind::RemoveProp, name, Value::Nil));
        }
        Ok(removed)
    }

    /// Mark the object and its property values as shared.
    pub fn share(&self, state: Option<StateId>) {
        if self.lock.is_shared() {
            return;
        }
        self.lock.share();
        for (_, v) in self.entries() {
            v.share(state);
        }
    }

    fn enable_child_watching(&self, ctx: &Context, depth: WatchingDepth) {
        let Some(child_depth) = depth.minus_one() else {
            return;
        };
        let previous = {
            let mut children = self.children.lock();
            if children.depth.is_some_and(|d| d >= depth) {
                return;
            }
            children.depth = Some(depth);
            std::mem::take(&mut children.handles)
        };
        for (_, (child, handle)) in previous {
            if let Some(w) = child.as_watchable() {
                w.remove_mutation_callback(ctx, handle);
            }
        }
        for (name, value) in self.entries() {
            if let Some(handle) = self.watch_child(ctx, &name, &value, child_depth) {
                self.children.lock().handles.insert(name, (value, handle));
            }
        }
    }

    /// Update the callback registered on the child at `name` after a change.
    fn rewatch_child(&self, ctx: &Context, name: &str, new_value: Option<&Value>) {
        let (depth, old) = {
            let mut children = self.children.lock();
            let Some(depth) = children.depth else {
                return;
            };
            (depth, children.handles.remove(name))
        };
        if let Some((child, handle)) = old {
            if let Some(w) = child.as_watchable() {
                w.remove_mutation_callback(ctx, handle);
            }
        }
        let (Some(value), Some(child_depth)) = (new_value, depth.minus_one()) else {
            return;
        };
        if let Some(handle) = self.watch_child(ctx, name, value, child_depth) {
            self.children
                .lock()
                .handles
                .insert(Arc::from(name), (value.clone(), handle));
        }
    }

    fn watch_child(
        &self,
        ctx: &Context,
        name: &str,
        child: &Value,
        depth: WatchingDepth,
    ) -> Option<CallbackHandle> {
        let watchable = child.as_watchable()?;
        let this = self.this.clone();
        let prefix = Path::root().join(name);
        let prop_name: Arc<str> = Arc::from(name);
        let child_id = child.transient_id();
        let microtask: MutationMicrotask = Arc::new(move |ctx, mutation| {
            let Some(parent) = this.upgrade() else {
                return false;
            };
            // the property now holds another value
            if parent.prop(&prop_name).and_then(|v| v.transient_id()) != child_id {
                return false;
            }
            if mutation.path.segments().len() < MAX_RELAYED_PATH_SEGMENTS {
                parent.watch.notify(ctx, mutation.from_child(&prefix, 1));
            }
            true
        });
        watchable
            .on_mutation(ctx, microtask.clone(), MutationWatchingConfiguration::with_depth(depth))
            .or_else(|_| {
                watchable.on_mutation(ctx, microtask, MutationWatchingConfiguration::default())
            })
            .ok()
    }
}

impl Watchable for Object {
    fn watcher(&self, ctx: &Context, config: WatcherConfiguration) -> Result<Arc<dyn Watcher>> {
        self.enable_child_watching(ctx, config.depth);
        Ok(attach_generic_watcher(&self.watch, config))
    }

    fn on_mutation(
        &self,
        ctx: &Context,
        microtask: MutationMicrotask,
        config: MutationWatchingConfiguration,
    ) -> Result<CallbackHandle> {
        self.enable_child_watching(ctx, config.depth);
        Ok(self.watch.add_callback(microtask, config))
    }

    fn remove_mutation_callback(&self, _ctx: &Context, handle: CallbackHandle) {
        self.watch.remove_callback(handle);
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.this.upgrade() {
            Some(this) => write!(f, "{:?}", Value::Object(this)),
            None => f.write_str("{...}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use std::time::Duration;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_set_and_remove_prop() {
        let ctx = ctx();
        let obj = Object::from_pairs([("a", Value::Int(1))]);
        obj.set_prop(&ctx, "b", Value::Int(2)).unwrap();
        assert_eq!(obj.prop("b"), Some(Value::Int(2)));
        assert_eq!(obj.prop_names().len(), 2);
        assert_eq!(obj.remove_prop(&ctx, "a").unwrap(), Some(Value::Int(1)));
        assert!(!obj.has_prop("a"));
    }

    #[test]
    fn test_concurrent_writes_cannot_both_pass_constraint() {
        use crate::pattern::{ObjectPattern, Pattern};
        use std::sync::Barrier;
        use std::thread;

        // at most one of `a` and `b`
        let constraint = registry::register_constraint(Pattern::union(vec![
            Pattern::object(ObjectPattern::new().optional_entry("a", Pattern::int())),
            Pattern::object(ObjectPattern::new().optional_entry("b", Pattern::int())),
        ]));

        for _ in 0..50 {
            let obj = Object::with_constraint(IndexMap::new(), constraint);
            let barrier = Arc::new(Barrier::new(2));
            let writers: Vec<_> = ["a", "b"]
                .into_iter()
                .map(|name| {
                    let obj = obj.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let ctx = ctx();
                        barrier.wait();
                        obj.set_prop(&ctx, name, Value::Int(1)).is_ok()
                    })
                })
                .collect();
            let accepted = writers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(accepted, 1);
            assert_eq!(obj.len(), 1);
        }
    }

    #[test]
    fn test_intermediate_watcher_sees_child_mutations() {
        let ctx = ctx();
        let child = Object::from_pairs([("x", Value::Int(0))]);
        let parent = Object::from_pairs([("child", Value::Object(child.clone()))]);
        let watcher = parent
            .watcher(
                &ctx,
                WatcherConfiguration::new().with_depth(WatchingDepth::Intermediate),
            )
            .unwrap();

        child.set_prop(&ctx, "x", Value::Int(1)).unwrap();
        let v = watcher.wait_next(&ctx, None, Duration::from_millis(100)).unwrap();
        let Value::Mutation(m) = v else {
            panic!("expected a mutation");
        };
        assert_eq!(m.path.as_str(), "/child/x");
        assert_eq!(m.depth, WatchingDepth::Intermediate);
    }

    #[test]
    fn test_replaced_child_is_no_longer_relayed() {
        let ctx = ctx();
        let child = Object::from_pairs([("x", Value::Int(0))]);
        let parent = Object::from_pairs([("child", Value::Object(child.clone()))]);
        let watcher = parent
            .watcher(&ctx, WatcherConfiguration::new().with_depth(WatchingDepth::Deep))
            .unwrap();
        parent.set_prop(&ctx, "child", Value::Int(3)).unwrap();
        let _ = watcher.wait_next(&ctx, None, Duration::from_millis(50)).unwrap();

        child.set_prop(&ctx, "x", Value::Int(1)).unwrap();
        assert!(watcher.wait_next(&ctx, None, Duration::from_millis(30)).is_err());
    }

    #[test]
    fn test_self_reference_deep_watching_terminates() {
        let ctx = ctx();
        let obj = Object::empty();
        obj.set_prop(&ctx, "self", Value::Object(obj.clone())).unwrap();
        let watcher = obj
            .watcher(&ctx, WatcherConfiguration::new().with_depth(WatchingDepth::Deep))
            .unwrap();
        obj.set_prop(&ctx, "n", Value::Int(1)).unwrap();
        assert!(watcher.wait_next(&ctx, None, Duration::from_millis(50)).is_ok());
    }
}
