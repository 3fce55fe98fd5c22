//! Watchers and mutation callbacks
//!
//! A [`Watchable`] value keeps two lists: its watchers ([`ValueWatchers`]) and
//! its mutation callbacks ([`MutationCallbacks`]). On every change the value
//! builds a [`Mutation`], calls the callbacks first and then informs the
//! watchers.

mod generic;
mod joined;
mod mutation;
mod periodic;

pub use generic::{GenericWatcher, GENERIC_WATCHER_CAPACITY};
pub use joined::JoinedWatchers;
pub use mutation::{Mutation, MutationKind, WatchingDepth};
pub use periodic::{PeriodicWatcher, PERIODIC_WATCHER_TICK};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::context::Context;
use crate::error::Result;
use crate::pattern::Pattern;
use crate::value::{Path, Value};

/// Configuration of a watcher.
#[derive(Clone, Default)]
pub struct WatcherConfiguration {
    /// Only values accepted by the filter are delivered
    pub filter: Option<Pattern>,
    /// Watching depth
    pub depth: WatchingDepth,
    /// Path mutations are relocalized onto
    pub path: Option<Path>,
}

impl WatcherConfiguration {
    /// Shallow configuration without filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: Pattern) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the depth.
    pub fn with_depth(mut self, depth: WatchingDepth) -> Self {
        self.depth = depth;
        self
    }

    /// Set the relocalization path.
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }
}

/// A sink for values (usually mutations).
pub trait Watcher: Send + Sync {
    /// The watcher's configuration.
    fn config(&self) -> &WatcherConfiguration;

    /// Block until a value accepted by `filter` arrives, the timeout elapses,
    /// the watcher is stopped or the context is cancelled.
    fn wait_next(&self, ctx: &Context, filter: Option<&Pattern>, timeout: Duration)
        -> Result<Value>;

    /// Deliver a value to the watcher without blocking.
    fn inform_about_async(&self, ctx: &Context, value: Value);

    /// Stop the watcher.
    fn stop(&self);

    /// Check whether the watcher is stopped.
    fn is_stopped(&self) -> bool;
}

/// Callback invoked with every mutation; returning `false` deregisters it.
pub type MutationMicrotask = Arc<dyn Fn(&Context, &Mutation) -> bool + Send + Sync>;

/// Configuration of a mutation callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationWatchingConfiguration {
    /// Watching depth
    pub depth: WatchingDepth,
}

impl MutationWatchingConfiguration {
    /// Configuration with a given depth.
    pub fn with_depth(depth: WatchingDepth) -> Self {
        Self { depth }
    }
}

/// Handle of a registered mutation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

static NEXT_CALLBACK_HANDLE: AtomicU64 = AtomicU64::new(1);

impl CallbackHandle {
    fn next() -> Self {
        CallbackHandle(NEXT_CALLBACK_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A value that can be watched.
pub trait Watchable {
    /// Create a watcher attached to the value.
    fn watcher(&self, ctx: &Context, config: WatcherConfiguration) -> Result<Arc<dyn Watcher>>;

    /// Register a mutation callback.
    fn on_mutation(
        &self,
        ctx: &Context,
        microtask: MutationMicrotask,
        config: MutationWatchingConfiguration,
    ) -> Result<CallbackHandle>;

    /// Remove a mutation callback.
    fn remove_mutation_callback(&self, ctx: &Context, handle: CallbackHandle);
}

// ═══════════════════════════════════════════════════════════════════════
// Value watchers
// ═══════════════════════════════════════════════════════════════════════

/// Watchers attached to a value.
///
/// `next_index` points to the first stopped slot so that new watchers reuse
/// it instead of growing the list.
#[derive(Default)]
pub struct ValueWatchers {
    watchers: Vec<Arc<dyn Watcher>>,
    next_index: usize,
}

impl ValueWatchers {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watcher, reusing a stopped slot when possible.
    pub fn add(&mut self, watcher: Arc<dyn Watcher>) {
        let free = (self.next_index..self.watchers.len()).find(|&i| self.watchers[i].is_stopped());
        match free {
            Some(i) => {
                self.watchers[i] = watcher;
                self.next_index = i + 1;
            }
            None => {
                self.watchers.push(watcher);
                self.next_index = self.watchers.len();
            }
        }
    }

    /// Number of slots (stopped watchers included).
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Check whether there is no slot.
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Check whether at least one watcher is running.
    pub fn has_running(&self) -> bool {
        self.watchers.iter().any(|w| !w.is_stopped())
    }

    /// Deliver `value` to every running watcher whose depth is at least
    /// `depth` and whose filter accepts the value. With `relocalize`,
    /// mutations are rebased onto each watcher's path.
    pub fn inform_about_async(
        &mut self,
        ctx: &Context,
        value: &Value,
        depth: WatchingDepth,
        relocalize: bool,
    ) {
        for (i, watcher) in self.watchers.iter().enumerate() {
            if watcher.is_stopped() {
                self.next_index = self.next_index.min(i);
                continue;
            }
            let config = watcher.config();
            if config.depth < depth {
                continue;
            }
            if let Some(filter) = &config.filter {
                if !filter.test(ctx, value) {
                    continue;
                }
            }
            let delivered = match (value, &config.path) {
                (Value::Mutation(m), Some(path)) if relocalize => {
                    Value::Mutation(Arc::new(m.relocalized(path)))
                }
                _ => value.clone(),
            };
            watcher.inform_about_async(ctx, delivered);
        }
    }

    /// Stop every watcher.
    pub fn stop_all(&mut self) {
        for w in &self.watchers {
            w.stop();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Mutation callbacks
// ═══════════════════════════════════════════════════════════════════════

struct CallbackEntry {
    handle: CallbackHandle,
    microtask: MutationMicrotask,
    config: MutationWatchingConfiguration,
}

/// Mutation callbacks attached to a value.
#[derive(Default)]
pub struct MutationCallbacks {
    entries: Vec<CallbackEntry>,
}

impl MutationCallbacks {
    /// Register a callback.
    pub fn add(
        &mut self,
        microtask: MutationMicrotask,
        config: MutationWatchingConfiguration,
    ) -> CallbackHandle {
        let handle = CallbackHandle::next();
        self.entries.push(CallbackEntry {
            handle,
            microtask,
            config,
        });
        handle
    }

    /// Remove a callback.
    pub fn remove(&mut self, handle: CallbackHandle) {
        self.entries.retain(|e| e.handle != handle);
    }

    /// Number of callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether there is no callback.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self, depth: WatchingDepth) -> Vec<(CallbackHandle, MutationMicrotask)> {
        self.entries
            .iter()
            .filter(|e| e.config.depth >= depth)
            .map(|e| (e.handle, e.microtask.clone()))
            .collect()
    }
}

/// Calls `callbacks` with a mutation outside of the list's lock. Callbacks
/// returning `false` are removed; panics are logged and the callback kept.
fn call_microtasks(callbacks: &Mutex<MutationCallbacks>, ctx: &Context, mutation: &Mutation) {
    let snapshot = callbacks.lock().snapshot(mutation.depth);
    let mut finished = Vec::new();
    for (handle, microtask) in snapshot {
        match catch_unwind(AssertUnwindSafe(|| microtask(ctx, mutation))) {
            Ok(true) => {}
            Ok(false) => finished.push(handle),
            Err(_) => warn!(mutation = %mutation, "mutation callback panicked"),
        }
    }
    if !finished.is_empty() {
        let mut guard = callbacks.lock();
        for handle in finished {
            guard.remove(handle);
        }
    }
}

/// Watchers and callbacks of a watchable value.
#[derive(Default)]
pub struct WatchSupport {
    watchers: Mutex<ValueWatchers>,
    callbacks: Mutex<MutationCallbacks>,
}

impl WatchSupport {
    /// Create an empty support.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a watcher.
    pub fn add_watcher(&self, watcher: Arc<dyn Watcher>) {
        self.watchers.lock().add(watcher);
    }

    /// Attach a callback.
    pub fn add_callback(
        &self,
        microtask: MutationMicrotask,
        config: MutationWatchingConfiguration,
    ) -> CallbackHandle {
        self.callbacks.lock().add(microtask, config)
    }

    /// Detach a callback.
    pub fn remove_callback(&self, handle: CallbackHandle) {
        self.callbacks.lock().remove(handle);
    }

    /// Number of attached callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Check whether anything observes the value.
    pub fn is_observed(&self) -> bool {
        !self.callbacks.lock().is_empty() || self.watchers.lock().has_running()
    }

    /// Propagate a mutation: callbacks first, then watchers.
    pub fn notify(&self, ctx: &Context, mutation: Mutation) {
        call_microtasks(&self.callbacks, ctx, &mutation);
        let depth = mutation.depth;
        let value = Value::Mutation(Arc::new(mutation));
        self.watchers
            .lock()
            .inform_about_async(ctx, &value, depth, true);
    }
}

/// Create the generic watcher of a value and attach it.
pub(crate) fn attach_generic_watcher(
    support: &WatchSupport,
    config: WatcherConfiguration,
) -> Arc<dyn Watcher> {
    let watcher: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(config));
    support.add_watcher(watcher.clone());
    watcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_value_watchers_reuse_stopped_slot() {
        let mut watchers = ValueWatchers::new();
        let w1: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        let w2: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        watchers.add(w1.clone());
        watchers.add(w2);
        w1.stop();

        let ctx = ctx();
        watchers.inform_about_async(&ctx, &Value::Int(1), WatchingDepth::Shallow, false);

        let w3: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        watchers.add(w3);
        assert_eq!(watchers.len(), 2);
    }

    #[test]
    fn test_inform_skips_shallower_watchers() {
        let ctx = ctx();
        let mut watchers = ValueWatchers::new();
        let shallow = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        watchers.add(shallow.clone());

        watchers.inform_about_async(&ctx, &Value::Int(1), WatchingDepth::Deep, false);
        let res = shallow.wait_next(&ctx, None, Duration::from_millis(10));
        assert!(matches!(res, Err(crate::RuntimeError::WatchTimeout)));
    }

    #[test]
    fn test_callbacks_deregister_and_survive_panics() {
        let ctx = ctx();
        let support = WatchSupport::new();
        support.add_callback(Arc::new(|_, _| false), MutationWatchingConfiguration::default());
        support.add_callback(
            Arc::new(|_, _| panic!("boom")),
            MutationWatchingConfiguration::default(),
        );
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        support.add_callback(
            Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
            MutationWatchingConfiguration::default(),
        );

        let m = Mutation::prop(MutationKind::AddProp, "a", Value::Int(1));
        support.notify(&ctx, m.clone());
        support.notify(&ctx, m);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(support.callback_count(), 2);
    }
}
