//! Events and event sources
//!
//! An event source calls its regular handlers with every event, in
//! registration order, on the emitting thread. Idle handlers are called by
//! the process-wide idle manager (see [`idle`]) once no recent event was
//! seen for a configured duration.

mod idle;

pub use idle::{IdleHandler, IdleHandlerId, IDLE_MANAGER_TICK, MAX_LAST_EVENT_AGE, MIN_LAST_EVENT_AGE};

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::registry;
use crate::value::Value;

use idle::IdleState;

/// Something that happened, with the time it happened.
#[derive(Debug, Clone)]
pub struct Event {
    /// When the event happened
    pub time: SystemTime,
    /// Payload
    pub value: Value,
}

impl Event {
    /// Event happening now.
    pub fn new(value: Value) -> Self {
        Self {
            time: SystemTime::now(),
            value,
        }
    }

    /// Age of the event at `now`; zero for events in the future.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.time).unwrap_or_default()
    }
}

/// Handler of regular events.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A source of events.
pub trait EventSource: Send + Sync {
    /// Add a handler called with every event. Adding the same handler twice
    /// fails with [`RuntimeError::HandlerAlreadyAdded`].
    fn on_event(&self, handler: EventHandler) -> Result<()>;

    /// Add an idle handler.
    fn on_idle(&self, handler: IdleHandler) -> IdleHandlerId;

    /// Remove an idle handler.
    fn remove_idle_handler(&self, id: IdleHandlerId);

    /// Stop emitting events and drop every handler.
    fn close(&self);

    /// Check whether the source is closed.
    fn is_closed(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════
// Handler management shared by event sources
// ═══════════════════════════════════════════════════════════════════════

/// Handler bookkeeping and event history of an event source. Concrete
/// sources embed it and forward their [`EventSource`] methods to it.
pub struct EventSourceBase {
    handlers: Mutex<Vec<EventHandler>>,
    idle: Mutex<IdleState>,
    history: Mutex<VecDeque<Event>>,
    closed: AtomicBool,
}

impl EventSourceBase {
    /// Create the base of an event source.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(Vec::new()),
            idle: Mutex::new(IdleState::default()),
            history: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Add a regular handler.
    pub fn on_event(&self, handler: EventHandler) -> Result<()> {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return Err(RuntimeError::HandlerAlreadyAdded);
        }
        handlers.push(handler);
        Ok(())
    }

    /// Add an idle handler; the source is handed to the idle manager.
    pub fn on_idle(self: &Arc<Self>, handler: IdleHandler) -> IdleHandlerId {
        let id = self.idle.lock().add(handler);
        idle::watch(self);
        id
    }

    /// Remove an idle handler.
    pub fn remove_idle_handler(&self, id: IdleHandlerId) {
        self.idle.lock().remove(id);
    }

    /// Number of events kept in the history.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Record an event and call the regular handlers. Panicking handlers are
    /// logged and skipped.
    pub fn dispatch(&self, event: Event) {
        if self.is_closed() {
            return;
        }
        {
            let max_age = self.idle.lock().max_minimum_age();
            let mut history = self.history.lock();
            history.push_back(event.clone());
            trim_history(&mut history, max_age, SystemTime::now());
        }
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!("event handler panicked");
            }
        }
    }

    /// Close the source.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("event source closed");
        self.handlers.lock().clear();
        self.idle.lock().clear();
        self.history.lock().clear();
    }

    /// Check whether the source is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Call the idle handlers whose idle condition holds at `now`.
    pub(crate) fn check_idle(&self, now: SystemTime) {
        if self.is_closed() {
            return;
        }
        let due = {
            let history = self.history.lock();
            self.idle.lock().due(&history, now)
        };
        for microtask in due {
            if catch_unwind(AssertUnwindSafe(|| microtask())).is_err() {
                warn!("idle handler panicked");
            }
        }
    }

    pub(crate) fn has_idle_handlers(&self) -> bool {
        !self.idle.lock().is_empty()
    }
}

/// Drop events older than twice the largest minimum age. Without idle
/// handlers only the newest event is kept.
fn trim_history(history: &mut VecDeque<Event>, max_age: Option<Duration>, now: SystemTime) {
    match max_age {
        Some(age) => {
            let horizon = age * 2;
            while history.front().is_some_and(|e| e.age(now) > horizon) {
                history.pop_front();
            }
        }
        None => {
            while history.len() > 1 {
                history.pop_front();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Programmatic event source
// ═══════════════════════════════════════════════════════════════════════

/// Event source whose events are emitted by its owner.
pub struct BasicEventSource {
    base: Arc<EventSourceBase>,
}

impl Default for BasicEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicEventSource {
    /// Create a source.
    pub fn new() -> Self {
        Self {
            base: EventSourceBase::new(),
        }
    }

    /// Emit an event carrying `value`.
    pub fn emit(&self, value: Value) {
        self.base.dispatch(Event::new(value));
    }

    /// Emit an event.
    pub fn emit_event(&self, event: Event) {
        self.base.dispatch(event);
    }

    /// The handler bookkeeping.
    pub fn base(&self) -> &Arc<EventSourceBase> {
        &self.base
    }
}

impl EventSource for BasicEventSource {
    fn on_event(&self, handler: EventHandler) -> Result<()> {
        self.base.on_event(handler)
    }

    fn on_idle(&self, handler: IdleHandler) -> IdleHandlerId {
        self.base.on_idle(handler)
    }

    fn remove_idle_handler(&self, id: IdleHandlerId) {
        self.base.remove_idle_handler(id);
    }

    fn close(&self) {
        self.base.close();
    }

    fn is_closed(&self) -> bool {
        self.base.is_closed()
    }
}

/// Create an event source for `resource` with the factory registered for
/// its scheme. Paths and path patterns use the `file` scheme.
pub fn new_event_source(ctx: &Context, resource: &Value) -> Result<Arc<dyn EventSource>> {
    let scheme = match resource {
        Value::Path(_) | Value::PathPattern(_) => "file".to_string(),
        Value::Url(url) => url.scheme().as_str().to_string(),
        Value::UrlPattern(pattern) => pattern
            .as_str()
            .split_once("://")
            .map(|(scheme, _)| scheme.to_string())
            .unwrap_or_default(),
        Value::Host(host) => host.scheme().as_str().to_string(),
        other => return Err(RuntimeError::type_error("resource", other)),
    };
    let factory = registry::event_source_factory(&scheme)
        .ok_or_else(|| RuntimeError::NoEventSourceFactory(scheme.clone()))?;
    debug!(%scheme, "creating event source");
    factory(ctx, resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handlers_are_called_in_order() {
        let source = BasicEventSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            let handler: EventHandler = Arc::new(move |e: &Event| {
                seen.lock().push(format!("{tag}:{}", e.value.as_int().unwrap_or(-1)));
            });
            source.on_event(handler).unwrap();
        }
        source.emit(Value::Int(1));
        assert_eq!(*seen.lock(), vec!["first:1".to_string(), "second:1".to_string()]);
    }

    #[test]
    fn test_handler_added_twice() {
        let source = BasicEventSource::new();
        let handler: EventHandler = Arc::new(|_: &Event| {});
        source.on_event(handler.clone()).unwrap();
        assert!(matches!(source.on_event(handler), Err(RuntimeError::HandlerAlreadyAdded)));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let source = BasicEventSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        source.on_event(Arc::new(|_: &Event| panic!("boom"))).unwrap();
        let counter = calls.clone();
        source
            .on_event(Arc::new(move |_: &Event| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        source.emit(Value::Nil);
        source.emit(Value::Nil);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_source_ignores_events() {
        let source = BasicEventSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        source
            .on_event(Arc::new(move |_: &Event| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        source.close();
        source.emit(Value::Nil);
        assert!(source.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_history_trimming() {
        let now = SystemTime::now();
        let event = |ago_ms: u64| Event {
            time: now - Duration::from_millis(ago_ms),
            value: Value::Nil,
        };
        let mut history: VecDeque<Event> = [event(500), event(150), event(10)].into_iter().collect();
        trim_history(&mut history, Some(Duration::from_millis(100)), now);
        assert_eq!(history.len(), 2);
        trim_history(&mut history, None, now);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_unknown_scheme() {
        let ctx = Context::new(crate::context::ContextConfig::new()).unwrap();
        let url = Value::url("nosuchscheme://host/x").unwrap();
        assert!(matches!(
            new_event_source(&ctx, &url),
            Err(RuntimeError::NoEventSourceFactory(_))
        ));
        assert!(new_event_source(&ctx, &Value::Int(1)).is_err());
    }
}
