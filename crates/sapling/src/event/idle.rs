//! Idle handlers and the idle manager
//!
//! A single process-wide manager thread ticks every [`IDLE_MANAGER_TICK`]
//! and checks the event sources having idle handlers. An idle handler is
//! called at most once per idle phase: once the newest non-ignored event is
//! at least `minimum_last_event_age` old, it is not called again before a
//! newer event arrives.

use std::fmt;
use std::sync::{Arc, LazyLock, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{tick, unbounded, Sender};
use tracing::{debug, trace};

use super::{Event, EventSourceBase};

/// Tick of the idle manager.
pub const IDLE_MANAGER_TICK: Duration = Duration::from_millis(25);

/// Smallest minimum last-event age; smaller ages are raised to it.
pub const MIN_LAST_EVENT_AGE: Duration = IDLE_MANAGER_TICK;

/// Largest minimum last-event age (exclusive); larger ages are lowered.
pub const MAX_LAST_EVENT_AGE: Duration = Duration::from_secs(10);

/// Decides whether an event is ignored by an idle handler.
pub type IgnoreEventFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Configuration of an idle handler.
#[derive(Clone)]
pub struct IdleHandler {
    /// How old the newest non-ignored event must be
    pub minimum_last_event_age: Duration,
    /// Call the handler even if no event was ever seen
    pub dont_wait_for_first_event: bool,
    /// Events the handler does not care about
    pub ignore: Option<IgnoreEventFn>,
    /// The handler itself
    pub microtask: Arc<dyn Fn() + Send + Sync>,
}

impl IdleHandler {
    /// Handler called once no event was seen for `minimum_last_event_age`.
    pub fn new(minimum_last_event_age: Duration, microtask: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            minimum_last_event_age,
            dont_wait_for_first_event: false,
            ignore: None,
            microtask: Arc::new(microtask),
        }
    }

    /// Also call the handler before the first event.
    pub fn dont_wait_for_first_event(mut self) -> Self {
        self.dont_wait_for_first_event = true;
        self
    }

    /// Ignore the events accepted by `ignore`.
    pub fn ignoring(mut self, ignore: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.ignore = Some(Arc::new(ignore));
        self
    }

    fn clamped_age(&self) -> Duration {
        let max = MAX_LAST_EVENT_AGE - Duration::from_millis(1);
        self.minimum_last_event_age.clamp(MIN_LAST_EVENT_AGE, max)
    }
}

impl fmt::Debug for IdleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleHandler")
            .field("minimum_last_event_age", &self.minimum_last_event_age)
            .field("dont_wait_for_first_event", &self.dont_wait_for_first_event)
            .finish_non_exhaustive()
    }
}

/// Identifies an idle handler within its event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleHandlerId(u64);

struct IdleEntry {
    id: IdleHandlerId,
    handler: IdleHandler,
    /// Time of the newest event when the handler was last called (`Some(None)`
    /// if it was called before any event).
    last_call_for: Option<Option<SystemTime>>,
}

#[derive(Default)]
pub(super) struct IdleState {
    entries: Vec<IdleEntry>,
    next_id: u64,
}

impl IdleState {
    pub(super) fn add(&mut self, handler: IdleHandler) -> IdleHandlerId {
        self.next_id += 1;
        let id = IdleHandlerId(self.next_id);
        self.entries.push(IdleEntry {
            id,
            handler,
            last_call_for: None,
        });
        id
    }

    pub(super) fn remove(&mut self, id: IdleHandlerId) {
        self.entries.retain(|e| e.id != id);
    }

    pub(super) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(super) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(super) fn max_minimum_age(&self) -> Option<Duration> {
        self.entries.iter().map(|e| e.handler.clamped_age()).max()
    }

    /// Microtasks to call at `now`; marks them as called for the current
    /// idle phase.
    pub(super) fn due(
        &mut self,
        history: &std::collections::VecDeque<Event>,
        now: SystemTime,
    ) -> Vec<Arc<dyn Fn() + Send + Sync>> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            let handler = &entry.handler;
            let newest = history
                .iter()
                .rev()
                .find(|e| !handler.ignore.as_ref().is_some_and(|ignore| ignore(*e)));
            let idle = match newest {
                Some(event) => event.age(now) >= handler.clamped_age(),
                None => handler.dont_wait_for_first_event,
            };
            let phase = newest.map(|e| e.time);
            if idle && entry.last_call_for != Some(phase) {
                entry.last_call_for = Some(phase);
                due.push(handler.microtask.clone());
            }
        }
        due
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════

static MANAGER: LazyLock<Sender<Weak<EventSourceBase>>> = LazyLock::new(|| {
    let (sender, receiver) = unbounded::<Weak<EventSourceBase>>();
    thread::Builder::new()
        .name("idle-manager".to_string())
        .spawn(move || {
            debug!("idle manager started");
            let ticker = tick(IDLE_MANAGER_TICK);
            let mut sources: Vec<Weak<EventSourceBase>> = Vec::new();
            while ticker.recv().is_ok() {
                sources.extend(receiver.try_iter());
                let now = SystemTime::now();
                sources.retain(|weak| match weak.upgrade() {
                    Some(source) if !source.is_closed() && source.has_idle_handlers() => {
                        source.check_idle(now);
                        true
                    }
                    _ => false,
                });
            }
        })
        .map_err(|e| tracing::error!(error = %e, "failed to spawn idle manager"))
        .ok();
    sender
});

/// Hand an event source to the idle manager.
pub(super) fn watch(source: &Arc<EventSourceBase>) {
    trace!("event source handed to the idle manager");
    let _ = MANAGER.send(Arc::downgrade(source));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(age: Duration) -> (IdleHandler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = IdleHandler::new(age, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handler, calls)
    }

    fn call_due(state: &mut IdleState, history: &VecDeque<Event>, now: SystemTime) -> usize {
        let due = state.due(history, now);
        due.iter().for_each(|m| m());
        due.len()
    }

    #[test]
    fn test_called_once_per_phase() {
        let (handler, _) = counting(Duration::from_millis(100));
        let mut state = IdleState::default();
        state.add(handler);
        let t0 = SystemTime::now();
        let mut history = VecDeque::from(vec![Event {
            time: t0,
            value: crate::value::Value::Nil,
        }]);

        assert_eq!(call_due(&mut state, &history, t0 + Duration::from_millis(50)), 0);
        assert_eq!(call_due(&mut state, &history, t0 + Duration::from_millis(120)), 1);
        assert_eq!(call_due(&mut state, &history, t0 + Duration::from_millis(500)), 0);

        history.push_back(Event {
            time: t0 + Duration::from_millis(600),
            value: crate::value::Value::Nil,
        });
        assert_eq!(call_due(&mut state, &history, t0 + Duration::from_millis(650)), 0);
        assert_eq!(call_due(&mut state, &history, t0 + Duration::from_millis(800)), 1);
    }

    #[test]
    fn test_first_event() {
        let now = SystemTime::now();
        let history = VecDeque::new();

        let (waiting, _) = counting(Duration::from_millis(30));
        let mut state = IdleState::default();
        state.add(waiting);
        assert_eq!(call_due(&mut state, &history, now), 0);

        let (eager, _) = counting(Duration::from_millis(30));
        let mut state = IdleState::default();
        state.add(eager.dont_wait_for_first_event());
        assert_eq!(call_due(&mut state, &history, now), 1);
        assert_eq!(call_due(&mut state, &history, now), 0);
    }

    #[test]
    fn test_ignored_events() {
        let (handler, _) = counting(Duration::from_millis(100));
        let handler = handler.ignoring(|e| e.value.is_nil());
        let mut state = IdleState::default();
        state.add(handler);
        let t0 = SystemTime::now();
        let history = VecDeque::from(vec![
            Event {
                time: t0,
                value: crate::value::Value::Int(1),
            },
            Event {
                time: t0 + Duration::from_millis(90),
                value: crate::value::Value::Nil,
            },
        ]);
        assert_eq!(call_due(&mut state, &history, t0 + Duration::from_millis(110)), 1);
    }

    #[test]
    fn test_age_is_clamped() {
        let (short, _) = counting(Duration::from_millis(1));
        assert_eq!(short.clamped_age(), MIN_LAST_EVENT_AGE);
        let (long, _) = counting(Duration::from_secs(60));
        assert!(long.clamped_age() < MAX_LAST_EVENT_AGE);
    }
}
