//! Fan-in of several watchers

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{after, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::signal::Signal;
use crate::value::Value;

use super::{Watcher, WatcherConfiguration};

struct JoinedState {
    remaining: VecDeque<Value>,
    pending: Vec<bool>,
}

/// Watcher returning the first value produced by any of its sub-watchers.
///
/// Each `wait_next` starts one read per idle sub-watcher; values that arrive
/// after the first one are buffered and returned by later calls.
pub struct JoinedWatchers {
    config: WatcherConfiguration,
    watchers: Vec<Arc<dyn Watcher>>,
    state: Arc<Mutex<JoinedState>>,
    arrivals: (Sender<()>, Receiver<()>),
    stopped: Signal,
}

impl JoinedWatchers {
    /// Join watchers.
    pub fn new(config: WatcherConfiguration, watchers: Vec<Arc<dyn Watcher>>) -> Self {
        let pending = vec![false; watchers.len()];
        Self {
            config,
            watchers,
            state: Arc::new(Mutex::new(JoinedState {
                remaining: VecDeque::new(),
                pending,
            })),
            arrivals: unbounded(),
            stopped: Signal::new(),
        }
    }

    /// The joined watchers.
    pub fn watchers(&self) -> &[Arc<dyn Watcher>] {
        &self.watchers
    }

    fn pop_matching(&self, ctx: &Context, filter: Option<&Pattern>) -> Option<Value> {
        let mut state = self.state.lock();
        let idx = state
            .remaining
            .iter()
            .position(|v| filter.map_or(true, |f| f.test(ctx, v)))?;
        state.remaining.remove(idx)
    }

    fn start_reads(&self, ctx: &Context, timeout: Duration) {
        let mut state = self.state.lock();
        for (i, watcher) in self.watchers.iter().enumerate() {
            if state.pending[i] || watcher.is_stopped() {
                continue;
            }
            state.pending[i] = true;
            let watcher = watcher.clone();
            let shared = self.state.clone();
            let notify = self.arrivals.0.clone();
            let ctx = ctx.clone();
            thread::spawn(move || {
                let res = watcher.wait_next(&ctx, None, timeout);
                let mut state = shared.lock();
                state.pending[i] = false;
                if let Ok(v) = res {
                    state.remaining.push_back(v);
                }
                drop(state);
                let _ = notify.send(());
            });
        }
    }
}

impl Watcher for JoinedWatchers {
    fn config(&self) -> &WatcherConfiguration {
        &self.config
    }

    fn wait_next(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        timeout: Duration,
    ) -> Result<Value> {
        if self.stopped.is_fired() {
            return Err(RuntimeError::StoppedWatcher);
        }
        let filter = filter.or(self.config.filter.as_ref());
        let deadline = Instant::now() + timeout;
        let done = ctx.done();
        let stopped = self.stopped.receiver();
        loop {
            if let Some(v) = self.pop_matching(ctx, filter) {
                return Ok(v);
            }
            if self.watchers.iter().all(|w| w.is_stopped()) {
                return Err(RuntimeError::StoppedWatcher);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RuntimeError::WatchTimeout);
            }
            self.start_reads(ctx, remaining);
            select! {
                recv(self.arrivals.1) -> _ => trace!("joined watcher: sub-watcher returned"),
                recv(done) -> _ => return Err(RuntimeError::DoneContext),
                recv(stopped) -> _ => return Err(RuntimeError::StoppedWatcher),
                recv(after(remaining)) -> _ => return Err(RuntimeError::WatchTimeout),
            }
        }
    }

    fn inform_about_async(&self, _ctx: &Context, value: Value) {
        self.state.lock().remaining.push_back(value);
        let _ = self.arrivals.0.send(());
    }

    fn stop(&self) {
        if self.stopped.fire() {
            for w in &self.watchers {
                w.stop();
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::watch::GenericWatcher;

    #[test]
    fn test_first_value_wins_rest_buffered() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let a: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        let b: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        a.inform_about_async(&ctx, Value::Int(1));
        b.inform_about_async(&ctx, Value::Int(2));

        let joined = JoinedWatchers::new(WatcherConfiguration::new(), vec![a.clone(), b.clone()]);
        let timeout = Duration::from_millis(500);
        let first = joined.wait_next(&ctx, None, timeout).unwrap();
        let second = joined.wait_next(&ctx, None, timeout).unwrap();
        let mut got = vec![first, second];
        got.sort_by_key(|v| match v {
            Value::Int(n) => *n,
            _ => 0,
        });
        assert_eq!(got, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_stop_stops_sub_watchers() {
        let a: Arc<dyn Watcher> = Arc::new(GenericWatcher::new(WatcherConfiguration::new()));
        let joined = JoinedWatchers::new(WatcherConfiguration::new(), vec![a.clone()]);
        joined.stop();
        assert!(a.is_stopped());
    }
}
