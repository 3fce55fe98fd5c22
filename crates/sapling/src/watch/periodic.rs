//! Periodic watchers
//!
//! A periodic watcher only sees the latest value it was informed about
//! between two ticks. A single process-wide manager thread ticks every
//! [`PERIODIC_WATCHER_TICK`] and sends one empty signal to every watcher
//! whose period elapsed. Tick channels are pooled and reused.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{after, bounded, select, tick, unbounded, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::signal::Signal;
use crate::value::Value;

use super::{Watcher, WatcherConfiguration};

/// Tick of the periodic watcher manager.
pub const PERIODIC_WATCHER_TICK: Duration = Duration::from_micros(100);

const MAX_POOLED_TICK_CHANNELS: usize = 64;

type TickSlot = Arc<Mutex<Option<Receiver<()>>>>;

struct Subscribe {
    id: u64,
    period: Duration,
    slot: TickSlot,
    installed: WaitGroup,
}

struct ManagerChannels {
    subscribe: Sender<Subscribe>,
    unsubscribe: Sender<u64>,
}

static MANAGER: LazyLock<ManagerChannels> = LazyLock::new(|| {
    let (subscribe, subscriptions) = unbounded();
    let (unsubscribe, unsubscriptions) = unbounded();
    thread::Builder::new()
        .name("periodic-watchers".to_string())
        .spawn(move || run_manager(subscriptions, unsubscriptions))
        .map_err(|e| tracing::error!(error = %e, "failed to spawn periodic watcher manager"))
        .ok();
    ManagerChannels {
        subscribe,
        unsubscribe,
    }
});

struct Entry {
    id: u64,
    period: Duration,
    last: Instant,
    tick: (Sender<()>, Receiver<()>),
}

fn run_manager(subscriptions: Receiver<Subscribe>, unsubscriptions: Receiver<u64>) {
    debug!("periodic watcher manager started");
    let ticker = tick(PERIODIC_WATCHER_TICK);
    let mut entries: Vec<Entry> = Vec::new();
    let mut pool: Vec<(Sender<()>, Receiver<()>)> = Vec::new();
    loop {
        select! {
            recv(subscriptions) -> msg => {
                let Ok(msg) = msg else { return };
                let channel = pool.pop().unwrap_or_else(|| bounded(1));
                *msg.slot.lock() = Some(channel.1.clone());
                entries.push(Entry {
                    id: msg.id,
                    period: msg.period,
                    last: Instant::now(),
                    tick: channel,
                });
                drop(msg.installed);
            }
            recv(unsubscriptions) -> id => {
                let Ok(id) = id else { return };
                if let Some(pos) = entries.iter().position(|e| e.id == id) {
                    let entry = entries.swap_remove(pos);
                    while entry.tick.1.try_recv().is_ok() {}
                    if pool.len() < MAX_POOLED_TICK_CHANNELS {
                        pool.push(entry.tick);
                    }
                }
            }
            recv(ticker) -> _ => {
                let now = Instant::now();
                for entry in entries.iter_mut() {
                    if now.duration_since(entry.last) >= entry.period {
                        entry.last = now;
                        let _ = entry.tick.0.try_send(());
                    }
                }
            }
        }
    }
}

static NEXT_PERIODIC_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Watcher delivering at most one value (the latest) per period.
pub struct PeriodicWatcher {
    id: u64,
    config: WatcherConfiguration,
    period: Duration,
    latest: Mutex<Option<Value>>,
    tick: TickSlot,
    stopped: Signal,
}

impl PeriodicWatcher {
    /// Create a watcher and subscribe it to the manager. The tick channel is
    /// installed when this returns.
    pub fn new(config: WatcherConfiguration, period: Duration) -> Self {
        let id = NEXT_PERIODIC_WATCHER_ID.fetch_add(1, Ordering::Relaxed);
        let slot: TickSlot = Arc::new(Mutex::new(None));
        let installed = WaitGroup::new();
        let sent = MANAGER.subscribe.send(Subscribe {
            id,
            period,
            slot: slot.clone(),
            installed: installed.clone(),
        });
        if sent.is_ok() {
            installed.wait();
        }
        trace!(id, ?period, "periodic watcher subscribed");
        Self {
            id,
            config,
            period,
            latest: Mutex::new(None),
            tick: slot,
            stopped: Signal::new(),
        }
    }

    /// The watcher's period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Watcher for PeriodicWatcher {
    fn config(&self) -> &WatcherConfiguration {
        &self.config
    }

    fn wait_next(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        timeout: Duration,
    ) -> Result<Value> {
        let Some(tick) = self.tick.lock().clone() else {
            return Err(RuntimeError::StoppedWatcher);
        };
        let deadline = Instant::now() + timeout;
        let done = ctx.done();
        let stopped = self.stopped.receiver();
        loop {
            if self.stopped.is_fired() {
                return Err(RuntimeError::StoppedWatcher);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(tick) -> _ => {
                    let latest = self.latest.lock().take();
                    match latest {
                        Some(v) if filter.map_or(true, |f| f.test(ctx, &v)) => return Ok(v),
                        _ => continue,
                    }
                }
                recv(done) -> _ => return Err(RuntimeError::DoneContext),
                recv(stopped) -> _ => return Err(RuntimeError::StoppedWatcher),
                recv(after(remaining)) -> _ => return Err(RuntimeError::WatchTimeout),
            }
        }
    }

    fn inform_about_async(&self, _ctx: &Context, value: Value) {
        if !self.stopped.is_fired() {
            *self.latest.lock() = Some(value);
        }
    }

    fn stop(&self) {
        if self.stopped.fire() {
            // the channel goes back to the manager's pool
            self.tick.lock().take();
            let _ = MANAGER.unsubscribe.send(self.id);
            trace!(id = self.id, "periodic watcher unsubscribed");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }
}

impl Drop for PeriodicWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    #[test]
    fn test_only_latest_value_is_seen() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let w = PeriodicWatcher::new(WatcherConfiguration::new(), Duration::from_millis(30));
        w.inform_about_async(&ctx, Value::Int(1));
        w.inform_about_async(&ctx, Value::Int(2));
        w.inform_about_async(&ctx, Value::Int(3));
        let v = w.wait_next(&ctx, None, Duration::from_secs(1)).unwrap();
        assert_eq!(v, Value::Int(3));
        assert!(matches!(
            w.wait_next(&ctx, None, Duration::from_millis(80)),
            Err(RuntimeError::WatchTimeout)
        ));
    }

    #[test]
    fn test_stopped_watcher() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let w = PeriodicWatcher::new(WatcherConfiguration::new(), Duration::from_millis(1));
        w.stop();
        assert!(w.is_stopped());
        assert!(matches!(
            w.wait_next(&ctx, None, Duration::from_millis(10)),
            Err(RuntimeError::StoppedWatcher)
        ));
    }
}
