//! Generic watcher backed by a bounded channel

use std::time::{Duration, Instant};

use crossbeam::channel::{after, bounded, select, Receiver, Sender, TrySendError};

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::signal::Signal;
use crate::value::Value;

use super::{Watcher, WatcherConfiguration};

/// Number of values a generic watcher buffers. When the buffer is full the
/// oldest value is dropped.
pub const GENERIC_WATCHER_CAPACITY: usize = 32;

/// Watcher buffering the values it is informed about.
pub struct GenericWatcher {
    config: WatcherConfiguration,
    sender: Sender<Value>,
    receiver: Receiver<Value>,
    stopped: Signal,
}

impl GenericWatcher {
    /// Create a watcher.
    pub fn new(config: WatcherConfiguration) -> Self {
        let (sender, receiver) = bounded(GENERIC_WATCHER_CAPACITY);
        Self {
            config,
            sender,
            receiver,
            stopped: Signal::new(),
        }
    }

    /// Number of buffered values.
    pub fn buffered(&self) -> usize {
        self.receiver.len()
    }
}

impl Watcher for GenericWatcher {
    fn config(&self) -> &WatcherConfiguration {
        &self.config
    }

    fn wait_next(
        &self,
        ctx: &Context,
        filter: Option<&Pattern>,
        timeout: Duration,
    ) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let done = ctx.done();
        let stopped = self.stopped.receiver();
        loop {
            if self.stopped.is_fired() {
                return Err(RuntimeError::StoppedWatcher);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(self.receiver) -> v => {
                    let Ok(v) = v else {
                        return Err(RuntimeError::StoppedWatcher);
                    };
                    match filter {
                        Some(f) if !f.test(ctx, &v) => continue,
                        _ => return Ok(v),
                    }
                }
                recv(done) -> _ => return Err(RuntimeError::DoneContext),
                recv(stopped) -> _ => return Err(RuntimeError::StoppedWatcher),
                recv(after(remaining)) -> _ => return Err(RuntimeError::WatchTimeout),
            }
        }
    }

    fn inform_about_async(&self, _ctx: &Context, value: Value) {
        if self.stopped.is_fired() {
            return;
        }
        let mut value = value;
        loop {
            match self.sender.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(v)) => {
                    // drop the oldest value
                    let _ = self.receiver.try_recv();
                    value = v;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn stop(&self) {
        self.stopped.fire();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }
}
