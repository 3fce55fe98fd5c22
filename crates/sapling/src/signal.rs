//! One-shot broadcast signals
//!
//! A [`Signal`] is a zero-capacity channel whose sender is dropped when the
//! signal fires. Every receiver then observes a disconnection, which makes
//! the signal usable inside `crossbeam::channel::select!` next to regular
//! channels and timers. Contexts (done), transactions (finished), watchers
//! and streams (stopped) are all built on it.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// A one-shot signal observable by any number of receivers.
pub struct Signal {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
    fired: AtomicBool,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Create a signal that has not fired yet.
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            fired: AtomicBool::new(false),
        }
    }

    /// Fire the signal. Returns `true` for the first call only.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sender.lock().take();
        true
    }

    /// Check whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// A receiver that becomes ready (disconnected) once the signal fires.
    pub fn receiver(&self) -> Receiver<()> {
        self.receiver.clone()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signal(fired: {})", self.is_fired())
    }
}
