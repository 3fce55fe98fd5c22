//! Smart lock for mutable composite values
//!
//! A smart lock does nothing until its value is shared. Once shared, it is an
//! exclusive lock that is reentrant for the owning state (and for the owning
//! thread), so a value may be locked again while its own lock is held, e.g.
//! when a clone walks a cycle back to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::context::StateId;

struct LockOwner {
    state: Option<StateId>,
    thread: ThreadId,
    depth: usize,
}

/// Lock carried by mutable composites.
#[derive(Default)]
pub struct SmartLock {
    shared: AtomicBool,
    owner: Mutex<Option<LockOwner>>,
    released: Condvar,
}

impl SmartLock {
    /// Create a lock for a value that is not shared yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the lock effective.
    pub fn share(&self) {
        self.shared.store(true, Ordering::Release);
    }

    /// Check whether the value is shared.
    pub fn is_shared(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    /// Check whether the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Acquire the lock; released when the guard is dropped.
    pub fn lock(&self, state: Option<StateId>) -> SmartLockGuard<'_> {
        if !self.is_shared() {
            return SmartLockGuard { lock: None };
        }
        let current = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some(LockOwner {
                        state,
                        thread: current,
                        depth: 1,
                    });
                    break;
                }
                Some(o) if o.thread == current || (state.is_some() && o.state == state) => {
                    o.depth += 1;
                    break;
                }
                Some(_) => self.released.wait(&mut owner),
            }
        }
        SmartLockGuard { lock: Some(self) }
    }

    fn unlock(&self) {
        let mut owner = self.owner.lock();
        if let Some(o) = owner.as_mut() {
            o.depth -= 1;
            if o.depth == 0 {
                *owner = None;
                self.released.notify_all();
            }
        }
    }
}

impl std::fmt::Debug for SmartLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SmartLock(shared: {}, held: {})", self.is_shared(), self.is_held())
    }
}

/// RAII guard of a [`SmartLock`].
pub struct SmartLockGuard<'a> {
    lock: Option<&'a SmartLock>,
}

impl Drop for SmartLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock {
            lock.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_noop_until_shared() {
        let lock = SmartLock::new();
        let _guard = lock.lock(None);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_reentrant_on_same_thread() {
        let lock = SmartLock::new();
        lock.share();
        let g1 = lock.lock(None);
        let g2 = lock.lock(None);
        drop(g1);
        assert!(lock.is_held());
        drop(g2);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_exclusive_between_threads() {
        let lock = Arc::new(SmartLock::new());
        lock.share();
        let guard = lock.lock(None);

        let other = lock.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            let _g = other.lock(None);
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(50));
        drop(guard);
        let waited = handle.join().unwrap();
        assert!(waited >= Duration::from_millis(40));
    }
}
