//! Global state of a running module

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a [`GlobalState`]. Smart locks are reentrant per state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u64);

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by every context of a running module.
#[derive(Debug)]
pub struct GlobalState {
    id: StateId,
    module_name: Arc<str>,
}

impl GlobalState {
    /// Create a state with a fresh id.
    pub fn new(module_name: &str) -> Arc<GlobalState> {
        Arc::new(GlobalState {
            id: StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed)),
            module_name: Arc::from(module_name),
        })
    }

    /// The state's id.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Name of the module the state belongs to.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ids_are_unique() {
        let a = GlobalState::new("a");
        let b = GlobalState::new("b");
        assert_ne!(a.id(), b.id());
        assert_eq!(b.module_name(), "b");
    }
}
