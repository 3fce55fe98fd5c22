//! # Sapling
//!
//! Core runtime of a capability-based scripting language.
//!
//! Sapling holds the parts of the language that do not depend on its
//! syntax: execution contexts granting permissions and enforcing limits,
//! the value model, the pattern matcher, streams, reactive primitives and
//! transactions.
//!
//! ## Architecture
//!
//! - **Contexts**: permissions, limits, cancellation and per-context registrations
//! - **Values**: mutable values guarded by smart locks, structural cloning and equality
//! - **Patterns**: type-like tests, iteration, string and markup matching, migrations
//! - **Streams**: element and byte streams, chunks, confluence
//! - **Reactivity**: watchers, mutation callbacks, pub-sub, event sources and idle handlers
//! - **Transactions**: isolation of writers from readonly transactions, resource map
//! - **Collaborators**: filesystem, storage and database contracts with in-memory adapters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod database;
pub mod error;
pub mod event;
pub mod filesystem;
pub mod iter;
pub mod limits;
pub mod pattern;
pub mod permission;
pub mod pubsub;
pub mod registry;
pub mod resource;
pub mod signal;
pub mod storage;
pub mod stream;
pub mod transaction;
pub mod value;
pub mod watch;

// Re-export main types
pub use context::{Context, ContextConfig};
pub use error::{Result, RuntimeError};
pub use limits::Limit;
pub use pattern::Pattern;
pub use permission::{Permission, PermissionKind};
pub use transaction::{Transaction, TransactionIsolator};
pub use value::Value;

/// Sapling version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
