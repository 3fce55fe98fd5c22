//! Context configuration

use std::sync::Arc;

use crate::filesystem::Filesystem;
use crate::limits::Limit;
use crate::pattern::ConstraintEvaluator;
use crate::permission::Permission;

use super::Context;

/// Configuration of a new [`Context`].
///
/// # Example
///
/// ```
/// use sapling::{Context, ContextConfig, Limit, Permission};
///
/// let ctx = Context::new(
///     ContextConfig::new()
///         .with_permissions(vec![Permission::fs_read("/a/...")])
///         .with_limits(vec![Limit::total("fs/total-new-file", 10)]),
/// )
/// .unwrap();
///
/// assert!(ctx.has_permission(&Permission::fs_read("/a/b")));
/// ```
#[derive(Clone, Default)]
pub struct ContextConfig {
    /// Granted permissions
    pub permissions: Vec<Permission>,

    /// Forbidden permissions (take precedence over granted ones)
    pub forbidden: Vec<Permission>,

    /// Limits; a child context only adds the limits its parent lacks
    pub limits: Vec<Limit>,

    /// Parent context
    pub parent: Option<Context>,

    /// Filesystem adapter (inherited from the parent when absent)
    pub filesystem: Option<Arc<dyn Filesystem>>,

    /// Long-lived contexts are not cancelled by `cancel_if_short_lived`
    pub long_lived: bool,

    /// Evaluator of complex property constraints
    pub constraint_evaluator: Option<Arc<dyn ConstraintEvaluator>>,
}

impl ContextConfig {
    /// Empty configuration: no permission, no limit, no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the granted permissions.
    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the forbidden permissions.
    pub fn with_forbidden(mut self, forbidden: Vec<Permission>) -> Self {
        self.forbidden = forbidden;
        self
    }

    /// Set the limits.
    pub fn with_limits(mut self, limits: Vec<Limit>) -> Self {
        self.limits = limits;
        self
    }

    /// Set the parent context.
    pub fn with_parent(mut self, parent: &Context) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Set the filesystem adapter.
    pub fn with_filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Make the context long-lived.
    pub fn long_lived(mut self) -> Self {
        self.long_lived = true;
        self
    }

    /// Set the constraint evaluator.
    pub fn with_constraint_evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.constraint_evaluator = Some(evaluator);
        self
    }
}
