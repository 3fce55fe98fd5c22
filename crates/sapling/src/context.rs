//! Execution contexts
//!
//! A [`Context`] is the per-invocation object every runtime operation
//! consults: it holds the granted and forbidden permissions, the limiters,
//! the filesystem adapter, the per-name registrations (host aliases, named
//! patterns...) and the current transaction. Contexts form a tree: cancelling
//! a context cancels its descendants.

mod config;
mod state;

pub use config::ContextConfig;
pub use state::{GlobalState, StateId};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Instant;

use crossbeam::channel::{after, select, Receiver};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::{RegistrationKind, Result, RuntimeError};
use crate::filesystem::Filesystem;
use crate::limits::{LimitKind, Limiter, LIMIT_MONITOR_INTERVAL, TOKEN_BUCKET_CAPACITY_SCALE};
use crate::pattern::{ConstraintEvaluator, Pattern, PatternNamespace, SelfExprEvaluator};
use crate::permission::Permission;
use crate::registry;
use crate::signal::Signal;
use crate::transaction::Transaction;
use crate::value::{Host, Path, Url, Value};

/// Client used to reach a URL or a host (HTTP client, database client...).
pub trait ProtocolClient: Send + Sync {
    /// Name of the client, for diagnostics.
    fn name(&self) -> &str;

    /// Check whether the client can handle `url`.
    fn supports(&self, _url: &Url) -> bool {
        true
    }
}

type Shared<K, V> = Arc<RwLock<HashMap<K, V>>>;

/// Per-name registrations. Bound children share them, snapshots copy them.
#[derive(Clone, Default)]
struct Registrations {
    named_patterns: Shared<Arc<str>, Pattern>,
    pattern_namespaces: Shared<Arc<str>, Arc<PatternNamespace>>,
    host_aliases: Shared<Arc<str>, Host>,
    url_clients: Shared<Url, Arc<dyn ProtocolClient>>,
    host_clients: Shared<Host, Arc<dyn ProtocolClient>>,
    host_resolution: Shared<Host, Value>,
    user_data: Shared<Path, Value>,
}

fn copy_map<K: Clone + Eq + std::hash::Hash, V: Clone>(map: &Shared<K, V>) -> Shared<K, V> {
    Arc::new(RwLock::new(map.read().clone()))
}

impl Registrations {
    fn deep_copy(&self) -> Self {
        Self {
            named_patterns: copy_map(&self.named_patterns),
            pattern_namespaces: copy_map(&self.pattern_namespaces),
            host_aliases: copy_map(&self.host_aliases),
            url_clients: copy_map(&self.url_clients),
            host_clients: copy_map(&self.host_clients),
            host_resolution: copy_map(&self.host_resolution),
            user_data: copy_map(&self.user_data),
        }
    }
}

struct ContextInner {
    parent: Option<Context>,
    done: Signal,
    long_lived: bool,
    granted: RwLock<Vec<Permission>>,
    forbidden: RwLock<Vec<Permission>>,
    limiters: HashMap<Arc<str>, Limiter>,
    filesystem: Option<Arc<dyn Filesystem>>,
    registrations: Registrations,
    state: OnceLock<Arc<GlobalState>>,
    constraint_evaluator: Arc<dyn ConstraintEvaluator>,
    tx: Mutex<Option<Arc<Transaction>>>,
    children: Mutex<Vec<Weak<ContextInner>>>,
}

/// An execution context. Cloning a context yields another handle to the same
/// context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct Parts {
    parent: Option<Context>,
    long_lived: bool,
    granted: Vec<Permission>,
    forbidden: Vec<Permission>,
    limiters: HashMap<Arc<str>, Limiter>,
    filesystem: Option<Arc<dyn Filesystem>>,
    registrations: Registrations,
    state: Option<Arc<GlobalState>>,
    constraint_evaluator: Arc<dyn ConstraintEvaluator>,
}

impl Context {
    /// Build a context.
    ///
    /// With a parent, the context shares the parent's limiters (adding the
    /// configured limits the parent lacks), inherits its filesystem unless
    /// one is configured, and is cancelled with it. Every granted permission
    /// must be granted to the parent.
    pub fn new(config: ContextConfig) -> Result<Context> {
        let ContextConfig {
            permissions,
            forbidden,
            limits,
            parent,
            filesystem,
            long_lived,
            constraint_evaluator,
        } = config;

        let mut limiters = HashMap::new();
        if let Some(parent) = &parent {
            if parent.is_done() {
                return Err(RuntimeError::DoneContext);
            }
            if let Some(missing) = permissions.iter().find(|p| !parent.has_permission(p)) {
                return Err(RuntimeError::NotAllowed(missing.clone()));
            }
            limiters = parent.inner.limiters.clone();
        }
        for limit in limits {
            limiters
                .entry(limit.name.clone())
                .or_insert_with(|| Limiter::new(limit));
        }

        let filesystem = filesystem.or_else(|| parent.as_ref().and_then(|p| p.filesystem()));
        let constraint_evaluator = constraint_evaluator
            .or_else(|| parent.as_ref().map(|p| p.constraint_evaluator()))
            .unwrap_or_else(|| Arc::new(SelfExprEvaluator));

        Ok(Self::assemble(Parts {
            parent,
            long_lived,
            granted: permissions,
            forbidden,
            limiters,
            filesystem,
            registrations: Registrations::default(),
            state: None,
            constraint_evaluator,
        }))
    }

    fn assemble(parts: Parts) -> Context {
        let monitored = parts.parent.is_none()
            && parts
                .limiters
                .values()
                .any(|l| l.limit.kind == LimitKind::Total && l.limit.decrement.is_some());

        let state = OnceLock::new();
        if let Some(s) = parts.state {
            let _ = state.set(s);
        }
        let inner = Arc::new(ContextInner {
            parent: parts.parent,
            done: Signal::new(),
            long_lived: parts.long_lived,
            granted: RwLock::new(parts.granted),
            forbidden: RwLock::new(parts.forbidden),
            limiters: parts.limiters,
            filesystem: parts.filesystem,
            registrations: parts.registrations,
            state,
            constraint_evaluator: parts.constraint_evaluator,
            tx: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        });
        let ctx = Context { inner };

        if let Some(parent) = &ctx.inner.parent {
            let mut children = parent.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&ctx.inner));
            drop(children);
            // the parent may have been cancelled concurrently
            if parent.is_done() {
                ctx.cancel();
            }
        }
        if monitored {
            ctx.start_limit_monitor();
        }
        ctx
    }

    /// Create a child context that also shares this context's registrations
    /// (named patterns, namespaces, host aliases, protocol clients, host
    /// resolution data and user data) by reference.
    pub fn bound_child(&self) -> Result<Context> {
        if self.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        Ok(Self::assemble(Parts {
            parent: Some(self.clone()),
            long_lived: false,
            granted: self.inner.granted.read().clone(),
            forbidden: self.inner.forbidden.read().clone(),
            limiters: self.inner.limiters.clone(),
            filesystem: self.filesystem(),
            registrations: self.inner.registrations.clone(),
            state: self.inner.state.get().cloned(),
            constraint_evaluator: self.constraint_evaluator(),
        }))
    }

    /// Create a child context without the given permissions; they are added
    /// to the child's forbidden permissions.
    pub fn child_without(&self, removed: &[Permission]) -> Result<Context> {
        let granted: Vec<Permission> = self
            .inner
            .granted
            .read()
            .iter()
            .filter(|p| !removed.iter().any(|r| r.includes(p)))
            .cloned()
            .collect();
        let mut forbidden = self.inner.forbidden.read().clone();
        forbidden.extend(removed.iter().cloned());

        Context::new(
            ContextConfig::new()
                .with_parent(self)
                .with_permissions(granted)
                .with_forbidden(forbidden),
        )
    }

    /// Create an independent copy of the context.
    ///
    /// A context without parent gets fresh buckets holding the current
    /// available counts; registrations are copied, not shared.
    pub fn snapshot(&self) -> Result<Context> {
        if self.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        let limiters = if self.inner.parent.is_none() {
            self.inner
                .limiters
                .iter()
                .map(|(name, l)| (name.clone(), l.snapshot()))
                .collect()
        } else {
            self.inner.limiters.clone()
        };
        Ok(Self::assemble(Parts {
            parent: self.inner.parent.clone(),
            long_lived: self.inner.long_lived,
            granted: self.inner.granted.read().clone(),
            forbidden: self.inner.forbidden.read().clone(),
            limiters,
            filesystem: self.filesystem(),
            registrations: self.inner.registrations.deep_copy(),
            state: None,
            constraint_evaluator: self.constraint_evaluator(),
        }))
    }

    /// Parent context.
    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    fn assert_not_done(&self) {
        if self.is_done() {
            panic!("{}", RuntimeError::DoneContext);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Permissions
    // ═══════════════════════════════════════════════════════════════════

    /// Check whether the context has a permission.
    pub fn has_permission(&self, perm: &Permission) -> bool {
        if self.inner.forbidden.read().iter().any(|f| f.includes(perm)) {
            return false;
        }
        self.inner.granted.read().iter().any(|g| g.includes(perm))
    }

    /// Fail with `DoneContext` or `NotAllowed` unless the context has the
    /// permission.
    pub fn check_has_permission(&self, perm: &Permission) -> Result<()> {
        if self.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if !self.has_permission(perm) {
            trace!(permission = %perm, "permission denied");
            return Err(RuntimeError::NotAllowed(perm.clone()));
        }
        Ok(())
    }

    /// Remove permissions from the granted ones and forbid them.
    pub fn drop_permissions(&self, perms: &[Permission]) {
        self.assert_not_done();
        self.inner
            .granted
            .write()
            .retain(|g| !perms.iter().any(|p| p.includes(g)));
        self.inner.forbidden.write().extend(perms.iter().cloned());
    }

    /// Snapshot of the granted permissions.
    pub fn granted_permissions(&self) -> Vec<Permission> {
        self.inner.granted.read().clone()
    }

    /// Snapshot of the forbidden permissions.
    pub fn forbidden_permissions(&self) -> Vec<Permission> {
        self.inner.forbidden.read().clone()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Limits
    // ═══════════════════════════════════════════════════════════════════

    /// The limiter bound to `name`.
    pub fn limiter(&self, name: &str) -> Option<&Limiter> {
        self.inner.limiters.get(name)
    }

    /// Take `count` tokens from the limit `name` (no-op for unknown limits).
    ///
    /// Rate limits wait for the bucket to refill.
    ///
    /// # Panics
    ///
    /// Panics if `name` is a total limit with fewer than `count` tokens left.
    pub fn take(&self, name: &str, count: i64) -> Result<()> {
        let Some(limiter) = self.inner.limiters.get(name) else {
            return Ok(());
        };
        let scaled = count.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE);
        match limiter.limit.kind {
            LimitKind::Total => {
                if !limiter.bucket.try_take(scaled) {
                    panic!("{}", RuntimeError::LimitReached(name.to_string()));
                }
                Ok(())
            }
            LimitKind::ByteRate | LimitKind::SimpleRate => {
                limiter.bucket.wait_take(scaled, &self.done())
            }
        }
    }

    /// Take `count` tokens from the limit `name` without waiting.
    pub fn try_take(&self, name: &str, count: i64) -> Result<()> {
        let Some(limiter) = self.inner.limiters.get(name) else {
            return Ok(());
        };
        if self.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if limiter
            .bucket
            .try_take(count.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE))
        {
            Ok(())
        } else {
            debug!(limit = name, count, "limit reached");
            Err(RuntimeError::LimitReached(name.to_string()))
        }
    }

    /// Give `count` tokens back to the limit `name`.
    pub fn give_back(&self, name: &str, count: i64) {
        if let Some(limiter) = self.inner.limiters.get(name) {
            limiter
                .bucket
                .give_back(count.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE));
        }
    }

    /// Drain total buckets with a decrement function until the context is
    /// done; a negative count cancels the context.
    fn start_limit_monitor(&self) {
        let weak = Arc::downgrade(&self.inner);
        let done = self.done();
        let spawned = thread::Builder::new()
            .name("limit-monitor".to_string())
            .spawn(move || {
                let mut last = Instant::now();
                loop {
                    select! {
                        recv(done) -> _ => return,
                        recv(after(LIMIT_MONITOR_INTERVAL)) -> _ => {}
                    }
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let ctx = Context { inner };
                    let now = Instant::now();
                    let elapsed = now.duration_since(last);
                    last = now;
                    for limiter in ctx.inner.limiters.values() {
                        let Some(decrement) = &limiter.limit.decrement else {
                            continue;
                        };
                        if limiter.bucket.decrement(decrement(elapsed)) < 0 {
                            warn!(limit = %limiter.limit.name, "total limit exhausted, cancelling context");
                            ctx.cancel();
                            return;
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn limit monitor");
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Cancel the context and its descendants. Idempotent.
    ///
    /// Destroys the buckets the context owns (only contexts without parent
    /// own theirs) and rolls back the current transaction.
    pub fn cancel(&self) {
        if !self.inner.done.fire() {
            return;
        }
        debug!(long_lived = self.inner.long_lived, "context cancelled");

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            Context { inner: child }.cancel();
        }

        if self.inner.parent.is_none() {
            for limiter in self.inner.limiters.values() {
                limiter.bucket.destroy();
            }
        }

        let tx = self.inner.tx.lock().take();
        if let Some(tx) = tx {
            if !tx.is_finished() {
                tx.rollback(self);
            }
        }
    }

    /// Cancel the context unless it is long-lived.
    pub fn cancel_if_short_lived(&self) {
        if !self.inner.long_lived {
            self.cancel();
        }
    }

    /// Receiver that becomes ready once the context is cancelled.
    pub fn done(&self) -> Receiver<()> {
        self.inner.done.receiver()
    }

    /// Check whether the context is cancelled.
    pub fn is_done(&self) -> bool {
        self.inner.done.is_fired()
    }

    /// Check whether the context is long-lived.
    pub fn is_long_lived(&self) -> bool {
        self.inner.long_lived
    }

    // ═══════════════════════════════════════════════════════════════════
    // State, filesystem, transaction
    // ═══════════════════════════════════════════════════════════════════

    /// Associate a global state; this can only happen once.
    pub fn associate_state(&self, state: Arc<GlobalState>) -> Result<()> {
        self.assert_not_done();
        self.inner
            .state
            .set(state)
            .map_err(|_| RuntimeError::AlreadyAssociatedState)
    }

    /// The associated global state.
    pub fn state(&self) -> Result<Arc<GlobalState>> {
        self.inner
            .state
            .get()
            .cloned()
            .ok_or(RuntimeError::NoAssociatedState)
    }

    /// Id of the associated global state.
    pub fn state_id(&self) -> Option<StateId> {
        self.inner.state.get().map(|s| s.id())
    }

    /// The filesystem adapter.
    pub fn filesystem(&self) -> Option<Arc<dyn Filesystem>> {
        self.inner.filesystem.clone()
    }

    /// The evaluator of complex property constraints.
    pub fn constraint_evaluator(&self) -> Arc<dyn ConstraintEvaluator> {
        self.inner.constraint_evaluator.clone()
    }

    /// The current transaction.
    pub fn tx(&self) -> Option<Arc<Transaction>> {
        self.inner.tx.lock().clone()
    }

    /// Set the current transaction.
    pub fn set_tx(&self, tx: Option<Arc<Transaction>>) {
        self.assert_not_done();
        *self.inner.tx.lock() = tx;
    }

    /// Forget `tx` if it is the current transaction (never panics).
    pub(crate) fn clear_tx(&self, tx: &Arc<Transaction>) {
        let mut current = self.inner.tx.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, tx)) {
            *current = None;
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Registrations
    // ═══════════════════════════════════════════════════════════════════

    fn register<K, V>(
        &self,
        map: &Shared<K, V>,
        kind: RegistrationKind,
        key: K,
        value: V,
    ) -> Result<()>
    where
        K: Eq + std::hash::Hash + fmt::Display,
    {
        self.assert_not_done();
        let mut map = map.write();
        if map.contains_key(&key) {
            return Err(RuntimeError::non_unique(kind, key.to_string()));
        }
        map.insert(key, value);
        Ok(())
    }

    /// Register a host alias (`@api`).
    pub fn add_host_alias(&self, name: &str, host: Host) -> Result<()> {
        let map = &self.inner.registrations.host_aliases;
        self.register(map, RegistrationKind::HostAlias, Arc::from(name), host)
    }

    /// Host an alias stands for.
    pub fn resolve_host_alias(&self, name: &str) -> Option<Host> {
        self.inner.registrations.host_aliases.read().get(name).cloned()
    }

    /// Register a named pattern.
    pub fn add_named_pattern(&self, name: &str, pattern: Pattern) -> Result<()> {
        let map = &self.inner.registrations.named_patterns;
        self.register(map, RegistrationKind::Pattern, Arc::from(name), pattern)
    }

    /// Pattern registered under `name`.
    pub fn resolve_named_pattern(&self, name: &str) -> Option<Pattern> {
        self.inner.registrations.named_patterns.read().get(name).cloned()
    }

    /// Register a pattern namespace.
    pub fn add_pattern_namespace(&self, name: &str, namespace: Arc<PatternNamespace>) -> Result<()> {
        let map = &self.inner.registrations.pattern_namespaces;
        self.register(map, RegistrationKind::PatternNamespace, Arc::from(name), namespace)
    }

    /// Pattern namespace registered under `name`.
    pub fn resolve_pattern_namespace(&self, name: &str) -> Option<Arc<PatternNamespace>> {
        self.inner
            .registrations
            .pattern_namespaces
            .read()
            .get(name)
            .cloned()
    }

    /// Register the client used for a URL.
    pub fn add_url_protocol_client(&self, url: Url, client: Arc<dyn ProtocolClient>) -> Result<()> {
        let map = &self.inner.registrations.url_clients;
        self.register(map, RegistrationKind::ProtocolClient, url, client)
    }

    /// Register the client used for every URL of a host.
    pub fn add_host_protocol_client(
        &self,
        host: Host,
        client: Arc<dyn ProtocolClient>,
    ) -> Result<()> {
        let map = &self.inner.registrations.host_clients;
        self.register(map, RegistrationKind::ProtocolClient, host, client)
    }

    /// Client for `url`: the URL's own client, else its host's client.
    pub fn protocol_client(&self, url: &Url) -> Option<Arc<dyn ProtocolClient>> {
        if let Some(client) = self.inner.registrations.url_clients.read().get(url) {
            return Some(client.clone());
        }
        self.inner
            .registrations
            .host_clients
            .read()
            .get(&url.host())
            .filter(|c| c.supports(url))
            .cloned()
    }

    /// Register the resolution data of a host (`ldb://main` → a path). The
    /// data is checked by the static checker registered for the host's
    /// scheme, if any.
    pub fn add_host_resolution_data(&self, host: Host, data: Value) -> Result<()> {
        registry::check_host_resolution_data(&host, &data)?;
        let map = &self.inner.registrations.host_resolution;
        self.register(map, RegistrationKind::HostResolution, host, data)
    }

    /// Resolution data of a host.
    pub fn host_resolution_data(&self, host: &Host) -> Option<Value> {
        self.inner.registrations.host_resolution.read().get(host).cloned()
    }

    /// Store user data. The value must be sharable; it is shared on
    /// insertion.
    pub fn put_user_data(&self, path: Path, value: Value) -> Result<()> {
        self.assert_not_done();
        if !value.is_sharable() {
            return Err(RuntimeError::NotSharableUserDataValue(path.to_string()));
        }
        let mut map = self.inner.registrations.user_data.write();
        if map.contains_key(&path) {
            return Err(RuntimeError::NotUniqueUserDataEntry(path.to_string()));
        }
        value.share(self.state_id());
        map.insert(path, value);
        Ok(())
    }

    /// User data stored at `path`.
    pub fn user_data(&self, path: &Path) -> Option<Value> {
        self.inner.registrations.user_data.read().get(path).cloned()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("done", &self.is_done())
            .field("long_lived", &self.inner.long_lived)
            .field("granted", &*self.inner.granted.read())
            .field("limiters", &self.inner.limiters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Limit;
    use crate::permission::PermissionKind;
    use std::time::Duration;

    fn root(perms: Vec<Permission>) -> Context {
        Context::new(ContextConfig::new().with_permissions(perms)).unwrap()
    }

    struct ApiClient;

    impl ProtocolClient for ApiClient {
        fn name(&self) -> &str {
            "api"
        }

        fn supports(&self, url: &Url) -> bool {
            url.path().as_str().starts_with("/api")
        }
    }

    struct AnyClient;

    impl ProtocolClient for AnyClient {
        fn name(&self) -> &str {
            "any"
        }
    }

    #[test]
    fn test_protocol_client_lookup() {
        let ctx = root(vec![]);
        ctx.add_host_protocol_client(Host::new("https://example.com"), Arc::new(ApiClient))
            .unwrap();
        ctx.add_url_protocol_client(Url::parse("https://example.com/static/x").unwrap(), Arc::new(AnyClient))
            .unwrap();

        let api = ctx.protocol_client(&Url::parse("https://example.com/api/v1").unwrap());
        assert_eq!(api.map(|c| c.name().to_string()), Some("api".to_string()));
        assert!(ctx
            .protocol_client(&Url::parse("https://example.com/home").unwrap())
            .is_none());
        let own = ctx.protocol_client(&Url::parse("https://example.com/static/x").unwrap());
        assert_eq!(own.map(|c| c.name().to_string()), Some("any".to_string()));
        assert!(ctx
            .protocol_client(&Url::parse("https://other.org/api").unwrap())
            .is_none());
    }

    #[test]
    fn test_child_cannot_gain_permissions() {
        let parent = root(vec![Permission::fs_read("/a/...")]);
        let res = Context::new(
            ContextConfig::new()
                .with_parent(&parent)
                .with_permissions(vec![Permission::fs_write("/a/...")]),
        );
        assert!(matches!(res, Err(RuntimeError::NotAllowed(_))));
    }

    #[test]
    fn test_child_without_forbids() {
        let ctx = root(vec![Permission::fs_read("/a/..."), Permission::fs_write("/a/...")]);
        let child = ctx.child_without(&[Permission::fs_write("/a/...")]).unwrap();
        assert!(matches!(
            child.check_has_permission(&Permission::fs_write("/a/file")),
            Err(RuntimeError::NotAllowed(_))
        ));
        assert!(child.check_has_permission(&Permission::fs_read("/a/file")).is_ok());
        assert!(ctx.check_has_permission(&Permission::fs_write("/a/file")).is_ok());
    }

    #[test]
    fn test_drop_permissions() {
        let ctx = root(vec![Permission::global_var(PermissionKind::Read, "x")]);
        ctx.drop_permissions(&[Permission::global_var(PermissionKind::Read, "x")]);
        assert!(!ctx.has_permission(&Permission::global_var(PermissionKind::Read, "x")));
        assert_eq!(ctx.forbidden_permissions().len(), 1);
    }

    #[test]
    fn test_cancel_cascades_and_is_idempotent() {
        let ctx = root(vec![]);
        let child = ctx.bound_child().unwrap();
        ctx.cancel();
        ctx.cancel();
        assert!(child.is_done());
        assert!(matches!(
            child.check_has_permission(&Permission::fs_read("/")),
            Err(RuntimeError::DoneContext)
        ));
        assert!(child.done().recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    #[should_panic]
    fn test_mutating_done_context_panics() {
        let ctx = root(vec![]);
        ctx.cancel();
        let _ = ctx.add_host_alias("api", Host::new("https://example.com"));
    }

    #[test]
    fn test_bound_child_shares_registrations() {
        let ctx = root(vec![]);
        let child = ctx.bound_child().unwrap();
        child.add_named_pattern("small", Pattern::int()).unwrap();
        assert!(ctx.resolve_named_pattern("small").is_some());

        let copy = ctx.snapshot().unwrap();
        copy.add_named_pattern("other", Pattern::int()).unwrap();
        assert!(ctx.resolve_named_pattern("other").is_none());
        assert!(copy.resolve_named_pattern("small").is_some());
    }

    #[test]
    fn test_buckets_are_shared_with_children() {
        let ctx = Context::new(ContextConfig::new().with_limits(vec![Limit::total("n", 3)])).unwrap();
        let child = ctx.bound_child().unwrap();
        child.take("n", 2).unwrap();
        assert!(matches!(ctx.try_take("n", 2), Err(RuntimeError::LimitReached(_))));

        let snapshot = ctx.snapshot().unwrap();
        snapshot.take("n", 1).unwrap();
        ctx.take("n", 1).unwrap();
    }

    #[test]
    fn test_total_time_limit_cancels_context() {
        let ctx = Context::new(
            ContextConfig::new().with_limits(vec![Limit::total_time(Duration::from_millis(30))]),
        )
        .unwrap();
        assert!(ctx.done().recv_timeout(Duration::from_secs(2)).is_err());
        assert!(ctx.is_done());
    }

    #[test]
    fn test_user_data_must_be_sharable_and_unique() {
        let ctx = root(vec![]);
        ctx.put_user_data(Path::new("/x"), Value::Int(1)).unwrap();
        assert!(matches!(
            ctx.put_user_data(Path::new("/x"), Value::Int(2)),
            Err(RuntimeError::NotUniqueUserDataEntry(_))
        ));
        let opaque = Value::Opaque(Arc::new(crate::value::Opaque::new(1u8)));
        assert!(matches!(
            ctx.put_user_data(Path::new("/y"), opaque),
            Err(RuntimeError::NotSharableUserDataValue(_))
        ));
    }

    #[test]
    fn test_state_association_is_once_only() {
        let ctx = root(vec![]);
        assert!(matches!(ctx.state(), Err(RuntimeError::NoAssociatedState)));
        ctx.associate_state(GlobalState::new("main")).unwrap();
        assert!(matches!(
            ctx.associate_state(GlobalState::new("main")),
            Err(RuntimeError::AlreadyAssociatedState)
        ));
        assert!(ctx.state_id().is_some());
    }
}
