//! Process-wide registries
//!
//! Event-source factories, database openers, free-entity loaders, static
//! host-resolution checkers and content parsers are registered once per key
//! for the whole process. The `register_*` functions panic on a duplicate key
//! (a duplicate is a programming error); the `try_register_*` forms return
//! [`RuntimeError::NonUniqueRegistration`] instead.
//!
//! The registry also maps constraint ids to the patterns constrained values
//! must keep matching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::context::Context;
use crate::database::Database;
use crate::error::{RegistrationKind, Result, RuntimeError};
use crate::event::EventSource;
use crate::pattern::Pattern;
use crate::storage::LoadFreeEntityArgs;
use crate::value::{Host, Value};

/// Creates an event source for a resource (URL, path or path pattern).
pub type EventSourceFactory =
    Arc<dyn Fn(&Context, &Value) -> Result<Arc<dyn EventSource>> + Send + Sync>;

/// Opens a database given its resource (URL or host).
pub type OpenDatabaseFn = Arc<dyn Fn(&Context, &Value) -> Result<Arc<dyn Database>> + Send + Sync>;

/// Loads a free entity for a kind of pattern.
pub type LoadFreeEntityFn = Arc<dyn Fn(&Context, LoadFreeEntityArgs) -> Result<Value> + Send + Sync>;

/// Checks host resolution data before it is registered in a context.
pub type StaticHostCheckFn = Arc<dyn Fn(&Host, &Value) -> Result<()> + Send + Sync>;

/// Parses resource content of a mimetype.
pub type ContentParser = Arc<dyn Fn(&[u8]) -> Result<Value> + Send + Sync>;

#[derive(Default)]
struct Registry {
    event_source_factories: DashMap<Arc<str>, EventSourceFactory>,
    open_db_fns: DashMap<Arc<str>, OpenDatabaseFn>,
    load_free_entity_fns: DashMap<Arc<str>, LoadFreeEntityFn>,
    static_host_checkers: DashMap<Arc<str>, StaticHostCheckFn>,
    content_parsers: DashMap<Arc<str>, ContentParser>,
    constraints: DashMap<u64, Pattern>,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::default);

static NEXT_CONSTRAINT_ID: AtomicU64 = AtomicU64::new(1);

fn insert_unique<V>(
    map: &DashMap<Arc<str>, V>,
    kind: RegistrationKind,
    key: &str,
    value: V,
) -> Result<()> {
    match map.entry(Arc::from(key)) {
        Entry::Occupied(_) => Err(RuntimeError::non_unique(kind, key)),
        Entry::Vacant(slot) => {
            debug!(%kind, key, "registered");
            slot.insert(value);
            Ok(())
        }
    }
}

fn or_panic(res: Result<()>) {
    if let Err(e) = res {
        panic!("{e}");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Event sources
// ═══════════════════════════════════════════════════════════════════════

/// Register the event-source factory of a scheme.
///
/// # Panics
///
/// Panics if a factory is already registered for `scheme`.
pub fn register_event_source_factory(scheme: &str, factory: EventSourceFactory) {
    or_panic(try_register_event_source_factory(scheme, factory));
}

/// Register the event-source factory of a scheme.
pub fn try_register_event_source_factory(scheme: &str, factory: EventSourceFactory) -> Result<()> {
    let map = &REGISTRY.event_source_factories;
    insert_unique(map, RegistrationKind::EventSourceFactory, scheme, factory)
}

/// Event-source factory of a scheme.
pub fn event_source_factory(scheme: &str) -> Option<EventSourceFactory> {
    REGISTRY.event_source_factories.get(scheme).map(|f| f.clone())
}

// ═══════════════════════════════════════════════════════════════════════
// Databases
// ═══════════════════════════════════════════════════════════════════════

/// Register the database opener of a scheme.
///
/// # Panics
///
/// Panics if an opener is already registered for `scheme`.
pub fn register_open_db_fn(scheme: &str, open: OpenDatabaseFn) {
    or_panic(try_register_open_db_fn(scheme, open));
}

/// Register the database opener of a scheme.
pub fn try_register_open_db_fn(scheme: &str, open: OpenDatabaseFn) -> Result<()> {
    insert_unique(&REGISTRY.open_db_fns, RegistrationKind::OpenDatabase, scheme, open)
}

/// Database opener of a scheme.
pub fn open_db_fn(scheme: &str) -> Option<OpenDatabaseFn> {
    REGISTRY.open_db_fns.get(scheme).map(|f| f.clone())
}

// ═══════════════════════════════════════════════════════════════════════
// Free entities
// ═══════════════════════════════════════════════════════════════════════

/// Register the free-entity loader of a pattern kind (`object`, `list`...).
///
/// # Panics
///
/// Panics if a loader is already registered for `pattern_kind`.
pub fn register_load_free_entity_fn(pattern_kind: &str, load: LoadFreeEntityFn) {
    or_panic(try_register_load_free_entity_fn(pattern_kind, load));
}

/// Register the free-entity loader of a pattern kind.
pub fn try_register_load_free_entity_fn(pattern_kind: &str, load: LoadFreeEntityFn) -> Result<()> {
    let map = &REGISTRY.load_free_entity_fns;
    insert_unique(map, RegistrationKind::LoadFreeEntity, pattern_kind, load)
}

/// Free-entity loader of a pattern kind.
pub fn load_free_entity_fn(pattern_kind: &str) -> Option<LoadFreeEntityFn> {
    REGISTRY.load_free_entity_fns.get(pattern_kind).map(|f| f.clone())
}

// ═══════════════════════════════════════════════════════════════════════
// Host resolution checkers
// ═══════════════════════════════════════════════════════════════════════

/// Register the static host-resolution checker of a scheme.
///
/// # Panics
///
/// Panics if a checker is already registered for `scheme`.
pub fn register_static_host_checker(scheme: &str, check: StaticHostCheckFn) {
    or_panic(try_register_static_host_checker(scheme, check));
}

/// Register the static host-resolution checker of a scheme.
pub fn try_register_static_host_checker(scheme: &str, check: StaticHostCheckFn) -> Result<()> {
    let map = &REGISTRY.static_host_checkers;
    insert_unique(map, RegistrationKind::StaticHostCheck, scheme, check)
}

/// Run the checker registered for the host's scheme, if any.
pub fn check_host_resolution_data(host: &Host, data: &Value) -> Result<()> {
    let check = REGISTRY
        .static_host_checkers
        .get(host.scheme().as_str())
        .map(|c| c.clone());
    match check {
        Some(check) => check(host, data),
        None => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Content parsers
// ═══════════════════════════════════════════════════════════════════════

/// Register the content parser of a mimetype.
///
/// # Panics
///
/// Panics if a parser is already registered for `mimetype`.
pub fn register_content_parser(mimetype: &str, parser: ContentParser) {
    or_panic(try_register_content_parser(mimetype, parser));
}

/// Register the content parser of a mimetype.
pub fn try_register_content_parser(mimetype: &str, parser: ContentParser) -> Result<()> {
    let map = &REGISTRY.content_parsers;
    insert_unique(map, RegistrationKind::ContentTypeParser, mimetype, parser)
}

/// Content parser of a mimetype.
pub fn content_parser(mimetype: &str) -> Option<ContentParser> {
    REGISTRY.content_parsers.get(mimetype).map(|p| p.clone())
}

// ═══════════════════════════════════════════════════════════════════════
// Constraints
// ═══════════════════════════════════════════════════════════════════════

/// Register a constraint and return its id (never 0).
pub fn register_constraint(pattern: Pattern) -> u64 {
    let id = NEXT_CONSTRAINT_ID.fetch_add(1, Ordering::Relaxed);
    REGISTRY.constraints.insert(id, pattern);
    id
}

/// Pattern of a constraint.
pub fn constraint(id: u64) -> Option<Pattern> {
    REGISTRY.constraints.get(&id).map(|p| p.clone())
}

/// Check that `value` satisfies the constraint `id`.
pub fn check_constraint(ctx: &Context, id: u64, value: &Value) -> Result<()> {
    let pattern = constraint(id)
        .ok_or_else(|| RuntimeError::ConstraintViolation(format!("unknown constraint {id}")))?;
    if pattern.test(ctx, value) {
        Ok(())
    } else {
        Err(RuntimeError::ConstraintViolation(format!(
            "value does not match {:?}",
            pattern
        )))
    }
}

/// Remove every registration. Meant for tests that need a pristine process
/// state; constraint ids keep increasing.
pub fn reset() {
    REGISTRY.event_source_factories.clear();
    REGISTRY.open_db_fns.clear();
    REGISTRY.load_free_entity_fns.clear();
    REGISTRY.static_host_checkers.clear();
    REGISTRY.content_parsers.clear();
    REGISTRY.constraints.clear();
    debug!("registry reset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    #[test]
    fn test_duplicate_registration_fails() {
        let check: StaticHostCheckFn = Arc::new(|_, _| Ok(()));
        try_register_static_host_checker("registry-test", check.clone()).unwrap();
        let res = try_register_static_host_checker("registry-test", check);
        assert!(matches!(
            res,
            Err(RuntimeError::NonUniqueRegistration {
                kind: RegistrationKind::StaticHostCheck,
                ..
            })
        ));
    }

    #[test]
    #[should_panic]
    fn test_register_panics_on_duplicate() {
        let parser: ContentParser = Arc::new(|_| Ok(Value::Nil));
        register_content_parser("application/x-registry-test", parser.clone());
        register_content_parser("application/x-registry-test", parser);
    }

    #[test]
    fn test_host_checker_runs_on_registration() {
        let check: StaticHostCheckFn = Arc::new(|_, data| match data {
            Value::Path(_) => Ok(()),
            other => Err(RuntimeError::type_error("path", other)),
        });
        register_static_host_checker("checkdb", check);

        let ctx = Context::new(ContextConfig::new()).unwrap();
        let host = Host::new("checkdb://main");
        assert!(ctx.add_host_resolution_data(host.clone(), Value::Int(1)).is_err());
        ctx.add_host_resolution_data(host.clone(), Value::path("/db")).unwrap();
        assert_eq!(ctx.host_resolution_data(&host), Some(Value::path("/db")));
    }

    #[test]
    fn test_constraints() {
        let ctx = Context::new(ContextConfig::new()).unwrap();
        let id = register_constraint(Pattern::int());
        assert!(id > 0);
        check_constraint(&ctx, id, &Value::Int(1)).unwrap();
        assert!(matches!(
            check_constraint(&ctx, id, &Value::Bool(true)),
            Err(RuntimeError::ConstraintViolation(_))
        ));
    }
}
