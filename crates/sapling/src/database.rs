//! Database drivers
//!
//! A database exposes its top-level entities and the object pattern they
//! follow (the schema). Updating the schema runs the migration computed by
//! [`migration_operations`] between the current and the next schema, with
//! user-provided handlers supplying the values of the migrated entries.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::{migration_operations, MigrationContext, MigrationOpKind, ObjectPattern, Pattern, PatternKind};
use crate::permission::{Permission, PermissionKind};
use crate::registry;
use crate::value::{Path, Value};

/// Computes the value of a migrated entry from its previous value (nil for
/// inclusions).
pub type MigrationFn = Arc<dyn Fn(&Context, &Value) -> Result<Value> + Send + Sync>;

/// Handler of a migration operation.
#[derive(Clone)]
pub enum MigrationHandler {
    /// Use this value
    Value(Value),
    /// Compute the value
    Function(MigrationFn),
}

impl MigrationHandler {
    fn run(&self, ctx: &Context, previous: &Value) -> Result<Value> {
        match self {
            MigrationHandler::Value(v) => Ok(v.clone()),
            MigrationHandler::Function(f) => f(ctx, previous),
        }
    }
}

impl fmt::Debug for MigrationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationHandler::Value(v) => write!(f, "Value({v:?})"),
            MigrationHandler::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Migration handlers keyed by pseudo-path.
#[derive(Debug, Clone, Default)]
pub struct MigrationHandlers {
    /// Handlers of removed entries
    pub deletions: IndexMap<Path, MigrationHandler>,
    /// Handlers of added entries
    pub inclusions: IndexMap<Path, MigrationHandler>,
    /// Handlers of replaced values
    pub replacements: IndexMap<Path, MigrationHandler>,
    /// Handlers of optional entries becoming required
    pub initializations: IndexMap<Path, MigrationHandler>,
}

impl MigrationHandlers {
    /// No handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inclusion handler.
    pub fn include(mut self, pseudo_path: &str, handler: MigrationHandler) -> Self {
        self.inclusions.insert(Path::new(pseudo_path), handler);
        self
    }
}

/// Contract of database drivers.
pub trait Database: Send + Sync {
    /// URL or host of the database.
    fn resource(&self) -> Value;

    /// Object pattern of the top-level entities.
    fn schema(&self) -> Pattern;

    /// Migrate the database to `schema`.
    fn update_schema(&self, ctx: &Context, schema: &Pattern, handlers: &MigrationHandlers) -> Result<()>;

    /// Top-level entities by name.
    fn load_top_level_entities(&self, ctx: &Context) -> Result<IndexMap<String, Value>>;

    /// Close the database. Closing twice is a no-op.
    fn close(&self, ctx: &Context) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Dummy database
// ═══════════════════════════════════════════════════════════════════════

struct DummyState {
    schema: Pattern,
    entities: IndexMap<String, Value>,
    schema_updated: bool,
    closed: bool,
}

/// In-memory database whose schema can be updated once, only by adding
/// top-level entities.
pub struct DummyDatabase {
    resource: Value,
    state: Mutex<DummyState>,
}

impl DummyDatabase {
    /// Empty database.
    pub fn new(resource: Value) -> Self {
        Self {
            resource,
            state: Mutex::new(DummyState {
                schema: Pattern::object(ObjectPattern::new()),
                entities: IndexMap::new(),
                schema_updated: false,
                closed: false,
            }),
        }
    }
}

impl Database for DummyDatabase {
    fn resource(&self) -> Value {
        self.resource.clone()
    }

    fn schema(&self) -> Pattern {
        self.state.lock().schema.clone()
    }

    fn update_schema(&self, ctx: &Context, schema: &Pattern, handlers: &MigrationHandlers) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RuntimeError::DatabaseClosed);
        }
        if state.schema_updated {
            return Err(RuntimeError::DatabaseSchemaAlreadyUpdatedOrNotAllowed);
        }
        if !matches!(schema.kind(), PatternKind::Object(_)) {
            return Err(RuntimeError::InvalidArgument(format!(
                "database schema must be an object pattern, got {:?}",
                schema
            )));
        }
        if !handlers.deletions.is_empty()
            || !handlers.replacements.is_empty()
            || !handlers.initializations.is_empty()
        {
            return Err(RuntimeError::NotImplemented(
                "only inclusion handlers are supported".into(),
            ));
        }

        let ops = migration_operations(&MigrationContext::new(), &state.schema, schema, "/")?;
        let mut included = IndexMap::new();
        for op in &ops {
            let MigrationOpKind::Include { optional } = op.kind else {
                return Err(RuntimeError::NotImplemented(format!(
                    "{} migration at {}",
                    op.kind.name(),
                    op.pseudo_path
                )));
            };
            let segments = op.pseudo_path.segments();
            let [name] = segments.as_slice() else {
                return Err(RuntimeError::NotImplemented(format!(
                    "deep inclusion at {}",
                    op.pseudo_path
                )));
            };
            let value = match handlers.inclusions.get(&op.pseudo_path) {
                Some(handler) => handler.run(ctx, &Value::Nil).map_err(|e| RuntimeError::MigrationFailure {
                    pseudo_path: op.pseudo_path.to_string(),
                    reason: e.to_string(),
                })?,
                None if optional => continue,
                None => {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "no inclusion handler for {}",
                        op.pseudo_path
                    )))
                }
            };
            if let Some(pattern) = &op.next {
                if !pattern.test(ctx, &value) {
                    return Err(RuntimeError::type_error(format!("{:?}", pattern), &value));
                }
            }
            included.insert(name.to_string(), value);
        }

        debug!(count = included.len(), "database schema updated");
        state.entities.extend(included);
        state.schema = schema.clone();
        state.schema_updated = true;
        Ok(())
    }

    fn load_top_level_entities(&self, _ctx: &Context) -> Result<IndexMap<String, Value>> {
        let state = self.state.lock();
        if state.closed {
            return Err(RuntimeError::DatabaseClosed);
        }
        Ok(state.entities.clone())
    }

    fn close(&self, _ctx: &Context) -> Result<()> {
        let mut state = self.state.lock();
        if !state.closed {
            debug!(resource = ?self.resource, "database closed");
            state.closed = true;
        }
        Ok(())
    }
}

/// Open the database at `resource` (URL or host) with the opener registered
/// for its scheme. The context needs the permission to read the database.
pub fn open_database(ctx: &Context, resource: &Value) -> Result<Arc<dyn Database>> {
    let host = match resource {
        Value::Url(url) => url.host(),
        Value::Host(host) => host.clone(),
        other => return Err(RuntimeError::type_error("url or host", other)),
    };
    ctx.check_has_permission(&Permission::database(PermissionKind::Read, host.clone()))?;
    let scheme = host.scheme();
    let open = registry::open_db_fn(scheme.as_str())
        .ok_or_else(|| RuntimeError::NoOpenDatabaseFn(scheme.as_str().to_string()))?;
    debug!(%host, "opening database");
    open(ctx, resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    fn db() -> DummyDatabase {
        DummyDatabase::new(Value::host("ldb://main").unwrap())
    }

    fn users_schema() -> Pattern {
        Pattern::object(ObjectPattern::new().entry("users", Pattern::list_of(Pattern::str())))
    }

    #[test]
    fn test_shallow_inclusion() {
        let ctx = ctx();
        let db = db();
        let handlers = MigrationHandlers::new().include(
            "/users",
            MigrationHandler::Function(Arc::new(|_, _| Ok(Value::list(vec![Value::string("a")])))),
        );
        db.update_schema(&ctx, &users_schema(), &handlers).unwrap();
        let entities = db.load_top_level_entities(&ctx).unwrap();
        assert_eq!(entities.get("users"), Some(&Value::list(vec![Value::string("a")])));
        assert_eq!(db.schema(), users_schema());

        assert!(matches!(
            db.update_schema(&ctx, &users_schema(), &handlers),
            Err(RuntimeError::DatabaseSchemaAlreadyUpdatedOrNotAllowed)
        ));
    }

    #[test]
    fn test_unsupported_migrations() {
        let ctx = ctx();
        let db = db();

        let mut handlers = MigrationHandlers::new();
        handlers
            .deletions
            .insert(Path::new("/users"), MigrationHandler::Value(Value::Nil));
        assert!(matches!(
            db.update_schema(&ctx, &users_schema(), &handlers),
            Err(RuntimeError::NotImplemented(_))
        ));

        assert!(matches!(
            db.update_schema(&ctx, &users_schema(), &MigrationHandlers::new()),
            Err(RuntimeError::InvalidArgument(_))
        ));

        let wrong = MigrationHandlers::new().include("/users", MigrationHandler::Value(Value::Int(1)));
        assert!(matches!(
            db.update_schema(&ctx, &users_schema(), &wrong),
            Err(RuntimeError::TypeError { .. })
        ));
        let failing = MigrationHandlers::new().include(
            "/users",
            MigrationHandler::Function(Arc::new(|_, _| Err(RuntimeError::InvalidArgument("no users".into())))),
        );
        assert!(matches!(
            db.update_schema(&ctx, &users_schema(), &failing),
            Err(RuntimeError::MigrationFailure { .. })
        ));
        assert!(db.load_top_level_entities(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_closed_database() {
        let ctx = ctx();
        let db = db();
        db.close(&ctx).unwrap();
        db.close(&ctx).unwrap();
        assert!(matches!(db.load_top_level_entities(&ctx), Err(RuntimeError::DatabaseClosed)));
        assert!(matches!(
            db.update_schema(&ctx, &users_schema(), &MigrationHandlers::new()),
            Err(RuntimeError::DatabaseClosed)
        ));
    }

    #[test]
    fn test_open_database() {
        let host = Value::host("nodb://main").unwrap();
        let denied = ctx();
        assert!(matches!(open_database(&denied, &host), Err(RuntimeError::NotAllowed(_))));

        let ctx = Context::new(ContextConfig::new().with_permissions(vec![Permission::database(
            PermissionKind::Read,
            crate::value::Host::new("nodb://main"),
        )]))
        .unwrap();
        assert!(matches!(open_database(&ctx, &host), Err(RuntimeError::NoOpenDatabaseFn(_))));

        registry::register_open_db_fn(
            "testdb",
            Arc::new(|_, resource| Ok(Arc::new(DummyDatabase::new(resource.clone())) as Arc<dyn Database>)),
        );
        let ctx = Context::new(ContextConfig::new().with_permissions(vec![Permission::database(
            PermissionKind::Read,
            crate::value::Host::new("testdb://main"),
        )]))
        .unwrap();
        let url = Value::url("testdb://main/x").unwrap();
        let db = open_database(&ctx, &url).unwrap();
        assert_eq!(db.resource(), url);
    }
}
