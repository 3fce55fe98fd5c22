//! Tests for free entities, resources and databases

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sapling::database::{open_database, Database, DummyDatabase, MigrationHandler, MigrationHandlers};
use sapling::filesystem::{Filesystem, MemoryFilesystem, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use sapling::pattern::ObjectPattern;
use sapling::registry;
use sapling::resource::{self, ResourceName};
use sapling::storage::{
    load_free_entity, JsonCodec, LoadFreeEntityArgs, MemoryStorage, SerializedValueStorage, ValueCodec,
};
use sapling::value::{Host, Path, Url};
use sapling::{Context, ContextConfig, Pattern, Permission, PermissionKind, RuntimeError, Value};

fn ctx() -> Context {
    Context::new(ContextConfig::new()).unwrap()
}

fn user_pattern() -> Pattern {
    Pattern::object(ObjectPattern::new().entry("name", Pattern::str()))
}

#[test]
fn test_free_object_round_trips_through_storage() {
    let ctx = ctx();
    let storage = Arc::new(MemoryStorage::new(Url::parse("db://host").unwrap()));
    let args = LoadFreeEntityArgs {
        path: Path::new("/users/1"),
        pattern: user_pattern(),
        storage: storage.clone(),
        initial_value: Some(Value::object(vec![("name", Value::string("x"))])),
    };

    let first = load_free_entity(&ctx, args.clone()).unwrap();
    let obj = first.as_object().unwrap();
    obj.set_prop(&ctx, "name", Value::string("y")).unwrap();
    assert_eq!(storage.writes().len(), 2);

    let reloaded = load_free_entity(&ctx, args).unwrap();
    assert_eq!(
        reloaded.as_object().unwrap().prop("name"),
        Some(Value::string("y"))
    );
    assert_eq!(storage.writes().len(), 2);
}

#[test]
fn test_registered_free_entity_loader() {
    registry::register_load_free_entity_fn(
        "list",
        Arc::new(|ctx: &Context, args: LoadFreeEntityArgs| {
            let serialized = args
                .storage
                .get_serialized(ctx, &args.path)?
                .unwrap_or_else(|| "[]".to_string());
            JsonCodec.decode(&serialized)
        }),
    );

    let ctx = ctx();
    let storage = Arc::new(MemoryStorage::new(Url::parse("db://host").unwrap()));
    storage
        .set_serialized(&ctx, &Path::new("/numbers"), "[1,2,3]")
        .unwrap();
    let value = load_free_entity(
        &ctx,
        LoadFreeEntityArgs {
            path: Path::new("/numbers"),
            pattern: Pattern::list_of(Pattern::int()),
            storage,
            initial_value: None,
        },
    )
    .unwrap();
    assert_eq!(value, Value::int_list(vec![1, 2, 3]));
}

#[test]
fn test_free_entity_key_must_be_absolute_file_path() {
    let ctx = ctx();
    let storage = Arc::new(MemoryStorage::new(Url::parse("db://host").unwrap()));
    let err = load_free_entity(
        &ctx,
        LoadFreeEntityArgs {
            path: Path::new("/users/"),
            pattern: user_pattern(),
            storage,
            initial_value: None,
        },
    );
    assert!(matches!(err, Err(RuntimeError::InvalidStorageKey(_))));
}

#[test]
fn test_read_json_resource() {
    let fs = Arc::new(MemoryFilesystem::new());
    fs.mkdir_all(&Path::new("/conf"), DEFAULT_DIR_MODE).unwrap();
    fs.write_file(
        &Path::new("/conf/app.json"),
        br#"{"name": "app", "ports": [80, 443]}"#,
        DEFAULT_FILE_MODE,
    )
    .unwrap();
    fs.write_file(&Path::new("/conf/raw"), b"plain", DEFAULT_FILE_MODE)
        .unwrap();

    let ctx = Context::new(
        ContextConfig::new()
            .with_permissions(vec![Permission::fs_read("/conf/*")])
            .with_filesystem(fs),
    )
    .unwrap();

    let config = resource::read_resource(&ctx, &Path::new("/conf/app.json"), None).unwrap();
    let obj = config.as_object().unwrap();
    assert_eq!(obj.prop("name"), Some(Value::string("app")));
    assert_eq!(obj.prop("ports"), Some(Value::int_list(vec![80, 443])));

    assert!(matches!(
        resource::read_resource(&ctx, &Path::new("/conf/raw"), None),
        Err(RuntimeError::ContentTypeParserNotFound(_))
    ));
    assert_eq!(
        resource::read_resource(&ctx, &Path::new("/conf/raw"), Some(resource::TEXT_PLAIN)).unwrap(),
        Value::string("plain")
    );
}

#[test]
fn test_resource_lock_serializes_holders() {
    let name = ResourceName::Path(Path::new("/storage-test/counter"));
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let name = name.clone();
            let inside = inside.clone();
            let overlaps = overlaps.clone();
            thread::spawn(move || {
                let ctx = ctx();
                for _ in 0..5 {
                    resource::acquire_resource(&ctx, &name).unwrap();
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    resource::release_resource(&name).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(!resource::is_resource_held(&name));
}

#[test]
fn test_open_and_migrate_database() {
    registry::register_open_db_fn(
        "memdb",
        Arc::new(|_, resource| Ok(Arc::new(DummyDatabase::new(resource.clone())) as Arc<dyn Database>)),
    );
    let ctx = Context::new(ContextConfig::new().with_permissions(vec![Permission::database(
        PermissionKind::Read,
        Host::new("memdb://main"),
    )]))
    .unwrap();

    let db = open_database(&ctx, &Value::host("memdb://main").unwrap()).unwrap();
    let schema = Pattern::object(
        ObjectPattern::new()
            .entry("users", Pattern::list_of(Pattern::str()))
            .optional_entry("notes", Pattern::str()),
    );
    let handlers = MigrationHandlers::new().include("/users", MigrationHandler::Value(Value::list(vec![])));
    db.update_schema(&ctx, &schema, &handlers).unwrap();

    let entities = db.load_top_level_entities(&ctx).unwrap();
    assert_eq!(entities.keys().map(String::as_str).collect::<Vec<_>>(), vec!["users"]);
    db.close(&ctx).unwrap();
    assert!(matches!(
        db.load_top_level_entities(&ctx),
        Err(RuntimeError::DatabaseClosed)
    ));
}
