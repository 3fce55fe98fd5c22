//! Storage drivers and free entities
//!
//! A storage driver is a key-value map from paths to serialized values.
//! Keys are absolute paths that never end with `/`.
//!
//! A *free entity* is a value loaded from a storage driver and bound to it:
//! its URL is the driver's base URL joined with its key, and every later
//! mutation is written back with [`SerializedValueStorage::set_serialized`].

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Number};
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::pattern::Pattern;
use crate::registry;
use crate::value::{Dictionary, List, Object, Path, Url, Value};
use crate::watch::{Mutation, MutationMicrotask, MutationWatchingConfiguration, Watchable};

/// Contract of storage drivers.
pub trait SerializedValueStorage: Send + Sync {
    /// URL the keys are relative to.
    fn base_url(&self) -> Url;

    /// Serialized value stored at `key`, if any.
    fn get_serialized(&self, ctx: &Context, key: &Path) -> Result<Option<String>>;

    /// Check whether a value is stored at `key`.
    fn has(&self, ctx: &Context, key: &Path) -> Result<bool>;

    /// Store a serialized value at `key`, replacing the previous one.
    fn set_serialized(&self, ctx: &Context, key: &Path, serialized: &str) -> Result<()>;

    /// Store a serialized value at `key`; fails if a value is already there.
    fn insert_serialized(&self, ctx: &Context, key: &Path, serialized: &str) -> Result<()>;
}

/// Check that `key` is usable as a storage key.
pub fn check_storage_key(key: &Path) -> Result<()> {
    if !key.is_absolute() || key.is_dir_path() {
        return Err(RuntimeError::InvalidStorageKey(key.to_string()));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory storage
// ═══════════════════════════════════════════════════════════════════════

/// Storage driver keeping the serialized values in memory. Every write is
/// also appended to a log.
pub struct MemoryStorage {
    base_url: Url,
    entries: RwLock<IndexMap<Path, String>>,
    writes: Mutex<Vec<(Path, String)>>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            entries: RwLock::new(IndexMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Every `(key, serialized value)` written so far, oldest first.
    pub fn writes(&self) -> Vec<(Path, String)> {
        self.writes.lock().clone()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn write(&self, key: &Path, serialized: &str) {
        self.entries.write().insert(key.clone(), serialized.to_string());
        self.writes.lock().push((key.clone(), serialized.to_string()));
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("base_url", &self.base_url)
            .field("len", &self.len())
            .finish()
    }
}

impl SerializedValueStorage for MemoryStorage {
    fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    fn get_serialized(&self, _ctx: &Context, key: &Path) -> Result<Option<String>> {
        check_storage_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn has(&self, _ctx: &Context, key: &Path) -> Result<bool> {
        check_storage_key(key)?;
        Ok(self.entries.read().contains_key(key))
    }

    fn set_serialized(&self, _ctx: &Context, key: &Path, serialized: &str) -> Result<()> {
        check_storage_key(key)?;
        self.write(key, serialized);
        Ok(())
    }

    fn insert_serialized(&self, _ctx: &Context, key: &Path, serialized: &str) -> Result<()> {
        check_storage_key(key)?;
        if self.entries.read().contains_key(key) {
            return Err(anyhow::anyhow!("a value is already stored at {key}").into());
        }
        self.write(key, serialized);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Codec
// ═══════════════════════════════════════════════════════════════════════

/// Turns stored values into strings and back.
pub trait ValueCodec: Send + Sync {
    /// Serialize a value.
    fn encode(&self, value: &Value) -> Result<String>;

    /// Deserialize a value.
    fn decode(&self, serialized: &str) -> Result<Value>;
}

/// JSON codec. Objects, records and dictionaries become JSON objects; lists
/// and tuples become arrays; path-like and string-like values become
/// strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String> {
        let json = value_to_json(value)?;
        serde_json::to_string(&json).map_err(|e| RuntimeError::External(e.into()))
    }

    fn decode(&self, serialized: &str) -> Result<Value> {
        let json: serde_json::Value =
            serde_json::from_str(serialized).map_err(|e| RuntimeError::ParseFailure {
                input: serialized.to_string(),
                reason: e.to_string(),
            })?;
        Ok(json_to_value(&json))
    }
}

/// Convert a value to JSON.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    use serde_json::Value as Json;

    Ok(match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Byte(b) => Json::Number((*b).into()),
        Value::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| RuntimeError::type_error("finite float", value))?,
        Value::Path(p) => Json::String(p.to_string()),
        Value::Url(u) => Json::String(u.to_string()),
        Value::Host(h) => Json::String(h.to_string()),
        Value::List(list) => Json::Array(
            list.elements()
                .iter()
                .map(value_to_json)
                .collect::<Result<_>>()?,
        ),
        Value::Tuple(tuple) => Json::Array(
            tuple
                .elements()
                .iter()
                .map(value_to_json)
                .collect::<Result<_>>()?,
        ),
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj.entries() {
                map.insert(k.to_string(), value_to_json(&v)?);
            }
            Json::Object(map)
        }
        Value::Record(record) => {
            let mut map = Map::new();
            for (k, v) in record.iter() {
                map.insert(k.to_string(), value_to_json(v)?);
            }
            Json::Object(map)
        }
        Value::Dictionary(dict) => {
            let mut map = Map::new();
            for (k, v) in dict.entries() {
                map.insert(Dictionary::key_repr(&k)?, value_to_json(&v)?);
            }
            Json::Object(map)
        }
        other => match other.to_string_content() {
            Some(s) => Json::String(s),
            None => return Err(RuntimeError::type_error("serializable value", other)),
        },
    })
}

/// Convert JSON to a value. Integers that do not fit an `i64` become floats.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::string(s),
        Json::Array(elements) => {
            Value::List(List::from_values(elements.iter().map(json_to_value).collect()))
        }
        Json::Object(map) => Value::Object(Object::from_pairs(
            map.iter().map(|(k, v)| (k.as_str(), json_to_value(v))),
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Free entities
// ═══════════════════════════════════════════════════════════════════════

/// Arguments of a free-entity loader.
#[derive(Clone)]
pub struct LoadFreeEntityArgs {
    /// Key of the entity
    pub path: Path,
    /// Pattern the entity must match
    pub pattern: Pattern,
    /// Where the entity is stored
    pub storage: Arc<dyn SerializedValueStorage>,
    /// Value stored when nothing is stored at `path` yet
    pub initial_value: Option<Value>,
}

impl fmt::Debug for LoadFreeEntityArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFreeEntityArgs")
            .field("path", &self.path)
            .field("pattern", &self.pattern)
            .field("base_url", &self.storage.base_url())
            .finish_non_exhaustive()
    }
}

/// Load a free entity. The loader registered for the kind of the pattern is
/// used; object patterns fall back to the built-in object loader.
#[tracing::instrument(level = "debug", skip_all, fields(path = %args.path, kind = args.pattern.kind_name()))]
pub fn load_free_entity(ctx: &Context, args: LoadFreeEntityArgs) -> Result<Value> {
    check_storage_key(&args.path)?;
    let kind = args.pattern.kind_name();
    if let Some(load) = registry::load_free_entity_fn(kind) {
        return load(ctx, args);
    }
    match kind {
        "object" => load_object(ctx, args),
        other => Err(RuntimeError::NoLoadFreeEntityFn(other.to_string())),
    }
}

fn load_object(ctx: &Context, args: LoadFreeEntityArgs) -> Result<Value> {
    let LoadFreeEntityArgs {
        path,
        pattern,
        storage,
        initial_value,
    } = args;

    let (value, stored) = match storage.get_serialized(ctx, &path)? {
        Some(serialized) => (JsonCodec.decode(&serialized)?, true),
        None => {
            let initial = initial_value.ok_or_else(|| {
                RuntimeError::InvalidArgument(format!("nothing stored at {path} and no initial value"))
            })?;
            (initial, false)
        }
    };

    if !pattern.test(ctx, &value) {
        return Err(RuntimeError::type_error(format!("{:?}", pattern), &value));
    }
    let Value::Object(obj) = &value else {
        return Err(RuntimeError::type_error("object", &value));
    };
    if !stored {
        storage.insert_serialized(ctx, &path, &JsonCodec.encode(&value)?)?;
        debug!("initial value stored");
    }
    obj.set_url(storage.base_url().with_path(&path));
    persist_on_mutation(ctx, obj, path, storage)?;
    Ok(value)
}

/// Write the object back to the storage after every mutation.
fn persist_on_mutation(
    ctx: &Context,
    obj: &Arc<Object>,
    path: Path,
    storage: Arc<dyn SerializedValueStorage>,
) -> Result<()> {
    let weak: Weak<Object> = Arc::downgrade(obj);
    let microtask: MutationMicrotask = Arc::new(move |ctx: &Context, mutation: &Mutation| {
        let Some(obj) = weak.upgrade() else {
            return false;
        };
        trace!(%path, %mutation, "persisting entity");
        let res = JsonCodec
            .encode(&Value::Object(obj))
            .and_then(|serialized| storage.set_serialized(ctx, &path, &serialized));
        if let Err(e) = res {
            warn!(%path, error = %e, "failed to persist entity");
        }
        true
    });
    obj.on_mutation(ctx, microtask, MutationWatchingConfiguration::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::pattern::ObjectPattern;
    use pretty_assertions::assert_eq;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    fn storage() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new(Url::parse("db://host").unwrap()))
    }

    #[test]
    fn test_keys_must_not_end_with_slash() {
        let ctx = ctx();
        let storage = storage();
        assert!(matches!(
            storage.set_serialized(&ctx, &Path::new("/users/"), "{}"),
            Err(RuntimeError::InvalidStorageKey(_))
        ));
        assert!(matches!(
            storage.has(&ctx, &Path::new("users")),
            Err(RuntimeError::InvalidStorageKey(_))
        ));
    }

    #[test]
    fn test_insert_does_not_overwrite() {
        let ctx = ctx();
        let storage = storage();
        let key = Path::new("/a");
        storage.insert_serialized(&ctx, &key, "1").unwrap();
        assert!(storage.insert_serialized(&ctx, &key, "2").is_err());
        storage.set_serialized(&ctx, &key, "3").unwrap();
        assert_eq!(storage.get_serialized(&ctx, &key).unwrap(), Some("3".to_string()));
        assert!(storage.has(&ctx, &key).unwrap());
    }

    #[test]
    fn test_json_codec() {
        let value = Value::object(vec![
            ("name", Value::string("x")),
            ("tags", Value::list(vec![Value::Int(1), Value::Bool(true), Value::Nil])),
            ("ratio", Value::Float(0.5)),
        ]);
        let encoded = JsonCodec.encode(&value).unwrap();
        assert_eq!(encoded, r#"{"name":"x","tags":[1,true,null],"ratio":0.5}"#);
        assert_eq!(JsonCodec.decode(&encoded).unwrap(), value);

        assert!(JsonCodec.encode(&Value::Float(f64::NAN)).is_err());
        assert!(matches!(
            JsonCodec.decode("{"),
            Err(RuntimeError::ParseFailure { .. })
        ));
    }

    #[test]
    fn test_free_object_is_stored_and_persisted() {
        let ctx = ctx();
        let storage = storage();
        let pattern = Pattern::object(ObjectPattern::new().entry("name", Pattern::str()));
        let args = LoadFreeEntityArgs {
            path: Path::new("/users/1"),
            pattern,
            storage: storage.clone(),
            initial_value: Some(Value::object(vec![("name", Value::string("x"))])),
        };
        let value = load_free_entity(&ctx, args).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.url().unwrap().as_str(), "db://host/users/1");
        assert_eq!(storage.writes().len(), 1);

        obj.set_prop(&ctx, "name", Value::string("y")).unwrap();
        let writes = storage.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], (Path::new("/users/1"), r#"{"name":"y"}"#.to_string()));
    }

    #[test]
    fn test_free_object_is_loaded_from_storage() {
        let ctx = ctx();
        let storage = storage();
        storage
            .set_serialized(&ctx, &Path::new("/users/2"), r#"{"name":"stored"}"#)
            .unwrap();
        let args = LoadFreeEntityArgs {
            path: Path::new("/users/2"),
            pattern: Pattern::object(ObjectPattern::new().entry("name", Pattern::str())),
            storage: storage.clone(),
            initial_value: None,
        };
        let value = load_free_entity(&ctx, args).unwrap();
        assert_eq!(value.as_object().unwrap().prop("name"), Some(Value::string("stored")));
    }

    #[test]
    fn test_free_entity_errors() {
        let ctx = ctx();
        let storage = storage();
        let args = |pattern: Pattern, initial_value: Option<Value>| LoadFreeEntityArgs {
            path: Path::new("/e"),
            pattern,
            storage: storage.clone(),
            initial_value,
        };
        assert!(matches!(
            load_free_entity(&ctx, args(Pattern::tuple_of(Pattern::int()), None)),
            Err(RuntimeError::NoLoadFreeEntityFn(_))
        ));
        let int_object = Pattern::object(ObjectPattern::new().entry("n", Pattern::int()));
        assert!(load_free_entity(&ctx, args(int_object.clone(), None)).is_err());
        assert!(matches!(
            load_free_entity(&ctx, args(int_object, Some(Value::object(vec![("n", Value::string("no"))])))),
            Err(RuntimeError::TypeError { .. })
        ));
    }
}
