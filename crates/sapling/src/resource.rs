//! Resources
//!
//! A resource is named by a path, a URL or a host. The process-wide resource
//! map holds one exclusive lock per resource name; entries are created on
//! first acquisition and never removed.
//!
//! This module also parses resource content by mimetype: parsers registered
//! in the [`registry`](crate::registry) take precedence over the built-in
//! `text/plain` and `application/json` parsers.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::filesystem;
use crate::registry;
use crate::storage::json_to_value;
use crate::value::{Host, Path, Url, Value};

/// Interval at which blocked acquisitions check their context.
const ACQUISITION_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Name of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceName {
    /// A filesystem path
    Path(Path),
    /// A URL
    Url(Url),
    /// A host
    Host(Host),
}

impl ResourceName {
    /// Resource name of a path, URL or host value.
    pub fn from_value(value: &Value) -> Result<ResourceName> {
        match value {
            Value::Path(p) => Ok(ResourceName::Path(p.clone())),
            Value::Url(u) => Ok(ResourceName::Url(u.clone())),
            Value::Host(h) => Ok(ResourceName::Host(h.clone())),
            other => Err(RuntimeError::type_error("resource name", other)),
        }
    }

    fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Path(p) => write!(f, "{}", p),
            ResourceName::Url(u) => write!(f, "{}", u),
            ResourceName::Host(h) => write!(f, "{}", h),
        }
    }
}

impl From<Path> for ResourceName {
    fn from(path: Path) -> Self {
        ResourceName::Path(path)
    }
}

impl From<Url> for ResourceName {
    fn from(url: Url) -> Self {
        ResourceName::Url(url)
    }
}

impl From<Host> for ResourceName {
    fn from(host: Host) -> Self {
        ResourceName::Host(host)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resource map
// ═══════════════════════════════════════════════════════════════════════

/// Exclusive lock that can be released by any thread.
#[derive(Default)]
struct ResourceLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl ResourceLock {
    fn try_lock(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            return false;
        }
        *held = true;
        true
    }

    /// Wait at most until `deadline`; `false` if the lock is still held.
    fn lock_until(&self, deadline: Instant) -> bool {
        let mut held = self.held.lock();
        while *held {
            if self.released.wait_until(&mut held, deadline).timed_out() {
                if *held {
                    return false;
                }
                break;
            }
        }
        *held = true;
        true
    }

    fn unlock(&self) -> bool {
        let mut held = self.held.lock();
        if !*held {
            return false;
        }
        *held = false;
        self.released.notify_one();
        true
    }

    fn is_locked(&self) -> bool {
        *self.held.lock()
    }
}

static RESOURCES: LazyLock<DashMap<String, Arc<ResourceLock>>> = LazyLock::new(DashMap::new);

fn lock_of(name: &ResourceName) -> Arc<ResourceLock> {
    RESOURCES.entry(name.key()).or_default().clone()
}

/// Acquire a resource, blocking until it is released by its holder. Fails
/// with [`RuntimeError::DoneContext`] if the context is done first.
pub fn acquire_resource(ctx: &Context, name: &ResourceName) -> Result<()> {
    let lock = lock_of(name);
    loop {
        if ctx.is_done() {
            return Err(RuntimeError::DoneContext);
        }
        if lock.lock_until(Instant::now() + ACQUISITION_CHECK_INTERVAL) {
            trace!(resource = %name, "resource acquired");
            return Ok(());
        }
    }
}

/// Acquire a resource if it is not held.
pub fn try_acquire_resource(name: &ResourceName) -> bool {
    let acquired = lock_of(name).try_lock();
    if acquired {
        trace!(resource = %name, "resource acquired");
    }
    acquired
}

/// Acquire a resource, waiting at most `timeout`.
pub fn acquire_resource_timeout(name: &ResourceName, timeout: Duration) -> Result<()> {
    if lock_of(name).lock_until(Instant::now() + timeout) {
        trace!(resource = %name, "resource acquired");
        Ok(())
    } else {
        debug!(resource = %name, ?timeout, "resource acquisition timed out");
        Err(RuntimeError::FailedToAcquireResource(name.to_string()))
    }
}

/// Release a resource.
///
/// # Panics
///
/// Panics if the resource is registered but not held.
pub fn release_resource(name: &ResourceName) -> Result<()> {
    let lock = RESOURCES
        .get(&name.key())
        .map(|entry| entry.clone())
        .ok_or_else(|| RuntimeError::CannotReleaseUnregisteredResource(name.to_string()))?;
    if !lock.unlock() {
        panic!("release of resource {name} which is not held");
    }
    trace!(resource = %name, "resource released");
    Ok(())
}

/// Check whether a resource is currently held.
pub fn is_resource_held(name: &ResourceName) -> bool {
    RESOURCES.get(&name.key()).is_some_and(|lock| lock.is_locked())
}

// ═══════════════════════════════════════════════════════════════════════
// Content
// ═══════════════════════════════════════════════════════════════════════

/// Mimetype of plain text.
pub const TEXT_PLAIN: &str = "text/plain";

/// Mimetype of JSON.
pub const APPLICATION_JSON: &str = "application/json";

fn parse_text(content: &[u8]) -> Result<Value> {
    std::str::from_utf8(content)
        .map(Value::string)
        .map_err(|e| RuntimeError::InvalidResourceContent(e.to_string()))
}

fn parse_json(content: &[u8]) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_slice(content)
        .map_err(|e| RuntimeError::InvalidResourceContent(e.to_string()))?;
    Ok(json_to_value(&json))
}

/// Parse resource content of a mimetype. Parameters of the mimetype
/// (`; charset=utf-8`) are ignored.
pub fn parse_content(mimetype: &str, content: &[u8]) -> Result<Value> {
    let essence = mimetype.split(';').next().unwrap_or_default().trim();
    if let Some(parser) = registry::content_parser(essence) {
        return parser(content);
    }
    match essence {
        TEXT_PLAIN => parse_text(content),
        APPLICATION_JSON => parse_json(content),
        other => Err(RuntimeError::ContentTypeParserNotFound(other.to_string())),
    }
}

/// Mimetype of a path, guessed from its extension.
pub fn mimetype_of(path: &Path) -> Option<&'static str> {
    let name = path.as_str().rsplit('/').next()?;
    let (_, extension) = name.rsplit_once('.')?;
    match extension {
        "txt" | "md" => Some(TEXT_PLAIN),
        "json" => Some(APPLICATION_JSON),
        _ => None,
    }
}

/// Read a file of the context's filesystem and parse it. Without an
/// explicit mimetype the extension of the path decides.
pub fn read_resource(ctx: &Context, path: &Path, mimetype: Option<&str>) -> Result<Value> {
    let mimetype = match mimetype.or_else(|| mimetype_of(path)) {
        Some(m) => m,
        None => return Err(RuntimeError::ContentTypeParserNotFound(path.to_string())),
    };
    let stream = filesystem::open_byte_stream(ctx, path)?;
    let content = stream.read_all(ctx)?;
    debug!(%path, mimetype, len = content.len(), "resource read");
    parse_content(mimetype, &content)
}
