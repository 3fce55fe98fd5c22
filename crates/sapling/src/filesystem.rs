//! Filesystem adapter
//!
//! The runtime never touches a real filesystem directly; contexts carry a
//! [`Filesystem`] adapter provided by the embedder. [`MemoryFilesystem`] is
//! an in-memory adapter used by tests and sandboxed programs.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use tracing::{debug, trace};
use ulid::Ulid;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::permission::{Permission, PermissionKind};
use crate::stream::{ByteSource, MemoryByteSource, ReadableByteStream};
use crate::value::Path;

/// Default mode of the directories created by the runtime.
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Default mode of the files created by the runtime.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Directory holding the temporary directories.
pub const TEMP_DIR_ROOT: &str = "/tmp";

/// Operations the runtime needs from a filesystem.
pub trait Filesystem: Send + Sync {
    /// Make `path` absolute.
    fn absolute(&self, path: &str) -> Result<Path>;

    /// Join two paths.
    fn join(&self, base: &Path, rest: &str) -> Path {
        let mut joined = base.clone();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            joined = joined.join(segment);
        }
        joined
    }

    /// Create a directory and its missing parents.
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()>;

    /// Check whether something exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Read the content of a file.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate a file and write `content` to it.
    fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> Result<()>;

    /// Open a file for reading.
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>> {
        Ok(Arc::new(MemoryByteSource::new(self.read_file(path)?)))
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Dir { mode: u32 },
    File { content: Vec<u8>, mode: u32 },
}

/// In-memory filesystem. Relative paths are resolved against `/`.
#[derive(Debug)]
pub struct MemoryFilesystem {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

fn key(path: &Path) -> String {
    let s = path.as_str();
    if s.len() > 1 {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

impl MemoryFilesystem {
    /// Filesystem holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), Entry::Dir { mode: DEFAULT_DIR_MODE });
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Mode of the entry at `path`.
    pub fn mode(&self, path: &Path) -> Option<u32> {
        self.entries.read().get(&key(path)).map(|e| match e {
            Entry::Dir { mode } | Entry::File { mode, .. } => *mode,
        })
    }

    /// Check whether `path` is a directory.
    pub fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.read().get(&key(path)), Some(Entry::Dir { .. }))
    }
}

impl Filesystem for MemoryFilesystem {
    fn absolute(&self, path: &str) -> Result<Path> {
        if path.is_empty() {
            return Err(RuntimeError::InvalidArgument("empty path".into()));
        }
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        let mut absolute = format!("/{}", segments.join("/"));
        if path.ends_with('/') && absolute.len() > 1 {
            absolute.push('/');
        }
        Ok(Path::new(absolute))
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        let mut entries = self.entries.write();
        let target = key(path);
        let mut missing = Vec::new();
        let mut current = Some(target.as_str());
        while let Some(p) = current {
            match entries.get(p) {
                Some(Entry::Dir { .. }) => break,
                Some(Entry::File { .. }) => {
                    return Err(anyhow!("{p} is not a directory").into());
                }
                None => missing.push(p.to_string()),
            }
            current = parent_of(p);
        }
        for dir in missing.into_iter().rev() {
            trace!(%dir, "directory created");
            entries.insert(dir, Entry::Dir { mode });
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries.read().contains_key(&key(path))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        match self.entries.read().get(&key(path)) {
            Some(Entry::File { content, .. }) => Ok(content.clone()),
            Some(Entry::Dir { .. }) => Err(anyhow!("{} is a directory", path.as_str()).into()),
            None => Err(anyhow!("no such file: {}", path.as_str()).into()),
        }
    }

    fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        let target = key(path);
        let mut entries = self.entries.write();
        let parent_is_dir = parent_of(&target)
            .is_some_and(|parent| matches!(entries.get(parent), Some(Entry::Dir { .. })));
        if !parent_is_dir {
            return Err(anyhow!("parent directory of {target} does not exist").into());
        }
        if let Some(Entry::Dir { .. }) = entries.get(&target) {
            return Err(anyhow!("{target} is a directory").into());
        }
        entries.insert(
            target,
            Entry::File {
                content: content.to_vec(),
                mode,
            },
        );
        Ok(())
    }
}

/// Open a byte stream over a file of the context's filesystem. The context
/// needs the permission to read the file.
pub fn open_byte_stream(ctx: &Context, path: &Path) -> Result<ReadableByteStream> {
    ctx.check_has_permission(&Permission::fs_read(path.as_str()))?;
    let source = filesystem_of(ctx)?.open(path)?;
    Ok(ReadableByteStream::new(source))
}

fn filesystem_of(ctx: &Context) -> Result<Arc<dyn Filesystem>> {
    ctx.filesystem()
        .ok_or_else(|| RuntimeError::NotImplemented("context without filesystem".into()))
}

/// Create a private temporary directory. The context needs the permission
/// to create it.
pub fn make_temp_dir(ctx: &Context) -> Result<Path> {
    let fs = filesystem_of(ctx)?;
    let name = format!("{TEMP_DIR_ROOT}/sapling-{}", Ulid::new().to_string().to_lowercase());
    let path = fs.absolute(&name)?;
    ctx.check_has_permission(&Permission::fs(PermissionKind::Create, path.as_str()))?;
    fs.mkdir_all(&path, DEFAULT_DIR_MODE)?;
    debug!(%path, "temporary directory created");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::stream::ReadableStream;
    use crate::value::IntRange;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_absolute() {
        let fs = MemoryFilesystem::new();
        assert_eq!(fs.absolute("a/b/../c").unwrap(), Path::new("/a/c"));
        assert_eq!(fs.absolute("/a/./b/").unwrap(), Path::new("/a/b/"));
        assert!(fs.absolute("").is_err());
    }

    #[test]
    fn test_mkdir_and_files() {
        let fs = MemoryFilesystem::new();
        let dir = Path::new("/data/users");
        fs.mkdir_all(&dir, DEFAULT_DIR_MODE).unwrap();
        assert!(fs.is_dir(&Path::new("/data")));
        assert_eq!(fs.mode(&dir), Some(0o700));

        let file = fs.join(&dir, "alice.json");
        assert_eq!(file, Path::new("/data/users/alice.json"));
        fs.write_file(&file, b"{}", DEFAULT_FILE_MODE).unwrap();
        assert_eq!(fs.read_file(&file).unwrap(), b"{}".to_vec());
        assert!(fs.exists(&file));

        assert!(fs.write_file(&Path::new("/nope/x"), b"", DEFAULT_FILE_MODE).is_err());
        assert!(fs.mkdir_all(&file.join("sub"), DEFAULT_DIR_MODE).is_err());
        assert!(fs.read_file(&dir).is_err());
    }

    #[test]
    fn test_byte_stream_requires_permission() {
        let fs = Arc::new(MemoryFilesystem::new());
        fs.mkdir_all(&Path::new("/a"), DEFAULT_DIR_MODE).unwrap();
        fs.write_file(&Path::new("/a/f"), b"xyz", DEFAULT_FILE_MODE).unwrap();

        let denied = Context::new(ContextConfig::new().with_filesystem(fs.clone())).unwrap();
        assert!(matches!(
            open_byte_stream(&denied, &Path::new("/a/f")),
            Err(RuntimeError::NotAllowed(_))
        ));

        let ctx = Context::new(
            ContextConfig::new()
                .with_permissions(vec![Permission::fs_read("/a/*")])
                .with_filesystem(fs),
        )
        .unwrap();
        let stream = open_byte_stream(&ctx, &Path::new("/a/f")).unwrap();
        let chunk = stream
            .wait_next_chunk(&ctx, None, IntRange::new(1, 10), Duration::from_millis(10))
            .unwrap();
        assert_eq!(chunk.data().to_bytes(), Some(b"xyz".to_vec()));
    }

    #[test]
    fn test_temp_dir() {
        let fs = Arc::new(MemoryFilesystem::new());
        let ctx = Context::new(
            ContextConfig::new()
                .with_permissions(vec![Permission::fs(PermissionKind::Create, "/tmp/...")])
                .with_filesystem(fs.clone()),
        )
        .unwrap();
        let dir = make_temp_dir(&ctx).unwrap();
        assert!(dir.as_str().starts_with("/tmp/sapling-"));
        assert!(fs.is_dir(&dir));
        assert_eq!(fs.mode(&dir), Some(DEFAULT_DIR_MODE));
        assert_ne!(make_temp_dir(&ctx).unwrap(), dir);

        let denied = Context::new(ContextConfig::new().with_filesystem(fs)).unwrap();
        assert!(make_temp_dir(&denied).is_err());
    }
}
