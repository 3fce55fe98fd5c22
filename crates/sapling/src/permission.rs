//! Permissions granted to (or forbidden for) a context
//!
//! A permission pairs a [`PermissionKind`] with an entity (a path, a URL, a
//! host, a variable name...). Permission `a` *includes* permission `b` when
//! `a`'s kind includes `b`'s kind and `a`'s entity covers `b`'s entity.

use std::fmt;
use std::sync::Arc;

use crate::value::{Host, HostPattern, Path, PathPattern, Url, UrlPattern};

/// The kind of access a permission grants.
///
/// `Write` is a major kind: it includes its minor kinds `Create`, `Update`,
/// `Delete` and `WriteStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    /// Read access
    Read,
    /// Write access (major)
    Write,
    /// Creation (minor of `Write`)
    Create,
    /// Update (minor of `Write`)
    Update,
    /// Deletion (minor of `Write`)
    Delete,
    /// Streamed writes (minor of `Write`)
    WriteStream,
    /// Use (threads, commands)
    Use,
    /// Consume (queues, events)
    Consume,
    /// Provide (serving)
    Provide,
    /// See (environment, secrets)
    See,
}

impl PermissionKind {
    /// The major kind of this kind.
    pub fn major(self) -> PermissionKind {
        match self {
            PermissionKind::Create
            | PermissionKind::Update
            | PermissionKind::Delete
            | PermissionKind::WriteStream => PermissionKind::Write,
            other => other,
        }
    }

    /// Check whether this kind is a major kind.
    pub fn is_major(self) -> bool {
        self.major() == self
    }

    /// Check whether a permission of this kind covers the `other` kind.
    pub fn includes(self, other: PermissionKind) -> bool {
        self == other || (self.is_major() && other.major() == self)
    }

    /// Parse a kind from its name.
    pub fn from_name(name: &str) -> Option<PermissionKind> {
        Some(match name {
            "read" => PermissionKind::Read,
            "write" => PermissionKind::Write,
            "create" => PermissionKind::Create,
            "update" => PermissionKind::Update,
            "delete" => PermissionKind::Delete,
            "write-stream" => PermissionKind::WriteStream,
            "use" => PermissionKind::Use,
            "consume" => PermissionKind::Consume,
            "provide" => PermissionKind::Provide,
            "see" => PermissionKind::See,
            _ => return None,
        })
    }

    /// Name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::Create => "create",
            PermissionKind::Update => "update",
            PermissionKind::Delete => "delete",
            PermissionKind::WriteStream => "write-stream",
            PermissionKind::Use => "use",
            PermissionKind::Consume => "consume",
            PermissionKind::Provide => "provide",
            PermissionKind::See => "see",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Filesystem entity of a permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FsEntity {
    /// A single path
    Path(Path),
    /// A glob or prefix pattern
    Pattern(PathPattern),
}

impl FsEntity {
    /// Build an entity from a string: globs and `/...` prefixes become patterns.
    pub fn parse(s: &str) -> FsEntity {
        let pattern = PathPattern::new(s);
        if pattern.is_glob() || pattern.is_prefix_pattern() {
            FsEntity::Pattern(pattern)
        } else {
            FsEntity::Path(Path::new(s))
        }
    }

    fn includes(&self, other: &FsEntity) -> bool {
        match (self, other) {
            (FsEntity::Path(a), FsEntity::Path(b)) => a == b,
            (FsEntity::Pattern(a), FsEntity::Path(b)) => a.test(b),
            (FsEntity::Pattern(a), FsEntity::Pattern(b)) => a.includes(b),
            (FsEntity::Path(_), FsEntity::Pattern(_)) => false,
        }
    }
}

impl fmt::Display for FsEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsEntity::Path(p) => write!(f, "{}", p),
            FsEntity::Pattern(p) => write!(f, "{}", p),
        }
    }
}

/// Network entity of a permission (HTTP and databases).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetEntity {
    /// A single URL
    Url(Url),
    /// A URL pattern
    UrlPattern(UrlPattern),
    /// Every URL of a host
    Host(Host),
    /// Every URL of the matching hosts
    HostPattern(HostPattern),
}

impl NetEntity {
    fn includes(&self, other: &NetEntity) -> bool {
        match (self, other) {
            (NetEntity::Url(a), NetEntity::Url(b)) => a == b,
            (NetEntity::UrlPattern(a), NetEntity::Url(b)) => a.test(b),
            (NetEntity::UrlPattern(a), NetEntity::UrlPattern(b)) => a.includes(b),
            (NetEntity::Host(h), NetEntity::Url(u)) => &u.host() == h,
            (NetEntity::Host(h), NetEntity::UrlPattern(p)) => {
                p.as_str().starts_with(&format!("{}/", h.as_str()))
            }
            (NetEntity::Host(a), NetEntity::Host(b)) => a == b,
            (NetEntity::HostPattern(p), NetEntity::Url(u)) => p.test_url(u),
            (NetEntity::HostPattern(p), NetEntity::Host(h)) => p.test(h),
            (NetEntity::HostPattern(a), NetEntity::HostPattern(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for NetEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetEntity::Url(u) => write!(f, "{}", u),
            NetEntity::UrlPattern(p) => write!(f, "{}", p),
            NetEntity::Host(h) => write!(f, "{}", h),
            NetEntity::HostPattern(p) => write!(f, "{}", p),
        }
    }
}

/// A permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Filesystem access
    Filesystem(PermissionKind, FsEntity),
    /// HTTP access
    Http(PermissionKind, NetEntity),
    /// Global variable access; `*` covers every name
    GlobalVar(PermissionKind, Arc<str>),
    /// Environment variable access; `*` covers every name
    Env(PermissionKind, Arc<str>),
    /// Creation of lightweight threads
    LThread(PermissionKind),
    /// Command execution; `*` covers every command
    Command(PermissionKind, Arc<str>),
    /// Database access
    Database(PermissionKind, NetEntity),
}

impl Permission {
    /// Filesystem permission from a path or path pattern string.
    pub fn fs(kind: PermissionKind, entity: &str) -> Self {
        Permission::Filesystem(kind, FsEntity::parse(entity))
    }

    /// Filesystem read permission.
    pub fn fs_read(entity: &str) -> Self {
        Self::fs(PermissionKind::Read, entity)
    }

    /// Filesystem write permission.
    pub fn fs_write(entity: &str) -> Self {
        Self::fs(PermissionKind::Write, entity)
    }

    /// Global variable permission.
    pub fn global_var(kind: PermissionKind, name: &str) -> Self {
        Permission::GlobalVar(kind, Arc::from(name))
    }

    /// Database permission on a host.
    pub fn database(kind: PermissionKind, host: Host) -> Self {
        Permission::Database(kind, NetEntity::Host(host))
    }

    /// The kind of the permission.
    pub fn kind(&self) -> PermissionKind {
        match self {
            Permission::Filesystem(k, _)
            | Permission::Http(k, _)
            | Permission::GlobalVar(k, _)
            | Permission::Env(k, _)
            | Permission::LThread(k)
            | Permission::Command(k, _)
            | Permission::Database(k, _) => *k,
        }
    }

    /// Check whether this permission covers `other`.
    pub fn includes(&self, other: &Permission) -> bool {
        if !self.kind().includes(other.kind()) {
            return false;
        }
        match (self, other) {
            (Permission::Filesystem(_, a), Permission::Filesystem(_, b)) => a.includes(b),
            (Permission::Http(_, a), Permission::Http(_, b)) => a.includes(b),
            (Permission::Database(_, a), Permission::Database(_, b)) => a.includes(b),
            (Permission::GlobalVar(_, a), Permission::GlobalVar(_, b))
            | (Permission::Env(_, a), Permission::Env(_, b))
            | (Permission::Command(_, a), Permission::Command(_, b)) => {
                &**a == "*" || glob_match(a, b, '\0')
            }
            (Permission::LThread(_), Permission::LThread(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Filesystem(k, e) => write!(f, "[{} path(s) {}]", k, e),
            Permission::Http(k, e) => write!(f, "[{} {}]", k, e),
            Permission::GlobalVar(k, n) => write!(f, "[{} global variable(s) {}]", k, n),
            Permission::Env(k, n) => write!(f, "[{} env variable(s) {}]", k, n),
            Permission::LThread(k) => write!(f, "[{} lthreads]", k),
            Permission::Command(k, n) => write!(f, "[{} command {}]", k, n),
            Permission::Database(k, e) => write!(f, "[{} database {}]", k, e),
        }
    }
}

/// Match `s` against a glob.
///
/// `*` matches any run of characters other than `separator`, `?` matches a
/// single such character and `[...]` a character class (`[a-z]`, `[!0-9]`).
pub fn glob_match(pattern: &str, s: &str, separator: char) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = s.chars().collect();
    glob_match_at(&p, &t, separator)
}

fn glob_match_at(p: &[char], t: &[char], sep: char) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            // try every split that does not cross a separator
            let mut i = 0;
            loop {
                if glob_match_at(&p[1..], &t[i..], sep) {
                    return true;
                }
                if i >= t.len() || t[i] == sep {
                    return false;
                }
                i += 1;
            }
        }
        Some('?') => match t.first() {
            Some(&c) if c != sep => glob_match_at(&p[1..], &t[1..], sep),
            _ => false,
        },
        Some('[') => {
            let Some(&c) = t.first() else {
                return false;
            };
            match match_class(&p[1..], c) {
                Some((matched, consumed)) if matched && c != sep => {
                    glob_match_at(&p[1 + consumed..], &t[1..], sep)
                }
                Some(_) => false,
                // unterminated class: literal '['
                None => c == '[' && glob_match_at(&p[1..], &t[1..], sep),
            }
        }
        Some(&pc) => match t.first() {
            Some(&c) if c == pc => glob_match_at(&p[1..], &t[1..], sep),
            _ => false,
        },
    }
}

/// Returns whether `c` is in the class and how many pattern chars the class
/// used (including the closing bracket).
fn match_class(p: &[char], c: char) -> Option<(bool, usize)> {
    let mut i = 0;
    let negated = matches!(p.first(), Some('!') | Some('^'));
    if negated {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            if p[i] <= c && c <= p[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if p[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_inclusion() {
        assert!(PermissionKind::Write.includes(PermissionKind::Create));
        assert!(PermissionKind::Write.includes(PermissionKind::WriteStream));
        assert!(!PermissionKind::Create.includes(PermissionKind::Write));
        assert!(!PermissionKind::Read.includes(PermissionKind::Write));
    }

    #[test]
    fn test_fs_permission_inclusion() {
        let read_a = Permission::fs_read("/a/*");
        assert!(read_a.includes(&Permission::fs_read("/a/b")));
        assert!(!read_a.includes(&Permission::fs_read("/a/b/c")));
        assert!(!read_a.includes(&Permission::fs_write("/a/b")));

        let write_all = Permission::fs_write("/...");
        assert!(write_all.includes(&Permission::fs(PermissionKind::Delete, "/x/y")));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("/a/*.txt", "/a/file.txt", '/'));
        assert!(!glob_match("/a/*.txt", "/a/b/file.txt", '/'));
        assert!(glob_match("/a/[bc]", "/a/c", '/'));
        assert!(!glob_match("/a/[!bc]", "/a/c", '/'));
        assert!(glob_match("/a/?", "/a/z", '/'));
        assert!(glob_match("file-[0-9]", "file-7", '/'));
    }

    #[test]
    fn test_display_shows_entity() {
        let p = Permission::fs_write("/a/file");
        assert_eq!(p.to_string(), "[write path(s) /a/file]");
    }
}
