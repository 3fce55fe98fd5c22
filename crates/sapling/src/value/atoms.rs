//! Atomic immutable values: paths, URLs, hosts, ranges and friends
//!
//! These types carry no sharing semantics: copying them is the same as
//! copying their bytes (most of them are `Arc<str>` newtypes).

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::permission::glob_match;

use super::Value;

// ═══════════════════════════════════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════════════════════════════════

/// A UNIX-like path (`/a/b`, `/dir/`, `./file`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Arc<str>);

impl Path {
    /// Create a path without validation.
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Path(s.into())
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Path(Arc::from("/"))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the path denotes a directory (ends with `/`).
    pub fn is_dir_path(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Check whether the path is absolute.
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Check whether this is the root path.
    pub fn is_root(&self) -> bool {
        &*self.0 == "/"
    }

    /// Append a single segment: `/a` + `b` = `/a/b`.
    pub fn join(&self, segment: &str) -> Path {
        let base = self.0.trim_end_matches('/');
        Path(Arc::from(format!("{}/{}", base, segment.trim_start_matches('/'))))
    }

    /// Append another absolute path: `/a` + `/b/c` = `/a/b/c`.
    pub fn join_path(&self, other: &Path) -> Path {
        if other.is_root() {
            return self.clone();
        }
        if self.is_root() {
            return other.clone();
        }
        let base = self.0.trim_end_matches('/');
        Path(Arc::from(format!(
            "{}/{}",
            base,
            other.0.trim_start_matches('/')
        )))
    }

    /// Non-empty segments of the path.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::new(s)
    }
}

/// A glob over paths (`/a/*.txt`) or a prefix pattern (`/a/...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern(Arc<str>);

impl PathPattern {
    /// Create a path pattern.
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        PathPattern(s.into())
    }

    /// The pattern as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the pattern is a prefix pattern (`/dir/...`).
    pub fn is_prefix_pattern(&self) -> bool {
        self.0.ends_with("/...")
    }

    /// The prefix of a prefix pattern, including the trailing `/`.
    pub fn prefix(&self) -> &str {
        self.0.strip_suffix("...").unwrap_or(&self.0)
    }

    /// Check whether the pattern contains glob metacharacters.
    pub fn is_glob(&self) -> bool {
        self.0.contains(['*', '?', '['])
    }

    /// Test a path against the pattern.
    pub fn test(&self, path: &Path) -> bool {
        if self.is_prefix_pattern() {
            return path.as_str().starts_with(self.prefix());
        }
        glob_match(&self.0, path.as_str(), '/')
    }

    /// Check whether every path matched by `other` is matched by `self`.
    ///
    /// Exact for prefix patterns and literal patterns; for two globs only
    /// textual equality is recognised.
    pub fn includes(&self, other: &PathPattern) -> bool {
        if self == other {
            return true;
        }
        if self.is_prefix_pattern() {
            let prefix = self.prefix();
            return if other.is_prefix_pattern() {
                other.prefix().starts_with(prefix)
            } else {
                other.as_str().starts_with(prefix)
            };
        }
        if !other.is_glob() && !other.is_prefix_pattern() {
            return glob_match(&self.0, other.as_str(), '/');
        }
        false
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// URLs, hosts and schemes
// ═══════════════════════════════════════════════════════════════════════

/// An absolute URL such as `https://example.com/a?b=c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Url(Arc<str>);

impl Url {
    /// Parse and validate a URL.
    pub fn parse(s: &str) -> Result<Url> {
        url::Url::parse(s).map_err(|e| RuntimeError::ParseFailure {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        if !s.contains("://") {
            return Err(RuntimeError::ParseFailure {
                input: s.to_string(),
                reason: "missing authority".to_string(),
            });
        }
        Ok(Url(Arc::from(s)))
    }

    /// Create a URL without validation.
    pub fn new_unchecked(s: impl Into<Arc<str>>) -> Self {
        Url(s.into())
    }

    /// The URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme (`https`).
    pub fn scheme(&self) -> Scheme {
        Scheme::new(self.0.split("://").next().unwrap_or_default())
    }

    /// The host part (`https://example.com`).
    pub fn host(&self) -> Host {
        let (scheme, rest) = self.0.split_once("://").unwrap_or(("", &self.0));
        let authority = rest
            .split(|c| c == '/' || c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        Host::new(format!("{}://{}", scheme, authority))
    }

    /// The path part (`/a`); `/` when the URL has no path.
    pub fn path(&self) -> Path {
        let rest = self.0.split_once("://").map(|(_, r)| r).unwrap_or(&self.0);
        match rest.find('/') {
            Some(idx) => {
                let path = &rest[idx..];
                let end = path.find(['?', '#']).unwrap_or(path.len());
                Path::new(&path[..end])
            }
            None => Path::root(),
        }
    }

    /// Append an absolute path to the URL: `db://host` + `/users/1`.
    pub fn with_path(&self, path: &Path) -> Url {
        let base = self.0.trim_end_matches('/');
        Url(Arc::from(format!("{}{}", base, path.as_str())))
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host with its scheme (`https://example.com`, `ldb://main`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host(Arc<str>);

impl Host {
    /// Create a host without validation.
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Host(s.into())
    }

    /// Parse a host, requiring a scheme and a non-empty authority without path.
    pub fn parse(s: &str) -> Result<Host> {
        match s.split_once("://") {
            Some((scheme, authority))
                if !scheme.is_empty() && !authority.is_empty() && !authority.contains('/') =>
            {
                Ok(Host(Arc::from(s)))
            }
            _ => Err(RuntimeError::ParseFailure {
                input: s.to_string(),
                reason: "invalid host".to_string(),
            }),
        }
    }

    /// The host as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme of the host.
    pub fn scheme(&self) -> Scheme {
        Scheme::new(self.0.split("://").next().unwrap_or_default())
    }

    /// The authority without the scheme (`example.com:8080`).
    pub fn name(&self) -> &str {
        self.0.split_once("://").map(|(_, a)| a).unwrap_or(&self.0)
    }

    /// Build a URL from the host and a path.
    pub fn url_with_path(&self, path: &Path) -> Url {
        Url::new_unchecked(format!("{}{}", self.0, path.as_str()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host glob such as `https://*.example.com`; `*` matches a single label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPattern(Arc<str>);

impl HostPattern {
    /// Create a host pattern.
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        HostPattern(s.into())
    }

    /// The pattern as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Test a host against the pattern.
    pub fn test(&self, host: &Host) -> bool {
        glob_match(&self.0, host.as_str(), '.')
    }

    /// Test the host of a URL against the pattern.
    pub fn test_url(&self, url: &Url) -> bool {
        self.test(&url.host())
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A URL prefix pattern (`https://example.com/...`) or URL glob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlPattern(Arc<str>);

impl UrlPattern {
    /// Create a URL pattern.
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        UrlPattern(s.into())
    }

    /// The pattern as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the pattern is a prefix pattern.
    pub fn is_prefix_pattern(&self) -> bool {
        self.0.ends_with("/...")
    }

    /// Test a URL against the pattern.
    pub fn test(&self, url: &Url) -> bool {
        if self.is_prefix_pattern() {
            let prefix = self.0.strip_suffix("...").unwrap_or(&self.0);
            return url.as_str().starts_with(prefix);
        }
        glob_match(&self.0, url.as_str(), '/')
    }

    /// Check whether every URL matched by `other` is matched by `self`.
    pub fn includes(&self, other: &UrlPattern) -> bool {
        if self == other {
            return true;
        }
        if self.is_prefix_pattern() && other.is_prefix_pattern() {
            let prefix = self.0.strip_suffix("...").unwrap_or(&self.0);
            return other.0.starts_with(prefix);
        }
        false
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A URL scheme (`https`, `file`, `ldb`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scheme(Arc<str>);

impl Scheme {
    /// Create a scheme.
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Scheme(s.into())
    }

    /// The scheme as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Other atoms
// ═══════════════════════════════════════════════════════════════════════

/// A string checked against a named string pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckedString {
    /// Name of the pattern the string was checked against
    pub pattern_name: Arc<str>,
    /// The string itself
    pub value: Arc<str>,
}

/// An inclusive range of Unicode scalar values (`'a'..'z'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuneRange {
    /// First rune
    pub start: char,
    /// Last rune (inclusive)
    pub end: char,
}

impl RuneRange {
    /// Create a rune range.
    pub fn new(start: char, end: char) -> Self {
        Self { start, end }
    }

    /// Check whether the range contains a rune.
    pub fn contains(&self, c: char) -> bool {
        self.start <= c && c <= self.end
    }
}

/// An inclusive range of integers (`0..10` includes 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntRange {
    /// First integer
    pub start: i64,
    /// Last integer (inclusive)
    pub end: i64,
}

impl IntRange {
    /// Create an int range.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Check whether the range contains an integer.
    pub fn contains(&self, n: i64) -> bool {
        self.start <= n && n <= self.end
    }

    /// Number of integers in the range.
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            (self.end as i128 - self.start as i128 + 1) as u64
        }
    }

    /// Check whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A range of quantities (`1kB..1MB`). The start is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityRange {
    /// Lower bound
    pub start: Option<Value>,
    /// Upper bound
    pub end: Value,
    /// Whether the upper bound is inclusive
    pub inclusive_end: bool,
}

/// A port, optionally tagged with a scheme (`:443`, `:80/http`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port {
    /// Port number
    pub number: u16,
    /// Scheme, if any
    pub scheme: Option<Arc<str>>,
}

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
}

/// A named option (`--verbose=true`).
#[derive(Debug, Clone, PartialEq)]
pub struct OptionValue {
    /// Option name
    pub name: Arc<str>,
    /// Option value
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_join() {
        assert_eq!(Path::root().join("a").as_str(), "/a");
        assert_eq!(Path::new("/a/").join("b").as_str(), "/a/b");
        assert_eq!(Path::new("/a").join_path(&Path::new("/b/c")).as_str(), "/a/b/c");
        assert_eq!(Path::root().join_path(&Path::new("/n")).as_str(), "/n");
    }

    #[test]
    fn test_path_pattern_prefix() {
        let pattern = PathPattern::new("/a/...");
        assert!(pattern.test(&Path::new("/a/b/c")));
        assert!(!pattern.test(&Path::new("/b")));
        assert!(pattern.includes(&PathPattern::new("/a/b/...")));
        assert!(pattern.includes(&PathPattern::new("/a/*")));
    }

    #[test]
    fn test_path_pattern_glob() {
        let pattern = PathPattern::new("/a/*");
        assert!(pattern.test(&Path::new("/a/b")));
        assert!(!pattern.test(&Path::new("/a/b/c")));
        assert!(pattern.includes(&PathPattern::new("/a/file")));
    }

    #[test]
    fn test_url_parts() {
        let url = Url::parse("https://example.com/a/b?x=1").unwrap();
        assert_eq!(url.scheme().as_str(), "https");
        assert_eq!(url.host().as_str(), "https://example.com");
        assert_eq!(url.path().as_str(), "/a/b");

        let db = Url::new_unchecked("db://host");
        assert_eq!(db.path().as_str(), "/");
        assert_eq!(db.with_path(&Path::new("/users/1")).as_str(), "db://host/users/1");
    }

    #[test]
    fn test_host_pattern() {
        let pattern = HostPattern::new("https://*.example.com");
        assert!(pattern.test(&Host::new("https://api.example.com")));
        assert!(!pattern.test(&Host::new("https://a.b.example.com")));
        assert!(!pattern.test(&Host::new("http://api.example.com")));
    }

    #[test]
    fn test_url_pattern_prefix() {
        let pattern = UrlPattern::new("https://example.com/...");
        assert!(pattern.test(&Url::new_unchecked("https://example.com/a")));
        assert!(!pattern.test(&Url::new_unchecked("https://example.org/a")));
    }
}
