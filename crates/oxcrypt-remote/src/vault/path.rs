//! Value types for paths and directory identifiers.
//!
//! - `DirId`: opaque per-directory identifier, never shown to users
//! - `RemotePath`: a `/`-separated path on a backend, plaintext or ciphertext
//!
//! Paths carry no reference to the session or vault that owns them; whoever
//! needs that relation passes it alongside.

use std::cmp::Ordering;
use std::fmt;

use relative_path::{Component, RelativePath, RelativePathBuf};
use uuid::Uuid;

/// Directory identifier stored in `dir.c9r`.
///
/// Used as associated data when encrypting the names of a directory's
/// children. The vault root has the empty id.
///
/// ```
/// use oxcrypt_remote::vault::path::DirId;
///
/// assert!(DirId::root().is_root());
/// let id = DirId::generate();
/// assert_eq!(id.as_str().len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    #[inline]
    pub fn root() -> Self {
        DirId(String::new())
    }

    /// A fresh random id for a new directory (uuid v4, 36 bytes).
    pub fn generate() -> Self {
        DirId(Uuid::new_v4().to_string())
    }

    /// Wrap an id read back from the backend.
    #[inline]
    pub fn from_raw(id: impl Into<String>) -> Self {
        DirId(id.into())
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl AsRef<str> for DirId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_root() { "<root>" } else { &self.0 })
    }
}

/// Absolute path on a storage backend.
///
/// Always rooted at `/`, with `.`/`..` resolved and empty segments dropped,
/// so two spellings of the same location compare equal.
///
/// ```
/// use oxcrypt_remote::vault::path::RemotePath;
///
/// let path = RemotePath::new("/vault//docs/./report.txt");
/// assert_eq!(path.to_string(), "/vault/docs/report.txt");
/// assert_eq!(path.file_name(), Some("report.txt"));
/// assert!(path.starts_with(&RemotePath::new("/vault")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath(RelativePathBuf);

impl RemotePath {
    #[inline]
    pub fn root() -> Self {
        RemotePath(RelativePathBuf::new())
    }

    /// `..` at the root stays at the root, as it would on a file system.
    pub fn new(path: impl AsRef<str>) -> Self {
        RemotePath(confined(RelativePath::new(path.as_ref().trim_start_matches('/'))))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    /// Path without the leading slash (`""` for the root).
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        &self.0
    }

    /// Append one or more `/`-separated segments.
    pub fn join(&self, component: impl AsRef<str>) -> Self {
        RemotePath(confined(&self.0.join(component.as_ref().trim_start_matches('/'))))
    }

    /// `None` for the root.
    pub fn parent(&self) -> Option<RemotePath> {
        if self.is_root() {
            return None;
        }
        self.0.parent().map(|p| RemotePath(p.to_relative_path_buf()))
    }

    /// `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.components().map(|c| c.as_str())
    }

    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Split into parent directory and final segment. `None` for the root.
    pub fn split(&self) -> Option<(RemotePath, &str)> {
        let parent = self.parent()?;
        let name = self.file_name()?;
        Some((parent, name))
    }

    /// Component-wise prefix test; `/a/bc` does not start with `/a/b`.
    pub fn starts_with(&self, base: &RemotePath) -> bool {
        base.is_root() || self.0.starts_with(&base.0)
    }

    /// The part of `self` below `base`, or `None` when `self` is not inside it.
    pub fn strip_prefix(&self, base: &RemotePath) -> Option<RemotePath> {
        if base.is_root() {
            return Some(self.clone());
        }
        self.0
            .strip_prefix(&base.0)
            .ok()
            .map(|rest| RemotePath(rest.to_relative_path_buf()))
    }
}

/// Resolves `.` and `..` without ever climbing above the root.
fn confined(path: &RelativePath) -> RelativePathBuf {
    let mut out = RelativePathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
        }
    }
    out
}

impl PartialOrd for RemotePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RemotePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(s: &str) -> Self {
        RemotePath::new(s)
    }
}

impl From<String> for RemotePath {
    fn from(s: String) -> Self {
        RemotePath::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_id_root() {
        let root = DirId::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "");
        assert_eq!(root.to_string(), "<root>");
    }

    #[test]
    fn test_generated_dir_ids_are_unique() {
        let a = DirId::generate();
        let b = DirId::generate();
        assert!(!a.is_root());
        assert_ne!(a, b);
    }

    #[test]
    fn test_remote_path_normalization() {
        assert_eq!(RemotePath::new("/a/b"), RemotePath::new("a/b"));
        assert_eq!(RemotePath::new("/a/./b/"), RemotePath::new("/a/b"));
        assert_eq!(RemotePath::new("/a/x/../b"), RemotePath::new("/a/b"));
        assert!(RemotePath::new("/").is_root());
        assert!(RemotePath::new("").is_root());
    }

    #[test]
    fn test_parent_segments_stop_at_root() {
        assert!(RemotePath::new("/..").is_root());
        assert_eq!(RemotePath::new("/../escaped.txt"), RemotePath::new("/escaped.txt"));
        assert_eq!(RemotePath::new("a/../../../b"), RemotePath::new("/b"));
        assert_eq!(RemotePath::root().join("../../etc"), RemotePath::new("/etc"));
        assert_eq!(RemotePath::new("/v/a").join("../../../x"), RemotePath::new("/x"));
        assert!(RemotePath::new("/../x").components().all(|c| c != ".."));
    }

    #[test]
    fn test_remote_path_display() {
        assert_eq!(RemotePath::root().to_string(), "/");
        assert_eq!(RemotePath::new("vault/hello.txt").to_string(), "/vault/hello.txt");
    }

    #[test]
    fn test_remote_path_parent_chain() {
        let path = RemotePath::new("/vault/docs/a.txt");
        let parent = path.parent().unwrap();
        assert_eq!(parent, RemotePath::new("/vault/docs"));
        let grandparent = parent.parent().unwrap();
        assert_eq!(grandparent, RemotePath::new("/vault"));
        assert!(grandparent.parent().unwrap().is_root());
        assert!(RemotePath::root().parent().is_none());
    }

    #[test]
    fn test_remote_path_join_multiple_segments() {
        let base = RemotePath::new("/vault");
        assert_eq!(base.join("d/AB/CDEF"), RemotePath::new("/vault/d/AB/CDEF"));
        assert_eq!(RemotePath::root().join("x"), RemotePath::new("/x"));
    }

    #[test]
    fn test_prefix_is_component_wise() {
        let base = RemotePath::new("/a/b");
        assert!(RemotePath::new("/a/b").starts_with(&base));
        assert!(RemotePath::new("/a/b/c").starts_with(&base));
        assert!(!RemotePath::new("/a/bc").starts_with(&base));
        assert!(RemotePath::new("/anything").starts_with(&RemotePath::root()));
    }

    #[test]
    fn test_strip_prefix() {
        let base = RemotePath::new("/vault");
        assert_eq!(
            RemotePath::new("/vault/docs/a.txt").strip_prefix(&base),
            Some(RemotePath::new("docs/a.txt"))
        );
        assert_eq!(RemotePath::new("/vault").strip_prefix(&base), Some(RemotePath::root()));
        assert_eq!(RemotePath::new("/other").strip_prefix(&base), None);
    }

    #[test]
    fn test_split_and_depth() {
        let path = RemotePath::new("/vault/a.txt");
        let (parent, name) = path.split().unwrap();
        assert_eq!(parent, RemotePath::new("/vault"));
        assert_eq!(name, "a.txt");
        assert_eq!(path.depth(), 2);
        assert_eq!(RemotePath::root().depth(), 0);
    }
}
