//! Plaintext and encrypted path types, and the folder/file guess for
//! ambiguous paths.
//!
//! - `VirtualPath`: what callers see (e.g. "/Documents/report.txt")
//! - `EncryptedPath`: where the backend stores it (e.g. "/remote/Documents/k3J9x.txt")

use std::fmt;

use relative_path::{RelativePath, RelativePathBuf};

/// A plaintext path in the exposed namespace.
///
/// Separators are `/`. Leading slashes, empty segments and `.` are dropped and
/// `..` is resolved. A trailing separator is remembered because it is the only
/// folder signal available without asking the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    path: RelativePathBuf,
    trailing_separator: bool,
}

impl VirtualPath {
    #[inline]
    pub fn root() -> Self {
        Self {
            path: RelativePathBuf::new(),
            trailing_separator: false,
        }
    }

    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref();
        let cleaned: Vec<&str> = raw.split('/').filter(|c| !c.is_empty()).collect();
        let path = RelativePathBuf::from(cleaned.join("/")).normalize();
        let trailing_separator = raw.ends_with('/') && !path.as_str().is_empty();
        Self { path, trailing_separator }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.path.as_str().is_empty()
    }

    /// Whether the path was written with a trailing `/`.
    #[inline]
    pub fn has_trailing_separator(&self) -> bool {
        self.trailing_separator
    }

    /// Mark the path as a folder.
    #[must_use]
    pub fn into_folder(mut self) -> Self {
        self.trailing_separator = !self.is_root();
        self
    }

    /// The path without leading or trailing separators.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.path.as_str()
    }

    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        &self.path
    }

    #[must_use]
    pub fn join(&self, component: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.path, component.as_ref()))
    }

    /// Parent directory, `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        self.path.parent().map(|p| Self {
            path: p.to_relative_path_buf(),
            trailing_separator: false,
        })
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.components().map(|c| c.as_str())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path)?;
        if self.trailing_separator {
            write!(f, "/")?;
        }
        Ok(())
    }
}

impl From<&str> for VirtualPath {
    fn from(path: &str) -> Self {
        VirtualPath::new(path)
    }
}

/// A path in the backend namespace. Always rendered absolute, never with a
/// trailing separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptedPath(RelativePathBuf);

impl EncryptedPath {
    pub fn root() -> Self {
        EncryptedPath(RelativePathBuf::new())
    }

    pub fn new(path: impl AsRef<str>) -> Self {
        let cleaned: Vec<&str> = path.as_ref().split('/').filter(|c| !c.is_empty()).collect();
        EncryptedPath(RelativePathBuf::from(cleaned.join("/")).normalize())
    }

    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        if segment.is_empty() {
            return self.clone();
        }
        EncryptedPath(self.0.join(segment))
    }

    pub fn parent(&self) -> Option<EncryptedPath> {
        if self.is_root() {
            return None;
        }
        self.0.parent().map(|p| EncryptedPath(p.to_relative_path_buf()))
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Without the leading separator.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_relative_path(&self) -> &RelativePath {
        &self.0
    }
}

impl fmt::Display for EncryptedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// First interpretation to try for a path, and whether the opposite one is
/// worth a second attempt on not-found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathGuess {
    pub is_folder: bool,
    pub retry: bool,
}

/// Guess folder or file from the shape of the path alone.
///
/// 1. Trailing separator (or root): folder, no retry.
/// 2. No `.` in the last segment: folder first, then file.
/// 3. Otherwise: file first, then folder.
pub fn guess_path(path: &VirtualPath) -> PathGuess {
    if path.is_root() || path.has_trailing_separator() {
        return PathGuess { is_folder: true, retry: false };
    }
    let has_extension = path.file_name().is_some_and(|name| name.contains('.'));
    PathGuess {
        is_folder: !has_extension,
        retry: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_path_normalization() {
        let path = VirtualPath::new("//Documents/./Photos/../report.txt");
        assert_eq!(path.as_str(), "Documents/report.txt");
        assert_eq!(path.to_string(), "/Documents/report.txt");
        assert!(!path.has_trailing_separator());
        assert_eq!(path, VirtualPath::new("Documents/report.txt"));
    }

    #[test]
    fn test_virtual_path_trailing_separator() {
        let path = VirtualPath::new("/a/b/");
        assert!(path.has_trailing_separator());
        assert_eq!(path.to_string(), "/a/b/");
        assert!(!VirtualPath::new("/").has_trailing_separator());
        assert!(VirtualPath::new("/").is_root());
    }

    #[test]
    fn test_virtual_path_parent_and_name() {
        let path = VirtualPath::new("/a/b/c.txt");
        assert_eq!(path.file_name(), Some("c.txt"));
        assert_eq!(path.parent().unwrap().as_str(), "a/b");
        assert_eq!(VirtualPath::new("/a").parent().unwrap(), VirtualPath::root());
        assert!(VirtualPath::root().parent().is_none());
        assert_eq!(path.components().collect::<Vec<_>>(), vec!["a", "b", "c.txt"]);
    }

    #[test]
    fn test_join() {
        assert_eq!(VirtualPath::root().join("x").as_str(), "x");
        assert_eq!(VirtualPath::new("/a").join("b.txt").to_string(), "/a/b.txt");
        assert_eq!(EncryptedPath::new("/remote").join("enc").to_string(), "/remote/enc");
        assert_eq!(EncryptedPath::root().join("").to_string(), "/");
    }

    #[test]
    fn test_guess_trailing_separator_is_folder() {
        assert_eq!(
            guess_path(&VirtualPath::new("/a/b.d/")),
            PathGuess { is_folder: true, retry: false }
        );
    }

    #[test]
    fn test_guess_without_extension_is_folder_first() {
        assert_eq!(
            guess_path(&VirtualPath::new("/a/b")),
            PathGuess { is_folder: true, retry: true }
        );
    }

    #[test]
    fn test_guess_with_extension_is_file_first() {
        assert_eq!(
            guess_path(&VirtualPath::new("/a/b.txt")),
            PathGuess { is_folder: false, retry: true }
        );
        // Only the last segment matters
        assert_eq!(
            guess_path(&VirtualPath::new("/dir.d/b")),
            PathGuess { is_folder: true, retry: true }
        );
    }

    #[test]
    fn test_guess_root() {
        assert_eq!(
            guess_path(&VirtualPath::root()),
            PathGuess { is_folder: true, retry: false }
        );
    }
}
