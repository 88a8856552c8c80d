//! Hierarchical keys and their byte encoding.
//!
//! A [`Key`] is a slash-delimited path such as `/users/alice/profile`. Keys
//! are always held in canonical form: a single leading slash, no trailing
//! slash, no empty, `.` or `..` segments. The root key is `/`.
//!
//! The storage encoding is the UTF-8 bytes of the canonical string, so the
//! byte order the engine sorts by is exactly the lexicographic order of the
//! canonical strings. That is what makes prefix scans correct.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// A canonical hierarchical key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Key {
    path: String,
}

impl Key {
    /// Build a key from any path-like string, cleaning it to canonical form.
    ///
    /// ```
    /// use astrid_datastore::Key;
    ///
    /// assert_eq!(Key::new("a//b/").as_str(), "/a/b");
    /// assert_eq!(Key::new("/a/./c/../b").as_str(), "/a/b");
    /// assert_eq!(Key::new("").as_str(), "/");
    /// ```
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.as_ref().split('/') {
            match segment {
                "" | "." => {},
                ".." => {
                    segments.pop();
                },
                other => segments.push(other),
            }
        }
        Self::from_segments(&segments)
    }

    /// The root key `/`.
    #[must_use]
    pub fn root() -> Self {
        Self {
            path: "/".to_owned(),
        }
    }

    fn from_segments(segments: &[&str]) -> Self {
        if segments.is_empty() {
            return Self::root();
        }
        let len = segments.iter().map(|s| s.len().saturating_add(1)).sum();
        let mut path = String::with_capacity(len);
        for segment in segments {
            path.push('/');
            path.push_str(segment);
        }
        Self { path }
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The path segments, root first. The root key has none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// The last segment, or `""` for the root key.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// The parent key. The parent of the root is the root.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.path.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Self {
                path: self.path[..idx].to_owned(),
            },
        }
    }

    /// Append a child path below this key.
    #[must_use]
    pub fn child(&self, name: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.path, name.as_ref()))
    }

    /// Whether `other` lives strictly below this key.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        if self.path == "/" {
            return other.path != "/";
        }
        other
            .path
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Whether this key has exactly one segment.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.segments().count() == 1
    }

    /// Storage encoding of this key. See [`encode_key`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_key(self)
    }
}

/// Encode a key to the byte form stored in the engine.
#[must_use]
pub fn encode_key(key: &Key) -> Vec<u8> {
    key.path.as_bytes().to_vec()
}

/// Decode an engine key back into a [`Key`].
///
/// # Errors
///
/// Returns [`StorageError::Corruption`] if the bytes are not UTF-8.
pub fn decode_key(bytes: &[u8]) -> StorageResult<Key> {
    let raw = std::str::from_utf8(bytes)
        .map_err(|e| StorageError::Corruption(format!("stored key is not UTF-8: {e}")))?;
    Ok(Key::new(raw))
}

impl Default for Key {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Key {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.path
    }
}

impl FromStr for Key {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
