//! Normalized, root-relative document paths

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A relative path with forward slashes and no `.` or `..` segments.
///
/// Sources and destinations of documents are stored in this form so that
/// keys built from them (write tracking, caching) compare equal no matter how
/// the path was spelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Normalize a path string.
    ///
    /// Backslashes become forward slashes, empty and `.` segments are dropped,
    /// and `..` removes the previous segment. A `..` with nothing left to
    /// remove is discarded, so the result never escapes its root.
    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref().replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Self(segments.join("/"))
    }

    /// Normalize a file system path.
    pub fn from_path(path: &Path) -> Self {
        let parts: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                Component::ParentDir => Some("..".to_string()),
                _ => None,
            })
            .collect();
        Self::new(parts.join("/"))
    }

    /// Express `full` relative to `root`.
    pub fn relative_to(root: &Path, full: &Path) -> Result<Self> {
        let relative = full.strip_prefix(root).map_err(|_| Error::Filesystem {
            message: format!(
                "Path '{}' is not under root '{}'",
                full.display(),
                root.display()
            ),
        })?;
        Ok(Self::from_path(relative))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Final segment of the path.
    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Extension of the final segment, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Replace (or add) the extension of the final segment.
    ///
    /// An empty extension removes the existing one.
    pub fn with_extension(&self, extension: &str) -> Self {
        let extension = extension.trim_start_matches('.');
        let stem_end = match (self.file_name(), self.extension()) {
            (Some(_), Some(ext)) => self.0.len() - ext.len() - 1,
            _ => self.0.len(),
        };
        let stem = &self.0[..stem_end];
        if extension.is_empty() {
            Self(stem.to_string())
        } else {
            Self(format!("{}.{}", stem, extension))
        }
    }

    /// Append another relative path.
    pub fn join(&self, other: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.0, other.as_ref()))
    }

    /// Resolve against a root directory on disk.
    pub fn under(&self, root: &Path) -> PathBuf {
        self.0
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NormalizedPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NormalizedPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for NormalizedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NormalizedPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}
