//! Artifact coordinates and the repository layout.
//!
//! A [`Coordinate`] is the `(group, artifact, version)` triple that identifies
//! one published artifact version. Its manifest lives at a fixed location in
//! both the remote repository and the local mirror of it:
//!
//! ```text
//! <root>/<group-with-slashes>/<artifact>/<version>/<artifact>-<version>.<ext>
//! ```

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default manifest file extension.
pub const DEFAULT_MANIFEST_EXTENSION: &str = "pom";

/// Identity of one published artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Coordinate {
    /// Create a coordinate from its three parts.
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// Key identifying the artifact regardless of version (`group:artifact`).
    pub fn artifact_key(&self) -> String {
        artifact_key(&self.group, &self.artifact)
    }

    /// Copy of this coordinate with its version range collapsed to a single version.
    pub fn normalized(&self) -> Self {
        Self {
            group: self.group.clone(),
            artifact: self.artifact.clone(),
            version: normalize_version(&self.version),
        }
    }

    /// Whether the coordinate names something that can actually be fetched.
    ///
    /// Empty parts, leftover `${...}` placeholders and unnormalized ranges all
    /// make a coordinate unfetchable.
    pub fn is_concrete(&self) -> bool {
        [&self.group, &self.artifact, &self.version]
            .iter()
            .all(|part| !part.trim().is_empty() && !part.contains("${"))
            && !is_version_range(&self.version)
    }

    /// Path of the manifest relative to a repository root.
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        let mut path = PathBuf::new();
        for segment in self.group.split('.') {
            path.push(segment);
        }
        path.push(&self.artifact);
        path.push(&self.version);
        path.push(self.file_name(extension));
        path
    }

    /// Absolute manifest path inside a local repository.
    pub fn local_path(&self, root: &Path, extension: &str) -> PathBuf {
        root.join(self.relative_path(extension))
    }

    /// Manifest URL under a remote repository base URL.
    pub fn remote_url(&self, base_url: &str, extension: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            self.file_name(extension)
        )
    }

    /// Manifest file name (`<artifact>-<version>.<ext>`).
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}-{}.{}", self.artifact, self.version, extension)
    }

    /// Recover a coordinate from a manifest path relative to a repository root.
    ///
    /// Returns `None` when the path does not follow the repository layout.
    pub fn from_relative_path(path: &Path, extension: &str) -> Option<Self> {
        let parts: Vec<&str> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        Self::from_segments(&parts, extension)
    }

    /// Recover a coordinate from a `/`-separated repository path (URL path).
    pub fn from_url_path(path: &str, extension: &str) -> Option<Self> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self::from_segments(&parts, extension)
    }

    fn from_segments(parts: &[&str], extension: &str) -> Option<Self> {
        // group (>= 1 segment), artifact, version, file name
        if parts.len() < 4 {
            return None;
        }
        let n = parts.len();
        let (file, version, artifact) = (parts[n - 1], parts[n - 2], parts[n - 3]);
        let group = parts[..n - 3].join(".");

        let coordinate = Self::new(group, artifact, version);
        if file != coordinate.file_name(extension) {
            return None;
        }
        Some(coordinate)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

/// Error returned when parsing a `group:artifact:version` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid coordinate '{0}': expected group:artifact:version")]
pub struct ParseCoordinateError(pub String);

impl FromStr for Coordinate {
    type Err = ParseCoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [g, a, v] if !g.is_empty() && !a.is_empty() && !v.is_empty() => {
                Ok(Self::new(*g, *a, *v))
            }
            _ => Err(ParseCoordinateError(s.to_string())),
        }
    }
}

/// Artifact key (`group:artifact`) shared by coordinates and dependency declarations.
pub fn artifact_key(group: &str, artifact: &str) -> String {
    format!("{}:{}", group, artifact)
}

/// Whether a version string is a range expression such as `[1.0,2.0)`.
pub fn is_version_range(version: &str) -> bool {
    let v = version.trim_start();
    v.starts_with('[') || v.starts_with('(')
}

/// Collapse a version range to a single concrete version.
///
/// The lower bound is used whether it is inclusive (`[`) or exclusive (`(`).
/// A range with no lower bound (`(,1.0]`) falls back to its upper bound, and a
/// set of ranges (`[1.0,2.0),[3.0,)`) is reduced to its first member. Plain
/// versions are returned trimmed.
pub fn normalize_version(version: &str) -> String {
    let v = version.trim();
    if !is_version_range(v) {
        return v.to_string();
    }

    let body = &v[1..];
    let end = body.find([']', ')']).unwrap_or(body.len());
    let inner = &body[..end];

    match inner.split_once(',') {
        Some((lower, upper)) => {
            let lower = lower.trim();
            let upper = upper.trim();
            if !lower.is_empty() {
                lower.to_string()
            } else if !upper.is_empty() {
                upper.to_string()
            } else {
                v.to_string()
            }
        }
        None => inner.trim().to_string(),
    }
}
