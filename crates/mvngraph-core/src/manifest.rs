//! Raw manifest (POM) parsing.
//!
//! This module reads a single manifest file as written, without consulting its
//! ancestors. Inheritance, interpolation and dependency management are applied
//! later by [`crate::resolver::ManifestResolver`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mvngraph_core::manifest::parse_manifest;
//!
//! let raw = parse_manifest("<project><artifactId>demo</artifactId></project>")?;
//! assert_eq!(raw.artifact.as_deref(), Some("demo"));
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinate::{artifact_key, normalize_version, Coordinate};

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while reading a manifest file.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The file could not be read
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The content is not well-formed XML
    #[error("Manifest is not well-formed XML: {0}")]
    Xml(String),

    /// The document root is not a `<project>` element
    #[error("Expected <project> root element, found <{0}>")]
    NotAProject(String),

    /// A `<parent>` block lacks one of groupId, artifactId or version
    #[error("Parent declaration is missing {0}")]
    IncompleteParent(&'static str),
}

// ============================================================================
// Model
// ============================================================================

/// Reference to a parent manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl ParentRef {
    /// Coordinate of the parent, with any version range collapsed.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(&self.group, &self.artifact, normalize_version(&self.version))
    }
}

/// A dependency declaration.
///
/// Every field except group and artifact is optional in the raw form. After
/// resolution the version is filled from dependency management when possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
    pub scope: Option<String>,
    pub optional: Option<bool>,
}

impl Dependency {
    /// `group:artifact` key used to match against dependency management.
    pub fn key(&self) -> String {
        artifact_key(&self.group, &self.artifact)
    }

    /// Concrete coordinate of the dependency target, if its version is usable.
    pub fn coordinate(&self) -> Option<Coordinate> {
        let version = self.version.as_deref()?;
        let coordinate = Coordinate::new(&self.group, &self.artifact, normalize_version(version));
        coordinate.is_concrete().then_some(coordinate)
    }
}

/// An entry of a `<dependencyManagement>` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDependency {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
    pub scope: Option<String>,
    /// Declared `<type>`; `pom` together with scope `import` marks a BOM import.
    pub kind: Option<String>,
}

impl ManagedDependency {
    pub fn key(&self) -> String {
        artifact_key(&self.group, &self.artifact)
    }

    /// Whether this entry imports another manifest's dependency management.
    pub fn is_import(&self) -> bool {
        self.scope.as_deref() == Some("import") && self.kind.as_deref() == Some("pom")
    }
}

/// A manifest exactly as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawManifest {
    pub group: Option<String>,
    pub artifact: Option<String>,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub parent: Option<ParentRef>,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<Dependency>,
    pub dependency_management: Vec<ManagedDependency>,
}

impl RawManifest {
    /// Coordinate as declared, borrowing group and version from the parent
    /// reference when the manifest omits them.
    pub fn declared_coordinate(&self) -> Option<Coordinate> {
        let parent = self.parent.as_ref();
        let group = self
            .group
            .clone()
            .or_else(|| parent.map(|p| p.group.clone()))?;
        let version = self
            .version
            .clone()
            .or_else(|| parent.map(|p| p.version.clone()))?;
        Some(Coordinate::new(group, self.artifact.clone()?, version))
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Read and parse a manifest file.
pub fn read_manifest(path: &Path) -> Result<RawManifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(&content)
}

/// Parse manifest content.
pub fn parse_manifest(content: &str) -> Result<RawManifest, ManifestError> {
    let doc = roxmltree::Document::parse(content).map_err(|e| ManifestError::Xml(e.to_string()))?;
    let project = doc.root_element();
    if project.tag_name().name() != "project" {
        return Err(ManifestError::NotAProject(
            project.tag_name().name().to_string(),
        ));
    }

    let mut raw = RawManifest {
        group: child_text(&project, "groupId"),
        artifact: child_text(&project, "artifactId"),
        version: child_text(&project, "version"),
        packaging: child_text(&project, "packaging"),
        name: child_text(&project, "name"),
        description: child_text(&project, "description"),
        url: child_text(&project, "url"),
        ..RawManifest::default()
    };

    if let Some(parent) = child_element(&project, "parent") {
        raw.parent = Some(ParentRef {
            group: child_text(&parent, "groupId").ok_or(ManifestError::IncompleteParent("groupId"))?,
            artifact: child_text(&parent, "artifactId")
                .ok_or(ManifestError::IncompleteParent("artifactId"))?,
            version: child_text(&parent, "version").ok_or(ManifestError::IncompleteParent("version"))?,
        });
    }

    if let Some(props) = child_element(&project, "properties") {
        for child in props.children().filter(|n| n.is_element()) {
            let value = child.text().map(str::trim).unwrap_or_default();
            raw.properties
                .insert(child.tag_name().name().to_string(), value.to_string());
        }
    }

    if let Some(deps) = child_element(&project, "dependencies") {
        raw.dependencies = parse_dependencies(&deps);
    }

    if let Some(deps) = child_element(&project, "dependencyManagement")
        .and_then(|dm| child_element(&dm, "dependencies"))
    {
        raw.dependency_management = dependency_nodes(&deps)
            .filter_map(|node| {
                Some(ManagedDependency {
                    group: child_text(&node, "groupId")?,
                    artifact: child_text(&node, "artifactId")?,
                    version: child_text(&node, "version"),
                    scope: child_text(&node, "scope"),
                    kind: child_text(&node, "type"),
                })
            })
            .collect();
    }

    Ok(raw)
}

fn parse_dependencies(deps: &roxmltree::Node<'_, '_>) -> Vec<Dependency> {
    dependency_nodes(deps)
        .filter_map(|node| {
            Some(Dependency {
                group: child_text(&node, "groupId")?,
                artifact: child_text(&node, "artifactId")?,
                version: child_text(&node, "version"),
                scope: child_text(&node, "scope"),
                optional: child_text(&node, "optional").and_then(|v| parse_flag(&v)),
            })
        })
        .collect()
}

fn dependency_nodes<'a, 'input>(
    deps: &roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    deps.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "dependency")
}

/// Parse a boolean element; anything other than true/false is treated as absent.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn child_element<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child_element(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
