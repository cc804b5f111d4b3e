//! Common test utilities for integration tests.
//!
//! Builds small manifests, temporary local repositories and mock mirrors.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mvngraph_core::{
    ClosureConfig, ClosureCrawler, Coordinate, FetcherConfig, ManifestResolver, ManifestSource,
    Mirror, RepositoryFetcher, ResolverConfig,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Manifest builder
// ============================================================================

/// Fluent builder for test manifests.
#[derive(Debug, Clone, Default)]
pub struct Pom {
    coordinate: Option<Coordinate>,
    parent: Option<Coordinate>,
    properties: Vec<(String, String)>,
    dependencies: Vec<String>,
    managed: Vec<String>,
}

impl Pom {
    pub fn new(coordinate: &str) -> Self {
        Self {
            coordinate: Some(coord(coordinate)),
            ..Self::default()
        }
    }

    /// A manifest that declares only its artifact id and inherits the rest.
    pub fn child(artifact: &str, parent: &str) -> Self {
        Self {
            coordinate: Some(Coordinate::new("", artifact, "")),
            parent: Some(coord(parent)),
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(coord(parent));
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.push((key.to_string(), value.to_string()));
        self
    }

    /// Dependency given as `g:a[:v]`, optionally with scope and optional flag.
    pub fn dependency(mut self, spec: &str, scope: Option<&str>, optional: bool) -> Self {
        let mut parts = spec.split(':');
        let group = parts.next().unwrap_or_default();
        let artifact = parts.next().unwrap_or_default();
        let mut xml = format!("<groupId>{}</groupId><artifactId>{}</artifactId>", group, artifact);
        if let Some(version) = parts.next() {
            xml.push_str(&format!("<version>{}</version>", version));
        }
        if let Some(scope) = scope {
            xml.push_str(&format!("<scope>{}</scope>", scope));
        }
        if optional {
            xml.push_str("<optional>true</optional>");
        }
        self.dependencies.push(format!("<dependency>{}</dependency>", xml));
        self
    }

    pub fn depends_on(self, spec: &str) -> Self {
        self.dependency(spec, None, false)
    }

    pub fn manage(mut self, spec: &str) -> Self {
        let c = coord(spec);
        self.managed.push(format!(
            "<dependency><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></dependency>",
            c.group, c.artifact, c.version
        ));
        self
    }

    pub fn xml(&self) -> String {
        let mut body = String::from("<modelVersion>4.0.0</modelVersion>");
        if let Some(p) = &self.parent {
            body.push_str(&format!(
                "<parent><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></parent>",
                p.group, p.artifact, p.version
            ));
        }
        if let Some(c) = &self.coordinate {
            if !c.group.is_empty() {
                body.push_str(&format!("<groupId>{}</groupId>", c.group));
            }
            body.push_str(&format!("<artifactId>{}</artifactId>", c.artifact));
            if !c.version.is_empty() {
                body.push_str(&format!("<version>{}</version>", c.version));
            }
        }
        if !self.properties.is_empty() {
            body.push_str("<properties>");
            for (k, v) in &self.properties {
                body.push_str(&format!("<{k}>{v}</{k}>"));
            }
            body.push_str("</properties>");
        }
        if !self.managed.is_empty() {
            body.push_str("<dependencyManagement><dependencies>");
            body.push_str(&self.managed.concat());
            body.push_str("</dependencies></dependencyManagement>");
        }
        if !self.dependencies.is_empty() {
            body.push_str("<dependencies>");
            body.push_str(&self.dependencies.concat());
            body.push_str("</dependencies>");
        }
        format!("<?xml version=\"1.0\"?>\n<project>{}</project>\n", body)
    }
}

pub fn coord(s: &str) -> Coordinate {
    s.parse().expect("test coordinate")
}

// ============================================================================
// Local repository
// ============================================================================

/// A temporary local repository.
pub struct LocalRepo {
    dir: TempDir,
}

impl LocalRepo {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_of(&self, coordinate: &str) -> PathBuf {
        coord(coordinate).local_path(self.root(), "pom")
    }

    /// Write a manifest at its layout path.
    pub fn write(&self, coordinate: &str, content: &str) -> PathBuf {
        let path = self.path_of(coordinate);
        std::fs::create_dir_all(path.parent().expect("layout path has a parent")).expect("mkdir");
        std::fs::write(&path, content).expect("write manifest");
        path
    }

    pub fn write_pom(&self, coordinate: &str, pom: &Pom) -> PathBuf {
        self.write(coordinate, &pom.xml())
    }

    /// Every file below the root, relative to it.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = walkdir::WalkDir::new(self.root())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(self.root()).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files
    }
}

// ============================================================================
// Mock mirror
// ============================================================================

/// Serve a manifest from a mock mirror at its layout URL.
pub async fn serve(server: &MockServer, coordinate: &str, content: String, expected: Option<u64>) {
    let c = coord(coordinate);
    let url_path = format!("/{}", c.relative_path("pom").to_string_lossy().replace('\\', "/"));
    let mock = Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(content));
    let mock = match expected {
        Some(n) => mock.expect(n),
        None => mock,
    };
    mock.mount(server).await;
}

/// Fetcher for `repo` backed by `server`, with fast retries.
pub fn fetcher(repo: &LocalRepo, server: &MockServer) -> Arc<RepositoryFetcher> {
    let config = FetcherConfig::new(repo.root())
        .with_mirrors(vec![Mirror::new("mock", server.uri())])
        .with_timeout(5)
        .with_max_retries(1)
        .with_retry_base_delay(Duration::from_millis(10));
    Arc::new(RepositoryFetcher::new(config).expect("fetcher"))
}

/// Resolver and crawler sharing one source.
pub fn crawler(source: Arc<dyn ManifestSource>, config: ClosureConfig) -> ClosureCrawler {
    let resolver = Arc::new(ManifestResolver::new(Arc::clone(&source), ResolverConfig::default()));
    ClosureCrawler::new(source, resolver, config)
}
