//! End-to-end crawl tests: mock mirror -> fetch -> closure -> graph import.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{coord, crawler, fetcher, serve, LocalRepo, Pom};
use mvngraph_core::{
    ClosureConfig, Coordinate, EdgeType, FailureKind, GraphImporter, GraphStore, IndexName,
    ManifestSource, MemoryGraphStore, SqliteGraphStore, StoredNode,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn version(store: &dyn GraphStore, key: &str) -> Option<StoredNode> {
    store
        .find_exact(IndexName::Versions, key)
        .unwrap()
        .into_iter()
        .next()
}

fn coordinates(report: &mvngraph_core::ClosureReport) -> Vec<String> {
    report.coordinates().map(Coordinate::to_string).collect()
}

// ============================================================================
// Unfetchable dependency scenario
// ============================================================================

async fn unfetchable_dependency_scenario(store: &dyn GraphStore) {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    serve(
        &server,
        "g:a:1.0",
        Pom::new("g:a:1.0").dependency("g:b:1.0", Some("test"), true).xml(),
        Some(1),
    )
    .await;

    let source = fetcher(&repo, &server);
    let report = crawler(source, ClosureConfig::default())
        .expand(vec![coord("g:a:1.0")])
        .await;

    assert_eq!(coordinates(&report), vec!["g:a:1.0"]);
    assert!(report.failures.contains_subject("g:b:1.0"));
    assert_eq!(report.failures.of_kind(FailureKind::Fetch).count(), 1);

    GraphImporter::new(store, 1000).import(&report.manifests).unwrap();

    let a = version(store, "g:a:1.0").expect("g:a:1.0 imported");
    let b = version(store, "g:b:1.0").expect("placeholder for g:b:1.0");
    assert!(!a.is_missing());
    assert!(b.is_missing());

    let edges = store.outgoing_edges(a.id, EdgeType::HasDependency).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].target, b.id);
    assert_eq!(edges[0].attributes.scope.as_deref(), Some("test"));
    assert!(edges[0].attributes.optional);
}

#[tokio::test]
async fn test_unfetchable_dependency_memory_store() {
    let store = MemoryGraphStore::new();
    unfetchable_dependency_scenario(&store).await;
}

#[tokio::test]
async fn test_unfetchable_dependency_sqlite_store() {
    let store = SqliteGraphStore::in_memory().unwrap();
    unfetchable_dependency_scenario(&store).await;
}

// ============================================================================
// Closure behavior
// ============================================================================

#[tokio::test]
async fn test_chain_visits_each_coordinate_once() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    let n = 5;
    for i in 0..n {
        let mut pom = Pom::new(&format!("g:c{}:1", i));
        if i + 1 < n {
            pom = pom.depends_on(&format!("g:c{}:1", i + 1));
        }
        serve(&server, &format!("g:c{}:1", i), pom.xml(), Some(1)).await;
    }

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:c0:1")])
        .await;

    assert_eq!(report.manifests.len(), n);
    assert!(report.rounds <= n);
    assert_eq!(report.fetched, n);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_diamond_fetches_shared_dependency_once() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    serve(&server, "g:a:1", Pom::new("g:a:1").depends_on("g:b:1").depends_on("g:c:1").xml(), Some(1)).await;
    serve(&server, "g:b:1", Pom::new("g:b:1").depends_on("g:d:1").xml(), Some(1)).await;
    serve(&server, "g:c:1", Pom::new("g:c:1").depends_on("g:d:1").xml(), Some(1)).await;
    serve(&server, "g:d:1", Pom::new("g:d:1").xml(), Some(1)).await;

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;

    assert_eq!(coordinates(&report), vec!["g:a:1", "g:b:1", "g:c:1", "g:d:1"]);
}

#[tokio::test]
async fn test_warm_cache_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let repo = LocalRepo::new();
    repo.write_pom("g:a:1", &Pom::new("g:a:1").depends_on("g:b:1"));
    repo.write_pom("g:b:1", &Pom::new("g:b:1").depends_on("g:c:1"));
    repo.write_pom("g:c:1", &Pom::new("g:c:1"));

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;

    assert_eq!(coordinates(&report), vec!["g:a:1", "g:b:1", "g:c:1"]);
    assert_eq!(report.fetched, 0);
}

#[tokio::test]
async fn test_shared_parent_is_downloaded_once() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    serve(&server, "g:parent:1", Pom::new("g:parent:1").manage("g:lib:2.0").xml(), Some(1)).await;
    serve(&server, "g:x:1", Pom::child("x", "g:parent:1").depends_on("g:lib").xml(), Some(1)).await;
    serve(&server, "g:y:1", Pom::child("y", "g:parent:1").depends_on("g:lib").xml(), Some(1)).await;
    serve(&server, "g:lib:2.0", Pom::new("g:lib:2.0").xml(), Some(1)).await;

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:x:1"), coord("g:y:1")])
        .await;

    assert_eq!(coordinates(&report), vec!["g:lib:2.0", "g:x:1", "g:y:1"]);
    let x = &report.manifests[1];
    assert_eq!(x.dependencies[0].version.as_deref(), Some("2.0"));
}

#[tokio::test]
async fn test_overlapping_ranges_collapse_to_one_fetch() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    serve(&server, "g:root:1", Pom::new("g:root:1").depends_on("g:a:1").depends_on("g:b:1").xml(), None).await;
    serve(&server, "g:a:1", Pom::new("g:a:1").depends_on("g:r:[1.0,2.0)").xml(), None).await;
    serve(&server, "g:b:1", Pom::new("g:b:1").depends_on("g:r:[1.0,1.5]").xml(), None).await;
    serve(&server, "g:r:1.0", Pom::new("g:r:1.0").xml(), Some(1)).await;

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:root:1")])
        .await;

    assert!(report.failures.is_empty(), "{}", report.failures);
    assert!(coordinates(&report).contains(&"g:r:1.0".to_string()));
}

#[tokio::test]
async fn test_versionless_dependency_is_reported_once() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    repo.write_pom("g:a:1", &Pom::new("g:a:1").depends_on("g:nov").depends_on("g:b:1"));
    repo.write_pom("g:b:1", &Pom::new("g:b:1").depends_on("g:nov"));

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;

    let gaps: Vec<_> = report
        .failures
        .of_kind(FailureKind::UnresolvedDependencyVersion)
        .map(|f| f.subject.as_str())
        .collect();
    assert_eq!(gaps, vec!["g:nov"]);

    let store = MemoryGraphStore::new();
    let stats = GraphImporter::new(&store, 10).import(&report.manifests).unwrap();
    assert_eq!(stats.unresolved_dependencies, 2);
    assert!(version(&store, "g:nov:unresolved").unwrap().is_missing());
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_malformed_manifest_is_evicted() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    serve(&server, "g:a:1", Pom::new("g:a:1").depends_on("g:bad:1").xml(), None).await;
    serve(&server, "g:bad:1", "<project><broken".to_string(), Some(1)).await;

    let source = fetcher(&repo, &server);
    let report = crawler(Arc::clone(&source) as Arc<dyn ManifestSource>, ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;

    let malformed: Vec<_> = report.failures.of_kind(FailureKind::Malformed).collect();
    assert_eq!(malformed.len(), 1);
    assert_eq!(malformed[0].subject, "g:bad:1");
    assert!(!source.local_path(&coord("g:bad:1")).exists());
    assert_eq!(coordinates(&report), vec!["g:a:1"]);
}

#[tokio::test]
async fn test_missing_shared_parent_is_requested_once() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    Mock::given(method("GET"))
        .and(path("/g/parent/1/parent-1.pom"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    serve(
        &server,
        "g:a:1",
        Pom::new("g:a:1")
            .depends_on("g:parent:1")
            .depends_on("g:b:1")
            .depends_on("g:c:1")
            .xml(),
        Some(1),
    )
    .await;
    serve(&server, "g:b:1", Pom::child("b", "g:parent:1").xml(), Some(1)).await;
    serve(&server, "g:c:1", Pom::child("c", "g:parent:1").xml(), Some(1)).await;

    let source = fetcher(&repo, &server);
    let report = crawler(Arc::clone(&source) as Arc<dyn ManifestSource>, ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;

    let failed: Vec<_> = report
        .failures
        .of_kind(FailureKind::Fetch)
        .map(|f| f.subject.as_str())
        .collect();
    assert_eq!(failed.len(), 3);
    for subject in ["g:parent:1", "g:b:1", "g:c:1"] {
        assert!(failed.contains(&subject), "{} not in {:?}", subject, failed);
    }
    assert_eq!(coordinates(&report), vec!["g:a:1"]);
    assert_eq!(source.exhausted_count(), 1);
}

#[tokio::test]
async fn test_malformed_ancestor_is_evicted_after_crawl() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let repo = LocalRepo::new();
    repo.write_pom("g:a:1", &Pom::new("g:a:1").depends_on("g:b:1").depends_on("g:c:1"));
    repo.write_pom("g:b:1", &Pom::child("b", "g:parent:1"));
    repo.write_pom("g:c:1", &Pom::child("c", "g:parent:1"));
    let parent = repo.write("g:parent:1", "<project><groupId>");

    let report = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;

    let malformed: Vec<_> = report
        .failures
        .of_kind(FailureKind::Malformed)
        .map(|f| f.subject.as_str())
        .collect();
    assert_eq!(malformed, vec!["g:b:1", "g:c:1"]);
    assert!(!parent.exists());
    assert!(repo.path_of("g:b:1").exists());
}

#[tokio::test]
async fn test_malformed_manifest_kept_when_eviction_disabled() {
    let server = MockServer::start().await;
    let repo = LocalRepo::new();
    let bad = repo.write("g:bad:1", "not xml at all");

    let config = ClosureConfig {
        evict_malformed: false,
        ..ClosureConfig::default()
    };
    let report = crawler(fetcher(&repo, &server), config)
        .expand(vec![coord("g:bad:1")])
        .await;

    assert_eq!(report.failures.of_kind(FailureKind::Malformed).count(), 1);
    assert!(bad.exists());
}

#[tokio::test]
async fn test_deadline_abandons_slow_fetch_cleanly() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(Pom::new("g:slow:1").xml())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let repo = LocalRepo::new();
    let config = ClosureConfig {
        deadline: Some(Duration::from_millis(300)),
        ..ClosureConfig::default()
    };
    let report = crawler(fetcher(&repo, &server), config)
        .expand(vec![coord("g:slow:1")])
        .await;

    assert!(report.manifests.is_empty());
    let timeouts: Vec<_> = report.failures.of_kind(FailureKind::Timeout).collect();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].subject, "g:slow:1");
    assert!(repo.files().is_empty(), "left behind: {:?}", repo.files());
}

// ============================================================================
// Re-runs
// ============================================================================

#[tokio::test]
async fn test_rerun_promotes_placeholder_in_sqlite_file() {
    let repo = LocalRepo::new();
    let db = repo.root().join(".mvngraph").join("graph.db");
    std::fs::create_dir_all(db.parent().unwrap()).unwrap();

    // first run: g:b:1 is unavailable
    let server = MockServer::start().await;
    serve(&server, "g:a:1", Pom::new("g:a:1").depends_on("g:b:1").xml(), None).await;
    let first = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;
    {
        let store = SqliteGraphStore::open(&db).unwrap();
        GraphImporter::new(&store, 1000).import(&first.manifests).unwrap();
    }

    // second run: g:b:1 has been published
    serve(&server, "g:b:1", Pom::new("g:b:1").xml(), Some(1)).await;
    let second = crawler(fetcher(&repo, &server), ClosureConfig::default())
        .expand(vec![coord("g:a:1")])
        .await;
    assert!(second.failures.is_empty());

    let store = SqliteGraphStore::open(&db).unwrap();
    let placeholder_id = version(&store, "g:b:1").unwrap().id;
    let stats = GraphImporter::new(&store, 1000).import(&second.manifests).unwrap();

    assert_eq!(stats.versions_promoted, 1);
    assert_eq!(stats.dependency_edges_created, 0);
    assert_eq!(stats.dependency_edges_existing, 1);

    let b = version(&store, "g:b:1").unwrap();
    assert_eq!(b.id, placeholder_id);
    assert!(!b.is_missing());

    let graph = store.stats().unwrap();
    assert_eq!(graph.nodes.get("Group"), Some(&1));
    assert_eq!(graph.nodes.get("Artifact"), Some(&2));
    assert_eq!(graph.nodes.get("Version"), Some(&2));
    assert_eq!(graph.missing_versions, 0);
}
