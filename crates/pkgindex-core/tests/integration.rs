//! Engine and composite catalog against a real index file and a real
//! in-process REST server.

use pkgindex_core::{
    CompositeCatalog, CoreError, DependencyFlags, EngineConfig, IndexEngine, TrustLevel,
};
use pkgindex_remote::{RemoteConfig, RestClient};
use pkgindex_schema::{
    Dependency, Installer, Manifest, MatchType, PackageMatchField, PackageMatchFilter,
    SearchRequest,
};
use pkgindex_server::{ServerConfig, TestServer};
use tracing::Span;

fn manifest(id: &str, version: &str, name: &str, deps: &[Dependency]) -> Manifest {
    let mut m = Manifest::new(id, version, name);
    m.publisher = Some("Contoso".to_owned());
    m.tags = vec!["tools".to_owned()];
    m.installers = vec![Installer {
        url: Some(format!("https://example.com/{id}/{version}.exe")),
        dependencies: deps.to_vec(),
        ..Installer::default()
    }];
    m
}

fn local_engine(dir: &std::path::Path) -> IndexEngine {
    let mut engine =
        IndexEngine::create(&dir.join("index.db"), EngineConfig::default(), Span::none()).unwrap();
    engine
        .add_manifest(&manifest("Contoso.Runtime", "2.0", "Runtime (local)", &[]), None)
        .unwrap();
    engine
        .add_manifest(
            &manifest(
                "Contoso.Editor",
                "1.0",
                "Editor (local)",
                &[Dependency::new("Contoso.Runtime").with_min_version("2.0")],
            ),
            None,
        )
        .unwrap();
    engine
}

fn remote_server() -> TestServer {
    TestServer::start(
        vec![
            manifest("Contoso.Editor", "1.5", "Editor (remote)", &[]),
            manifest("Fabrikam.Paint", "3.0", "Paint", &[]),
            manifest("Fabrikam.Tools", "1.0", "Tools", &[]),
        ],
        ServerConfig {
            page_size: 1,
            ..ServerConfig::default()
        },
    )
}

fn tag_search() -> SearchRequest {
    SearchRequest::new().with_inclusion(PackageMatchFilter::new(
        PackageMatchField::Tag,
        MatchType::Exact,
        "tools",
    ))
}

#[test]
fn composite_prefers_local_entry() {
    let dir = tempfile::tempdir().unwrap();
    let server = remote_server();
    let remote = RestClient::connect_http(&RemoteConfig::new(&server.url)).unwrap();

    let composite = CompositeCatalog::new()
        .with(Box::new(local_engine(dir.path())), TrustLevel::Trusted)
        .with(Box::new(remote), TrustLevel::Standard);

    let result = composite.search(&tag_search()).unwrap();
    let names: Vec<&str> = result
        .matches
        .iter()
        .map(|m| m.package.name.as_str())
        .collect();
    assert_eq!(names.len(), 4);
    let mut local = names[..2].to_vec();
    local.sort_unstable();
    assert_eq!(local, vec!["Editor (local)", "Runtime (local)"]);
    let mut remote = names[2..].to_vec();
    remote.sort_unstable();
    assert_eq!(remote, vec!["Paint", "Tools"]);
    assert!(!result.truncated);
}

#[test]
fn composite_truncation_comes_from_any_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let server = remote_server();
    let remote = RestClient::connect_http(&RemoteConfig::new(&server.url)).unwrap();

    let composite = CompositeCatalog::new()
        .with(Box::new(local_engine(dir.path())), TrustLevel::Trusted)
        .with(Box::new(remote), TrustLevel::Standard);

    let result = composite.search(&tag_search().with_limit(2)).unwrap();
    assert_eq!(result.matches.len(), 2);
    assert!(result.truncated);
}

#[test]
fn refused_removal_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = local_engine(dir.path());
    let runtime = manifest("Contoso.Runtime", "2.0", "Runtime (local)", &[]);

    let err = engine.remove_manifest(&runtime, false).unwrap_err();
    assert!(matches!(err, CoreError::Dependency { .. }));
    assert!(err
        .dependency_flags()
        .contains(DependencyFlags::SINGLE_MANIFEST_HAS_DEPENDENCIES));
    drop(engine);

    let reopened =
        IndexEngine::open(&dir.path().join("index.db"), EngineConfig::default(), Span::none())
            .unwrap();
    assert_eq!(reopened.index().manifest_count().unwrap(), 2);
    assert!(reopened.index().check_consistency().unwrap().is_empty());
}

#[test]
fn loop_through_stored_manifests_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = local_engine(dir.path());

    // Updating Runtime 2.0 to depend on the editor closes the loop.
    let err = engine
        .update_manifest(
            &manifest(
                "Contoso.Runtime",
                "2.0",
                "Runtime (local)",
                &[Dependency::new("Contoso.Editor")],
            ),
            None,
        )
        .unwrap_err();
    assert_eq!(err.dependency_flags(), DependencyFlags::FOUND_DEPENDENCY_LOOP);
    assert!(err
        .to_string()
        .contains("Contoso.Editor -> Contoso.Runtime -> Contoso.Editor"));
}

#[test]
fn dependency_spelled_in_other_case_guards_removal_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = local_engine(dir.path());
    engine
        .add_manifest(
            &manifest(
                "Fabrikam.Plugin",
                "1.0",
                "Plugin",
                &[Dependency::new("contoso.RUNTIME").with_min_version("2.0")],
            ),
            None,
        )
        .unwrap();
    drop(engine);

    let mut reopened =
        IndexEngine::open(&dir.path().join("index.db"), EngineConfig::default(), Span::none())
            .unwrap();
    let err = reopened
        .remove_manifest(&manifest("CONTOSO.RUNTIME", "2.0", "Runtime (local)", &[]), false)
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Contoso.Editor 1.0"), "{message}");
    assert!(message.contains("Fabrikam.Plugin 1.0"), "{message}");
    assert_eq!(reopened.index().manifest_count().unwrap(), 3);
}
