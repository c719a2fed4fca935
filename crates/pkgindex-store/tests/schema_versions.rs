//! Schema version compatibility and persistence tests.

use pkgindex_schema::{
    Installer, Manifest, MatchType, PackageMatchField, SchemaVersion, SearchRequest,
};
use pkgindex_store::{
    PackageIndex, PackageMultiProperty, PackageProperty, StoreError, LATEST_SCHEMA_VERSION,
};
use std::path::Path;

fn manifest(id: &str, version: &str) -> Manifest {
    let mut m = Manifest::new(id, version, &format!("{id} name"));
    m.publisher = Some("Contoso".to_owned());
    m.installers = vec![Installer {
        product_code: Some(format!("{{{id}}}")),
        ..Installer::default()
    }];
    m
}

fn set_minor_version(path: &Path, minor: u32) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute(
        "UPDATE metadata SET value = ?1 WHERE name = 'minorVersion'",
        [minor.to_string()],
    )
    .unwrap();
}

#[test]
fn index_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let id = {
        let mut index = PackageIndex::create(&path, None).unwrap();
        index.add_manifest(&manifest("A", "1.0"), Some("a.json")).unwrap()
    };

    let index = PackageIndex::open(&path).unwrap();
    assert_eq!(index.version(), LATEST_SCHEMA_VERSION);
    assert_eq!(
        index
            .get_property_by_manifest_id(id, PackageProperty::RelativePath)
            .unwrap()
            .as_deref(),
        Some("a.json")
    );
}

#[test]
fn create_on_initialized_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    PackageIndex::create(&path, None).unwrap();
    assert!(matches!(
        PackageIndex::create(&path, None),
        Err(StoreError::AlreadyInitialized(_))
    ));
}

#[test]
fn open_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        PackageIndex::open(&dir.path().join("absent.db")),
        Err(StoreError::NotInitialized(_))
    ));
}

#[test]
fn older_index_opens_with_its_own_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    {
        let mut index = PackageIndex::create(&path, Some(SchemaVersion::new(1, 0))).unwrap();
        index.add_manifest(&manifest("A", "1.0"), None).unwrap();
    }

    let mut index = PackageIndex::open(&path).unwrap();
    assert_eq!(index.version(), SchemaVersion::new(1, 0));
    assert!(!index.supports_dependencies());

    // Operations still work at the older level.
    let id = index.add_manifest(&manifest("B", "2.0"), None).unwrap();
    assert_eq!(
        index
            .get_property_by_manifest_id(id, PackageProperty::Id)
            .unwrap()
            .as_deref(),
        Some("B")
    );

    // Later properties are reported unsupported rather than invented.
    assert!(matches!(
        index.get_property_by_manifest_id(id, PackageProperty::Publisher),
        Err(StoreError::UnsupportedProperty(_))
    ));
    assert!(matches!(
        index.get_multi_property_by_primary_id(id, PackageMultiProperty::ProductCode),
        Err(StoreError::UnsupportedProperty(_))
    ));
    assert!(index.dependencies_by_manifest_id(id).unwrap().is_empty());

    // Fields the version lacks match nothing; others still work.
    let by_code = SearchRequest::by_filter(PackageMatchField::ProductCode, MatchType::Exact, "{A}");
    assert!(index.search(&by_code).unwrap().matches.is_empty());
    let by_id = SearchRequest::by_filter(PackageMatchField::Id, MatchType::Exact, "A");
    let result = index.search(&by_id).unwrap();
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].package.publisher, None);
}

#[test]
fn older_index_file_has_no_later_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    PackageIndex::create(&path, Some(SchemaVersion::new(1, 1))).unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('publishers', 'dependencies')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 0);
}

#[test]
fn newer_index_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    PackageIndex::create(&path, None).unwrap();
    set_minor_version(&path, 9);

    let err = PackageIndex::open(&path).unwrap_err();
    match err {
        StoreError::UnsupportedSchemaVersion { found, supported } => {
            assert_eq!(found, SchemaVersion::new(1, 9));
            assert_eq!(supported, LATEST_SCHEMA_VERSION);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn open_with_limit_refuses_versions_above_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    PackageIndex::create(&path, Some(SchemaVersion::new(1, 2))).unwrap();

    assert!(PackageIndex::open_with_limit(&path, SchemaVersion::new(1, 1)).is_err());
    let index = PackageIndex::open_with_limit(&path, SchemaVersion::new(1, 2)).unwrap();
    assert_eq!(index.version(), SchemaVersion::new(1, 2));
}

#[test]
fn hash_short_circuit_since_1_1() {
    let mut index = PackageIndex::create_in_memory(Some(SchemaVersion::new(1, 1))).unwrap();
    let m = manifest("A", "1.0");
    let id = index.add_manifest(&m, None).unwrap();
    assert!(index
        .get_property_by_manifest_id(id, PackageProperty::ManifestHash)
        .unwrap()
        .is_some());

    assert_eq!(index.update_manifest(&m, None).unwrap(), (false, id));

    let mut changed = m.clone();
    changed.installers[0].url = Some("https://example.invalid/a.msi".to_owned());
    assert_eq!(index.update_manifest(&changed, None).unwrap(), (true, id));
    assert_eq!(index.update_manifest(&changed, None).unwrap(), (false, id));
}

#[test]
fn packaging_with_vacuum_keeps_index_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    {
        let mut index = PackageIndex::create(&path, None).unwrap();
        let a = index.add_manifest(&manifest("A", "1.0"), None).unwrap();
        index.add_manifest(&manifest("B", "1.0"), None).unwrap();
        index.remove_manifest_by_id(a).unwrap();
        let report = index.prepare_for_packaging(true).unwrap();
        assert!(report.vacuumed);
        assert!(report.removed_values >= 3);
        assert!(index.check_consistency().unwrap().is_empty());
    }

    let index = PackageIndex::open(&path).unwrap();
    let everything = index.search(&SearchRequest::new()).unwrap();
    assert_eq!(everything.matches.len(), 1);
    assert_eq!(everything.matches[0].package.id, "B");
}

#[test]
fn consistency_check_reports_dangling_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    {
        let mut index = PackageIndex::create(&path, None).unwrap();
        let mut m = manifest("A", "1.0");
        m.tags = vec!["t".to_owned()];
        index.add_manifest(&m, None).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute("DELETE FROM tags", []).unwrap();
    }
    let index = PackageIndex::open(&path).unwrap();
    let problems = index.check_consistency().unwrap();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("tags"));
}
