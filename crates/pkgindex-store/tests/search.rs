//! Local search semantics.

use pkgindex_schema::{
    Installer, Manifest, MatchType, PackageMatchField, PackageMatchFilter, SearchRequest,
};
use pkgindex_store::PackageIndex;

fn populated() -> PackageIndex {
    let mut index = PackageIndex::create_in_memory(None).unwrap();

    let mut editor = Manifest::new("Contoso.Editor", "1.0", "Contoso Editor");
    editor.moniker = Some("edit".to_owned());
    editor.tags = vec!["text".to_owned(), "dev".to_owned()];
    editor.publisher = Some("Contoso".to_owned());
    index.add_manifest(&editor, None).unwrap();

    let mut editor2 = editor.clone();
    editor2.version = "2.0".into();
    index.add_manifest(&editor2, None).unwrap();

    let mut viewer = Manifest::new("Fabrikam.Viewer", "3.1", "Viewer");
    viewer.tags = vec!["images".to_owned()];
    viewer.installers = vec![Installer {
        commands: vec!["view".to_owned()],
        package_family_name: Some("Fabrikam.Viewer_abc".to_owned()),
        ..Installer::default()
    }];
    index.add_manifest(&viewer, None).unwrap();

    let mut tool = Manifest::new("Litware.Tool", "0.9", "Editor Tools");
    tool.tags = vec!["dev".to_owned()];
    index.add_manifest(&tool, None).unwrap();

    index
}

fn ids(index: &PackageIndex, request: &SearchRequest) -> Vec<String> {
    index
        .search(request)
        .unwrap()
        .matches
        .into_iter()
        .map(|m| m.package.id.into_inner())
        .collect()
}

#[test]
fn empty_request_returns_every_package_once() {
    let index = populated();
    let result = index.search(&SearchRequest::new()).unwrap();
    assert_eq!(result.matches.len(), 3);
    assert!(!result.truncated);

    let editor = &result.matches[0].package;
    assert_eq!(editor.id, "Contoso.Editor");
    assert_eq!(editor.versions.len(), 2);
    assert_eq!(editor.versions[0].version.as_str(), "2.0");
    assert_eq!(editor.publisher.as_deref(), Some("Contoso"));
}

#[test]
fn query_runs_across_query_fields() {
    let index = populated();
    let request = SearchRequest::new().with_query(MatchType::Substring, "edit");
    let found = ids(&index, &request);
    // Id/name/moniker of Contoso.Editor and the name of Litware.Tool.
    assert_eq!(found, vec!["Contoso.Editor", "Litware.Tool"]);

    let result = index.search(&request).unwrap();
    assert_eq!(result.matches[0].criteria.field, PackageMatchField::Id);
    assert_eq!(result.matches[1].criteria.field, PackageMatchField::Name);
}

#[test]
fn match_types_behave() {
    let index = populated();
    let by = |mt, value: &str| {
        ids(
            &index,
            &SearchRequest::by_filter(PackageMatchField::Id, mt, value),
        )
    };
    assert_eq!(by(MatchType::Exact, "Contoso.Editor"), vec!["Contoso.Editor"]);
    assert!(by(MatchType::Exact, "contoso.editor").is_empty());
    assert_eq!(by(MatchType::CaseInsensitive, "contoso.editor"), vec!["Contoso.Editor"]);
    assert_eq!(by(MatchType::StartsWith, "fab"), vec!["Fabrikam.Viewer"]);
    assert!(by(MatchType::StartsWith, "%").is_empty());
    assert_eq!(by(MatchType::Wildcard, "ignored").len(), 3);
}

#[test]
fn inclusions_union_and_filters_intersect() {
    let index = populated();
    let request = SearchRequest::new()
        .with_inclusion(PackageMatchFilter::new(
            PackageMatchField::Tag,
            MatchType::Exact,
            "dev",
        ))
        .with_inclusion(PackageMatchFilter::new(
            PackageMatchField::Command,
            MatchType::Exact,
            "view",
        ));
    assert_eq!(
        ids(&index, &request),
        vec!["Contoso.Editor", "Litware.Tool", "Fabrikam.Viewer"]
    );

    let narrowed = request.with_filter(PackageMatchFilter::new(
        PackageMatchField::Name,
        MatchType::Substring,
        "editor",
    ));
    assert_eq!(ids(&index, &narrowed), vec!["Contoso.Editor", "Litware.Tool"]);
}

#[test]
fn filters_alone_seed_and_narrow() {
    let index = populated();
    let request = SearchRequest::by_filter(PackageMatchField::Tag, MatchType::Exact, "dev")
        .with_filter(PackageMatchFilter::new(
            PackageMatchField::Publisher,
            MatchType::Exact,
            "Contoso",
        ));
    assert_eq!(ids(&index, &request), vec!["Contoso.Editor"]);
}

#[test]
fn later_version_fields_are_searchable() {
    let index = populated();
    let request = SearchRequest::by_filter(
        PackageMatchField::PackageFamilyName,
        MatchType::Exact,
        "Fabrikam.Viewer_abc",
    );
    assert_eq!(ids(&index, &request), vec!["Fabrikam.Viewer"]);
}

#[test]
fn limit_truncates_and_flags() {
    let index = populated();
    let result = index.search(&SearchRequest::new().with_limit(2)).unwrap();
    assert_eq!(result.matches.len(), 2);
    assert!(result.truncated);

    let exact = index.search(&SearchRequest::new().with_limit(3)).unwrap();
    assert_eq!(exact.matches.len(), 3);
    assert!(!exact.truncated);
}

#[test]
fn other_casing_of_an_id_extends_the_same_package() {
    let mut index = populated();
    index
        .add_manifest(&Manifest::new("CONTOSO.EDITOR", "3.0", "Contoso Editor"), None)
        .unwrap();

    let result = index.search(&SearchRequest::new()).unwrap();
    assert_eq!(result.matches.len(), 3);
    let editor = &result.matches[0].package;
    assert_eq!(editor.id, "Contoso.Editor");
    assert_eq!(editor.versions.len(), 3);
    assert_eq!(editor.versions[0].version.as_str(), "3.0");

    // Exact compares against the stored spelling; CaseInsensitive does not.
    let by = |mt, value: &str| {
        ids(
            &index,
            &SearchRequest::by_filter(PackageMatchField::Id, mt, value),
        )
    };
    assert!(by(MatchType::Exact, "CONTOSO.EDITOR").is_empty());
    assert_eq!(by(MatchType::Exact, "Contoso.Editor"), vec!["Contoso.Editor"]);
    assert_eq!(
        by(MatchType::CaseInsensitive, "CONTOSO.EDITOR"),
        vec!["Contoso.Editor"]
    );
}
