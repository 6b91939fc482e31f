use pretty_assertions::assert_eq;
use quarry_core::{ArtifactKey, Availability, CancellationToken};
use quarry_index::{Field, IndexStore, QueryExpr};

use super::fixtures::{
    scan_context, version_dir, write_artifact, write_jar, write_pom, CollectingConsole,
};

#[test]
fn scans_maven_layout_into_records() {
    let repo = tempfile::tempdir().unwrap();
    let root = repo.path();

    write_pom(root, "org.example", "lib", "1.0.0", "jar");
    let jar = write_artifact(
        root,
        "org.example",
        "lib",
        "1.0.0",
        &["com.example.Foo", "com.example.Foo$Inner"],
    );
    std::fs::write(
        jar.with_extension("jar.sha1"),
        "ABC1230000000000000000000000000000000000  lib-1.0.0.jar\n",
    )
    .unwrap();
    write_jar(
        &version_dir(root, "org.example", "lib", "1.0.0").join("lib-1.0.0-sources.jar"),
        &[],
    );
    write_pom(root, "org.example", "parent", "3", "pom");

    let console = CollectingConsole::default();
    let cancel = CancellationToken::new();
    let store = IndexStore::in_memory();
    let count = store
        .scan_repository(root, &scan_context(&console, &cancel, false))
        .unwrap();
    assert_eq!(count, 2);
    assert!(console.errors.lock().unwrap().is_empty());

    let lib = store.get(&ArtifactKey::new("org.example", "lib", "1.0.0"));
    assert_eq!(lib.len(), 1);
    let lib = &lib[0];
    assert_eq!(lib.packaging, "jar");
    assert_eq!(lib.sha1.as_deref(), Some("abc1230000000000000000000000000000000000"));
    assert_eq!(lib.class_names, vec!["com.example.Foo".to_string()]);
    assert_eq!(lib.sources, Availability::Present);
    assert_eq!(lib.javadoc, Availability::Absent);
    assert_eq!(lib.name.as_deref(), Some("lib library"));

    let parent = store.get(&ArtifactKey::new("org.example", "parent", "3"));
    assert_eq!(parent.len(), 1);
    assert_eq!(parent[0].extension, "pom");
}

#[test]
fn minimal_scan_keeps_checksums_but_not_classes() {
    let repo = tempfile::tempdir().unwrap();
    write_artifact(repo.path(), "org.example", "lib", "1.0.0", &["com.example.Foo"]);

    let console = CollectingConsole::default();
    let cancel = CancellationToken::new();
    let store = IndexStore::in_memory();
    store
        .scan_repository(repo.path(), &scan_context(&console, &cancel, true))
        .unwrap();

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].class_names.is_empty());
    assert_eq!(records[0].sha1.as_ref().map(String::len), Some(40));
}

#[test]
fn unreadable_artifact_is_reported_and_skipped() {
    let repo = tempfile::tempdir().unwrap();
    write_artifact(repo.path(), "org.example", "good", "1", &["com.example.Good"]);
    let bad = version_dir(repo.path(), "org.example", "bad", "1").join("bad-1.jar");
    std::fs::write(&bad, b"not a zip").unwrap();

    let console = CollectingConsole::default();
    let cancel = CancellationToken::new();
    let store = IndexStore::in_memory();
    let count = store
        .scan_repository(repo.path(), &scan_context(&console, &cancel, false))
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(console.errors.lock().unwrap().len(), 1);
    assert_eq!(
        store
            .query(&QueryExpr::wildcard(Field::ClassNames, "good*"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn cancelled_rebuild_keeps_previous_contents() {
    let repo = tempfile::tempdir().unwrap();
    write_artifact(repo.path(), "org.example", "lib", "1", &["com.example.Lib"]);

    let store = IndexStore::in_memory();
    store
        .add_record(super::fixtures::record("org.example", "previous", "1"))
        .unwrap();

    let console = CollectingConsole::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = store
        .rebuild_from(repo.path(), &scan_context(&console, &cancel, false))
        .unwrap_err();
    assert!(err.is_cancelled());

    let names: Vec<String> = store.records().into_iter().map(|r| r.artifact_id).collect();
    assert_eq!(names, vec!["previous"]);

    let fresh = CancellationToken::new();
    let count = store
        .rebuild_from(repo.path(), &scan_context(&console, &fresh, false))
        .unwrap();
    assert_eq!(count, 1);
    let names: Vec<String> = store.records().into_iter().map(|r| r.artifact_id).collect();
    assert_eq!(names, vec!["lib"]);
}

#[test]
fn plugin_jars_contribute_prefix_and_goals() {
    let repo = tempfile::tempdir().unwrap();
    let root = repo.path();
    write_pom(root, "org.example.plugins", "demo-maven-plugin", "1.0", "maven-plugin");
    let jar = version_dir(root, "org.example.plugins", "demo-maven-plugin", "1.0")
        .join("demo-maven-plugin-1.0.jar");
    let descriptor = br#"<plugin>
  <goalPrefix>demo</goalPrefix>
  <mojos><mojo><goal>run</goal></mojo></mojos>
</plugin>"#;
    write_jar(&jar, &[("META-INF/maven/plugin.xml", descriptor)]);

    let console = CollectingConsole::default();
    let cancel = CancellationToken::new();
    let store = IndexStore::in_memory();
    store
        .scan_repository(root, &scan_context(&console, &cancel, false))
        .unwrap();

    let hits = store
        .query(&QueryExpr::term(Field::PluginPrefix, "demo"))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].packaging, "maven-plugin");
    assert_eq!(hits[0].plugin_goals, vec!["run".to_string()]);
}
