use std::sync::Arc;

use pretty_assertions::assert_eq;
use quarry_core::{ArtifactKey, IndexInfo, IndexKind, IndexRecord};
use quarry_manager::{IndexManager, ManagerError, SearchType, LOCAL_INDEX, WORKSPACE_INDEX};

use super::fixtures::{config, digest, write_artifact, CollectingConsole, WAIT};

fn open(repo: &std::path::Path, indexes: &std::path::Path) -> (IndexManager, Arc<CollectingConsole>) {
    let console = Arc::new(CollectingConsole::default());
    let manager = IndexManager::open_with_console(&config(repo, indexes), console.clone()).unwrap();
    assert!(manager.wait_idle(WAIT));
    (manager, console)
}

#[test]
fn indexed_artifact_is_found_by_digest_class_and_coordinate() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    write_artifact(
        &repo,
        "org.example",
        "lib",
        "1.0.0",
        &["com.example.Foo"],
        Some(&digest("abc123")),
    );
    let (manager, _console) = open(&repo, &dir.path().join("indexes"));

    let hit = manager.identify(&digest("abc123")).unwrap();
    assert_eq!(hit.key(), ArtifactKey::new("org.example", "lib", "1.0.0"));
    assert_eq!(hit.packaging, "jar");
    assert_eq!(hit.class_names, vec!["com.example.Foo".to_string()]);

    let by_class = manager.search(SearchType::ByClassName, "Foo");
    assert_eq!(by_class.len(), 1);
    let artifact = by_class.values().next().unwrap();
    assert_eq!(artifact.class_name.as_deref(), Some("Foo"));
    assert_eq!(artifact.package_name.as_deref(), Some("com.example"));
    assert_eq!(artifact.files.len(), 1);

    let by_coordinate = manager.search(SearchType::ByCoordinate, "lib");
    assert_eq!(by_coordinate.len(), 1);
    let artifact = &by_coordinate["org.example : lib"];
    assert_eq!(artifact.class_name, None);
    assert_eq!(artifact.files.len(), 1);

    let by_checksum = manager.search(SearchType::ByChecksumPrefix, "abc123");
    assert_eq!(by_checksum.len(), 1);
}

#[test]
fn installed_jars_are_indexed_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let (manager, _console) = open(&repo, &dir.path().join("indexes"));

    let key = ArtifactKey::new("org.example", "fresh", "0.1");
    assert!(manager.find_artifact(&key).is_none());

    let jar = write_artifact(&repo, "org.example", "fresh", "0.1", &["org.example.Fresh"], None);
    assert!(manager.artifact_installed(&key, &jar).unwrap());
    assert_eq!(manager.find_artifact(&key).unwrap().file_name, "fresh-0.1.jar");

    let pom = jar.with_extension("pom");
    assert!(!manager.artifact_installed(&key, &pom).unwrap());

    // The path disagrees with the announced coordinate.
    let other = ArtifactKey::new("org.example", "fresh", "0.2");
    assert!(!manager.artifact_installed(&other, &jar).unwrap());
}

#[test]
fn workspace_artifacts_shadow_the_local_index() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    write_artifact(&repo, "org.example", "lib", "1.0.0", &[], None);
    let (manager, _console) = open(&repo, &dir.path().join("indexes"));

    let key = ArtifactKey::new("org.example", "lib", "1.0.0");
    assert_eq!(manager.find_artifact(&key).unwrap().repository_id, LOCAL_INDEX);

    manager
        .add_workspace_artifact(IndexRecord::new("", key.clone(), "jar"))
        .unwrap();
    assert_eq!(
        manager.find_artifact(&key).unwrap().repository_id,
        WORKSPACE_INDEX
    );

    assert!(manager.remove_workspace_artifact(&key).unwrap());
    assert_eq!(manager.find_artifact(&key).unwrap().repository_id, LOCAL_INDEX);
}

#[test]
fn update_requests_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    let (manager, _console) = open(&repo, &dir.path().join("indexes"));

    let err = manager
        .schedule_update(WORKSPACE_INDEX, false, std::time::Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, ManagerError::NotUpdatable { .. }), "{err:?}");

    let err = manager
        .schedule_update("nope", false, std::time::Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownIndex { .. }), "{err:?}");
}

#[test]
fn reconfiguring_the_local_repository_rescans_it() {
    let dir = tempfile::tempdir().unwrap();
    let old_repo = dir.path().join("old");
    let new_repo = dir.path().join("new");
    write_artifact(&old_repo, "org.example", "old-lib", "1", &[], None);
    write_artifact(&new_repo, "org.example", "new-lib", "1", &[], None);
    let (manager, _console) = open(&old_repo, &dir.path().join("indexes"));
    assert!(manager
        .find_artifact(&ArtifactKey::new("org.example", "old-lib", "1"))
        .is_some());

    manager.reconfigure_local_repository(&new_repo).unwrap();
    assert!(manager.wait_idle(WAIT));

    assert!(manager
        .find_artifact(&ArtifactKey::new("org.example", "new-lib", "1"))
        .is_some());
    assert!(manager
        .find_artifact(&ArtifactKey::new("org.example", "old-lib", "1"))
        .is_none());
    let local = manager.registry().info(LOCAL_INDEX).unwrap();
    assert_eq!(local.repository_directory(), Some(new_repo.as_path()));
}

#[test]
fn runtime_registrations_are_restored_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    let indexes = dir.path().join("indexes");
    {
        let (manager, _console) = open(&repo, &indexes);
        manager
            .register(IndexInfo::remote("mirror", "https://mirror.example.com/m2", None), false)
            .unwrap();
    }

    let (manager, _console) = open(&repo, &indexes);
    let mirror = manager.registry().info("mirror").unwrap();
    assert_eq!(mirror.kind(), IndexKind::Remote);
    assert_eq!(
        mirror.repository_url.as_deref(),
        Some("https://mirror.example.com/m2")
    );
    let mut names: Vec<String> = manager
        .registry()
        .all()
        .into_iter()
        .map(|info| info.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["local", "mirror", "workspace"]);
}
