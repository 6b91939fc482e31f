use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use quarry_core::{IndexInfo, IndexKind};
use quarry_manager::{IndexRegistry, ManagerError, REGISTRY_FILE};

use super::fixtures::{archive_of, record};

#[test]
fn update_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("indexes");

    {
        let registry = IndexRegistry::open(&root).unwrap();
        let info = IndexInfo::remote("central", "https://repo.example.com/maven2", None);
        assert!(!registry.register(info, false).unwrap());

        let store = registry.store("central").unwrap();
        let archive = archive_of(&[record("central", "g", "a", "1")], 500);
        store.replace_from(archive.as_slice()).unwrap();
        registry.record_update("central", 500, true).unwrap();
    }
    assert!(root.join(REGISTRY_FILE).is_file());

    let registry = IndexRegistry::open(&root).unwrap();
    let known = registry.known();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].name(), "central");
    assert!(registry.info("central").is_none(), "nothing is registered until asked");

    let info = IndexInfo::remote("central", "https://repo.example.com/maven2", None);
    registry.register(info, false).unwrap();
    let (info, store) = registry.lookup("central").unwrap();
    assert_eq!(info.last_update_time, Some(500));
    assert!(!info.is_fresh);
    assert_eq!(store.len(), 1);
}

#[test]
fn update_state_is_dropped_when_the_store_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("indexes");
    {
        let registry = IndexRegistry::open(&root).unwrap();
        let info = IndexInfo::remote("central", "https://repo.example.com/maven2", None);
        registry.register(info, false).unwrap();
        let store = registry.store("central").unwrap();
        store
            .replace_from(archive_of(&[record("central", "g", "a", "1")], 5).as_slice())
            .unwrap();
        registry.record_update("central", 5, true).unwrap();
    }
    std::fs::remove_dir_all(root.join("central")).unwrap();

    let registry = IndexRegistry::open(&root).unwrap();
    registry
        .register(IndexInfo::remote("central", "https://repo.example.com/maven2", None), false)
        .unwrap();
    let info = registry.info("central").unwrap();
    assert!(info.is_fresh);
    assert_eq!(info.last_update_time, None);
}

#[test]
fn local_index_without_a_store_needs_a_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let registry = IndexRegistry::open(dir.path().join("indexes")).unwrap();
    let info = IndexInfo::local("local", dir.path().join("repo"));
    assert!(registry.register(info.clone(), false).unwrap());

    // Same kind again: keeps the store, reindex only on request.
    assert!(!registry.register(info.clone(), false).unwrap());
    assert!(registry.register(info, true).unwrap());
}

#[test]
fn kind_is_fixed_after_registration() {
    let registry = IndexRegistry::in_memory();
    registry
        .register(IndexInfo::remote("mirror", "https://mirror.example.com", None), false)
        .unwrap();
    let err = registry
        .register(IndexInfo::local("mirror", "/tmp/repo"), false)
        .unwrap_err();
    assert!(
        matches!(
            err,
            ManagerError::KindMismatch {
                existing: IndexKind::Remote,
                requested: IndexKind::Local,
                ..
            }
        ),
        "{err:?}"
    );
}

#[test]
fn unregister_can_delete_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("indexes");
    let registry = IndexRegistry::open(&root).unwrap();
    registry
        .register(IndexInfo::remote("a", "https://a.example.com", None), false)
        .unwrap();
    registry
        .register(IndexInfo::remote("b", "https://b.example.com", None), false)
        .unwrap();

    let removed = registry.unregister("a", true).unwrap().unwrap();
    assert_eq!(removed.name(), "a");
    assert!(!root.join("a").exists());

    registry.unregister("b", false).unwrap();
    assert!(root.join("b").exists());
    assert!(registry.known().is_empty());
    assert!(registry.unregister("missing", true).unwrap().is_none());
}

#[test]
fn snapshots_of_all_are_unaffected_by_later_changes() {
    let registry = IndexRegistry::in_memory();
    registry.register(IndexInfo::workspace("one"), false).unwrap();
    let before = registry.all();
    registry.register(IndexInfo::workspace("two"), false).unwrap();
    registry.unregister("one", false).unwrap();

    let names: Vec<&str> = before.iter().map(IndexInfo::name).collect();
    assert_eq!(names, vec!["one"]);
}

#[test]
fn invalidate_repoints_local_and_keeps_remote_caches() {
    let dir = tempfile::tempdir().unwrap();
    let registry = IndexRegistry::open(dir.path().join("indexes")).unwrap();
    registry
        .register(IndexInfo::local("local", dir.path().join("old-repo")), false)
        .unwrap();
    registry
        .register(IndexInfo::remote("central", "https://repo.example.com", None), false)
        .unwrap();
    registry.register(IndexInfo::workspace("workspace"), false).unwrap();

    let remote = registry.store("central").unwrap();
    remote
        .replace_from(archive_of(&[record("central", "g", "cached", "1")], 777).as_slice())
        .unwrap();
    registry.record_update("central", 777, true).unwrap();
    drop(remote);
    registry
        .store("workspace")
        .unwrap()
        .add_record(record("workspace", "g", "ws", "1"))
        .unwrap();

    let seen: Arc<Mutex<Vec<Option<PathBuf>>>> = Arc::default();
    let sink = Arc::clone(&seen);
    registry.on_invalidated(move |root| sink.lock().push(root.map(PathBuf::from)));

    let new_root = dir.path().join("new-repo");
    let reindex = registry.invalidate(Some(&new_root)).unwrap();
    assert_eq!(reindex, vec!["local".to_string()]);

    let local = registry.info("local").unwrap();
    assert_eq!(local.repository_directory(), Some(new_root.as_path()));
    assert!(local.is_fresh);

    let (central, store) = registry.lookup("central").unwrap();
    assert_eq!(central.last_update_time, Some(777));
    assert_eq!(store.records()[0].artifact_id, "cached");
    assert_eq!(store.meta().timestamp, Some(777));

    // Workspace contexts are not torn down.
    assert_eq!(registry.store("workspace").unwrap().len(), 1);
    assert_eq!(*seen.lock(), vec![Some(new_root)]);
}

#[test]
fn invalidate_keeps_contexts_whose_stores_are_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let registry = IndexRegistry::open(dir.path().join("indexes")).unwrap();
    registry
        .register(IndexInfo::local("local", dir.path().join("old-repo")), false)
        .unwrap();
    registry
        .register(IndexInfo::remote("central", "https://repo.example.com", None), false)
        .unwrap();

    let held = registry.store("central").unwrap();
    held.replace_from(archive_of(&[record("central", "g", "cached", "1")], 900).as_slice())
        .unwrap();
    registry.record_update("central", 900, true).unwrap();
    let held_local = registry.store("local").unwrap();

    let new_root = dir.path().join("new-repo");
    let reindex = registry.invalidate(Some(&new_root)).unwrap();
    assert_eq!(reindex, vec!["local".to_string()]);

    let mut names: Vec<String> = registry
        .all()
        .into_iter()
        .map(|info| info.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["central", "local"]);

    let (central, store) = registry.lookup("central").unwrap();
    assert_eq!(central.last_update_time, Some(900));
    assert!(Arc::ptr_eq(&store, &held));
    assert_eq!(held.records()[0].artifact_id, "cached");
    assert_eq!(held.meta().timestamp, Some(900));

    let local = registry.info("local").unwrap();
    assert_eq!(local.repository_directory(), Some(new_root.as_path()));
    assert!(local.is_fresh);
    assert!(Arc::ptr_eq(&registry.store("local").unwrap(), &held_local));
}
