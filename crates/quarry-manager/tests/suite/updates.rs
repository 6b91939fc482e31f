use std::path::Path;
use std::time::Duration;

use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use quarry_core::{IndexInfo, UpdateCommand};
use quarry_index::remote::{chunk_path, DESCRIPTOR_PATH, SNAPSHOT_PATH};
use quarry_index::{IndexStore, Publisher};
use quarry_manager::IndexManager;

use super::fixtures::{in_memory_manager, record, write_artifact, WAIT};

fn register_remote(manager: &IndexManager, update_url: &Path) {
    let info = IndexInfo::remote(
        "central",
        "https://repo.example.com/maven2",
        Some(update_url.display().to_string()),
    );
    manager.register(info, false).unwrap();
}

fn artifact_ids(manager: &IndexManager, index: &str) -> Vec<String> {
    let mut ids: Vec<String> = manager
        .registry()
        .store(index)
        .unwrap()
        .records()
        .into_iter()
        .map(|record| record.artifact_id)
        .collect();
    ids.sort();
    ids
}

#[test]
fn first_update_unpacks_the_full_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    publisher.publish_full(&source, "chain-1", 1_000).unwrap();

    let (manager, _console) = in_memory_manager();
    register_remote(&manager, publisher.dir());

    let command = manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert_eq!(
        command,
        UpdateCommand::UnpackSnapshot {
            target: "central".into(),
            force: false
        }
    );
    assert!(manager.wait_idle(WAIT));

    assert_eq!(artifact_ids(&manager, "central"), vec!["a"]);
    let info = manager.registry().info("central").unwrap();
    assert!(!info.is_fresh);
    assert_eq!(info.last_update_time, Some(1_000));
}

#[test]
fn fetch_delta_merges_incremental_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    publisher.publish_full(&source, "chain-1", 1_000).unwrap();

    let (manager, console) = in_memory_manager();
    register_remote(&manager, publisher.dir());
    manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));

    let delta = vec![record("central", "g", "b", "1")];
    source.add_record(delta[0].clone()).unwrap();
    publisher.publish_incremental(&source, &delta, 2_000).unwrap();

    let command = manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(matches!(command, UpdateCommand::FetchDelta { force: false, .. }));
    assert!(manager.wait_idle(WAIT));

    assert_eq!(artifact_ids(&manager, "central"), vec!["a", "b"]);
    let store = manager.registry().store("central").unwrap();
    assert_eq!(store.meta().last_incremental, Some(1));
    let info = manager.registry().info("central").unwrap();
    assert_eq!(info.last_update_time, Some(2_000));

    // Nothing newer published: a second fetch is a no-op.
    manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));
    assert!(console
        .infos
        .lock()
        .iter()
        .any(|line| line == "index central is up to date"));
    assert!(console.errors.lock().is_empty(), "{:?}", console.errors.lock());
}

#[test]
fn missing_chunk_falls_back_to_the_full_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    publisher.publish_full(&source, "chain-1", 1_000).unwrap();

    let (manager, console) = in_memory_manager();
    register_remote(&manager, publisher.dir());
    manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));

    for (idx, id) in ["b", "c"].into_iter().enumerate() {
        let delta = vec![record("central", "g", id, "1")];
        source.add_record(delta[0].clone()).unwrap();
        publisher
            .publish_incremental(&source, &delta, 2_000 + idx as u64)
            .unwrap();
    }
    // Listed in the descriptor but gone from the server.
    std::fs::remove_file(publisher.dir().join(chunk_path(1))).unwrap();

    manager
        .enqueue(
            UpdateCommand::FetchDelta {
                target: "central".into(),
                force: false,
            },
            Duration::ZERO,
        );
    assert!(manager.wait_idle(WAIT));

    assert_eq!(artifact_ids(&manager, "central"), vec!["a", "b", "c"]);
    assert!(console.errors.lock().is_empty(), "{:?}", console.errors.lock());
}

#[test]
fn corrupt_chunk_leaves_the_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    publisher.publish_full(&source, "chain-1", 1_000).unwrap();

    let (manager, console) = in_memory_manager();
    register_remote(&manager, publisher.dir());
    manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));

    for (idx, id) in ["b", "c"].into_iter().enumerate() {
        let delta = vec![record("central", "g", id, "1")];
        source.add_record(delta[0].clone()).unwrap();
        publisher
            .publish_incremental(&source, &delta, 2_000 + idx as u64)
            .unwrap();
    }
    std::fs::write(publisher.dir().join(chunk_path(2)), b"garbage").unwrap();

    let command = manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(matches!(command, UpdateCommand::FetchDelta { .. }));
    assert!(manager.wait_idle(WAIT));

    let errors = console.errors.lock();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("fetch-delta central"), "{}", errors[0]);
    drop(errors);

    // Chunk 1 was valid, but nothing lands unless every chunk does.
    assert_eq!(artifact_ids(&manager, "central"), vec!["a"]);
    let store = manager.registry().store("central").unwrap();
    assert_eq!(store.meta().last_incremental, Some(0));
    assert_eq!(store.meta().timestamp, Some(1_000));
    assert_eq!(
        manager.registry().info("central").unwrap().last_update_time,
        Some(1_000)
    );
}

#[test]
fn snapshot_is_only_unpacked_when_newer_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    publisher.publish_full(&source, "chain-1", 1_000).unwrap();

    let (manager, _console) = in_memory_manager();
    register_remote(&manager, publisher.dir());
    manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));

    let store = manager.registry().store("central").unwrap();
    store.add_record(record("central", "g", "local-only", "1")).unwrap();

    let unpack = |force| UpdateCommand::UnpackSnapshot {
        target: "central".into(),
        force,
    };
    manager.enqueue(unpack(false), Duration::ZERO);
    assert!(manager.wait_idle(WAIT));
    assert_eq!(artifact_ids(&manager, "central"), vec!["a", "local-only"]);

    manager.enqueue(unpack(true), Duration::ZERO);
    assert!(manager.wait_idle(WAIT));
    assert_eq!(artifact_ids(&manager, "central"), vec!["a"]);
}

#[test]
fn failed_update_keeps_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    publisher.publish_full(&source, "chain-1", 1_000).unwrap();

    let (manager, console) = in_memory_manager();
    register_remote(&manager, publisher.dir());
    manager.schedule_update("central", false, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));

    std::fs::write(publisher.dir().join(SNAPSHOT_PATH), b"not an archive").unwrap();
    manager.schedule_update("central", true, Duration::ZERO).unwrap();
    assert!(manager.wait_idle(WAIT));

    assert_eq!(artifact_ids(&manager, "central"), vec!["a"]);
    let errors = console.errors.lock();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("unpack-snapshot central"), "{}", errors[0]);
    assert_eq!(
        manager.registry().info("central").unwrap().last_update_time,
        Some(1_000)
    );
}

#[test]
fn reindex_rebuilds_the_local_index() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    write_artifact(&repo, "org.example", "lib", "1.0.0", &["org.example.Lib"], None);
    write_artifact(&repo, "org.example", "util", "2.0", &[], None);

    let (manager, console) = in_memory_manager();
    // A new local index queues its own reindex.
    manager.register(IndexInfo::local("local", &repo), false).unwrap();
    assert!(manager.wait_idle(WAIT));

    assert_eq!(artifact_ids(&manager, "local"), vec!["lib", "util"]);
    assert!(!manager.registry().info("local").unwrap().is_fresh);
    assert!(console
        .infos
        .lock()
        .iter()
        .any(|line| line.starts_with("indexed 2 artifacts")));
}

#[test]
fn cancelling_before_the_debounce_drops_queued_work() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    write_artifact(&repo, "org.example", "lib", "1.0.0", &[], None);

    let (manager, _console) = in_memory_manager();
    manager
        .registry()
        .register(IndexInfo::local("local", &repo), false)
        .unwrap();
    register_remote(&manager, &dir.path().join("nowhere"));

    let delay = Duration::from_millis(300);
    manager.schedule_update("local", false, delay).unwrap();
    manager.schedule_update("central", false, delay).unwrap();
    assert_eq!(manager.cancel_updates(), 2);
    assert!(manager.is_idle());

    std::thread::sleep(Duration::from_millis(500));
    assert!(manager.registry().store("local").unwrap().is_empty());
    assert!(manager.registry().info("local").unwrap().is_fresh);
}

#[test]
fn remote_updates_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));
    let source = IndexStore::in_memory();
    source.add_record(record("central", "g", "a", "1")).unwrap();
    source.add_record(record("central", "g", "b", "1")).unwrap();
    publisher.publish_full(&source, "chain-9", 5_000).unwrap();

    let server = MockServer::start();
    let descriptor = server.mock(|when, then| {
        when.method(GET).path(format!("/index/{DESCRIPTOR_PATH}"));
        then.status(200)
            .body(std::fs::read(publisher.dir().join(DESCRIPTOR_PATH)).unwrap());
    });
    let snapshot = server.mock(|when, then| {
        when.method(GET).path(format!("/index/{SNAPSHOT_PATH}"));
        then.status(200)
            .body(std::fs::read(publisher.dir().join(SNAPSHOT_PATH)).unwrap());
    });

    let (manager, console) = in_memory_manager();
    manager
        .register(
            IndexInfo::remote("central", server.url("/maven2"), Some(server.url("/index"))),
            false,
        )
        .unwrap();

    // Never populated, but go through the incremental path anyway.
    manager.enqueue(
        UpdateCommand::FetchDelta {
            target: "central".into(),
            force: false,
        },
        Duration::ZERO,
    );
    assert!(manager.wait_idle(WAIT));

    descriptor.assert();
    snapshot.assert();
    assert!(console.errors.lock().is_empty(), "{:?}", console.errors.lock());
    assert_eq!(artifact_ids(&manager, "central"), vec!["a", "b"]);
    assert_eq!(
        manager.registry().info("central").unwrap().last_update_time,
        Some(5_000)
    );
}
