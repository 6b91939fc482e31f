use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use quarry_index::archive::read_archive;
use quarry_index::{
    ArchiveManifest, Field, IndexError, IndexStore, Publisher, QueryExpr, RemoteDescriptor,
    UpdatePlan,
};

use super::fixtures::record;

fn archive_of(records: &[quarry_core::IndexRecord], created_at: u64) -> Vec<u8> {
    let source = IndexStore::in_memory();
    for record in records {
        source.add_record(record.clone()).unwrap();
    }
    let mut out = Vec::new();
    source
        .snapshot_with(&mut out, &ArchiveManifest::new(created_at))
        .unwrap();
    out
}

#[test]
fn merge_unions_and_last_merge_wins() {
    let mut shared_a = record("g", "shared", "1");
    shared_a.size_bytes = 1;
    let mut shared_b = record("g", "shared", "1");
    shared_b.size_bytes = 2;

    let a = archive_of(&[record("g", "a", "1"), shared_a], 100);
    let b = archive_of(&[record("g", "b", "1"), shared_b], 200);

    let store = IndexStore::in_memory();
    assert_eq!(store.merge_from(a.as_slice()).unwrap(), 100);
    assert_eq!(store.merge_from(b.as_slice()).unwrap(), 200);

    let mut names: Vec<String> = store.records().into_iter().map(|r| r.artifact_id).collect();
    names.sort();
    assert_eq!(names, vec!["a", "b", "shared"]);

    let shared = store
        .query(&QueryExpr::term(Field::ArtifactId, "shared"))
        .unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].size_bytes, 2);
    assert_eq!(store.meta().timestamp, Some(200));
}

#[test]
fn batched_merge_applies_every_archive_in_one_install() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("remote");
    let chunks: Vec<_> = [("b", 200), ("c", 300)]
        .into_iter()
        .map(|(name, at)| {
            let bytes = archive_of(&[record("g", name, "1")], at);
            read_archive(bytes.as_slice()).unwrap()
        })
        .collect();

    {
        let store = IndexStore::open(&location).unwrap();
        store.add_record(record("g", "a", "1")).unwrap();
        assert_eq!(store.merge_archives(chunks).unwrap(), 300);
        assert_eq!(store.meta().timestamp, Some(300));
    }

    let store = IndexStore::open(&location).unwrap();
    let mut names: Vec<String> = store.records().into_iter().map(|r| r.artifact_id).collect();
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn replace_discards_previous_records_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("remote");
    let incoming = archive_of(&[record("g", "new", "1")], 42);

    {
        let store = IndexStore::open(&location).unwrap();
        store.add_record(record("g", "old", "1")).unwrap();
        assert_eq!(store.replace_from(incoming.as_slice()).unwrap(), 42);
        // Writes after the replace land in the new journal epoch.
        store.add_record(record("g", "later", "1")).unwrap();
    }

    let store = IndexStore::open(&location).unwrap();
    let mut names: Vec<String> = store.records().into_iter().map(|r| r.artifact_id).collect();
    names.sort();
    assert_eq!(names, vec!["later", "new"]);
    assert_eq!(store.meta().timestamp, Some(42));
}

#[test]
fn conditional_replace_requires_a_strictly_newer_archive() {
    let store = IndexStore::in_memory();
    store.add_record(record("g", "current", "1")).unwrap();

    let same_age = archive_of(&[record("g", "same", "1")], 50);
    assert_eq!(
        store
            .replace_from_if_newer(same_age.as_slice(), Some(50))
            .unwrap(),
        None
    );
    assert_eq!(store.records()[0].artifact_id, "current");

    let newer = archive_of(&[record("g", "newer", "1")], 51);
    assert_eq!(
        store.replace_from_if_newer(newer.as_slice(), Some(50)).unwrap(),
        Some(51)
    );
    assert_eq!(store.records()[0].artifact_id, "newer");

    let older = archive_of(&[record("g", "older", "1")], 10);
    assert_eq!(
        store.replace_from_if_newer(older.as_slice(), None).unwrap(),
        Some(10)
    );
    assert_eq!(store.records()[0].artifact_id, "older");
}

#[test]
fn malformed_replace_leaves_store_untouched() {
    let store = IndexStore::in_memory();
    store.add_record(record("g", "kept", "1")).unwrap();

    let mut truncated = archive_of(&[record("g", "new", "1")], 1);
    truncated.truncate(truncated.len() / 2);
    let err = store.replace_from(truncated.as_slice()).unwrap_err();
    assert!(matches!(err, IndexError::MalformedArchive { .. }), "{err:?}");

    let names: Vec<String> = store.records().into_iter().map(|r| r.artifact_id).collect();
    assert_eq!(names, vec!["kept"]);
}

#[test]
fn queries_see_either_old_or_new_contents_during_replace() {
    let store = Arc::new(IndexStore::in_memory());
    for idx in 0..200 {
        store
            .add_record(record("old.group", &format!("a{idx}"), "1"))
            .unwrap();
    }
    let replacement: Vec<_> = (0..300)
        .map(|idx| record("new.group", &format!("b{idx}"), "1"))
        .collect();
    let archive = archive_of(&replacement, 7);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let expr = QueryExpr::Or(vec![
                QueryExpr::term(Field::GroupId, "old.group"),
                QueryExpr::term(Field::GroupId, "new.group"),
            ]);
            while !done.load(Ordering::Acquire) {
                let count = store.query(&expr).unwrap().len();
                assert!(count == 200 || count == 300, "observed partial state: {count}");
            }
        })
    };

    store.replace_from(archive.as_slice()).unwrap();
    done.store(true, Ordering::Release);
    reader.join().unwrap();
    assert_eq!(store.len(), 300);
}

#[test]
fn published_chunks_catch_a_consumer_up() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = Publisher::new(dir.path().join("pub"));

    let source = IndexStore::in_memory();
    source.add_record(record("g", "a", "1")).unwrap();
    let first = publisher.publish_full(&source, "chain-7", 1_000).unwrap();
    assert_eq!(first.last_incremental, 0);

    let consumer = IndexStore::in_memory();
    let snapshot = std::fs::read(publisher.dir().join(quarry_index::remote::SNAPSHOT_PATH)).unwrap();
    consumer.replace_from(snapshot.as_slice()).unwrap();
    assert_eq!(consumer.meta().last_incremental, Some(0));

    let delta = vec![record("g", "b", "1")];
    source.add_record(delta[0].clone()).unwrap();
    let descriptor = publisher.publish_incremental(&source, &delta, 2_000).unwrap();
    assert_eq!(descriptor.incrementals, vec![1]);

    let text = std::fs::read_to_string(publisher.dir().join(quarry_index::remote::DESCRIPTOR_PATH)).unwrap();
    let parsed = RemoteDescriptor::parse(&text).unwrap();
    assert_eq!(parsed, descriptor);

    let plan = parsed.plan_for(&consumer.meta());
    assert_eq!(plan, UpdatePlan::Incremental(vec![1]));

    let chunk = std::fs::read(publisher.dir().join(quarry_index::remote::chunk_path(1))).unwrap();
    assert_eq!(consumer.merge_from(chunk.as_slice()).unwrap(), 2_000);
    assert_eq!(consumer.len(), 2);
    assert_eq!(parsed.plan_for(&consumer.meta()), UpdatePlan::UpToDate);
}
