use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use quarry_core::{now_millis, ArtifactKey, IndexRecord};
use quarry_storage::{read_archive_optional, write_archive_atomic, ArtifactKind};

use crate::archive::{read_archive, write_archive, ArchiveManifest, DecodedArchive};
use crate::error::Result;
use crate::journal::{remove_best_effort, Journal, JournalOp};
use crate::lock::StoreLock;
use crate::query::QueryExpr;
use crate::scan::{scan_repository, ScanContext};
use crate::snapshot::{Snapshot, StoreMeta};

pub const BASE_IMAGE_FILE: &str = "records.idx";
pub const JOURNAL_FILE: &str = "journal.log";
pub const LOCK_FILE: &str = ".lock";

const BASE_IMAGE_SCHEMA_VERSION: u32 = 1;
const DEFAULT_COMPACTION_THRESHOLD: usize = 4096;

#[derive(Serialize)]
struct BaseImageRef<'a> {
    epoch: u64,
    meta: &'a StoreMeta,
    records: Vec<&'a IndexRecord>,
}

#[derive(Deserialize)]
struct BaseImage {
    epoch: u64,
    meta: StoreMeta,
    records: Vec<IndexRecord>,
}

#[derive(Debug)]
struct Files {
    dir: PathBuf,
    journal: Journal,
    epoch: u64,
    _lock: StoreLock,
}

#[derive(Debug)]
struct Writer {
    files: Option<Files>,
    meta: StoreMeta,
}

/// Durable, queryable storage for one index context's records.
///
/// Reads are snapshot-isolated: [`IndexStore::query`] evaluates against the
/// state current when it started, even if a replace or rebuild swaps in new
/// contents meanwhile. Mutations are serialized through one writer lock and,
/// for on-disk stores, are journaled and synced before they return.
#[derive(Debug)]
pub struct IndexStore {
    state: RwLock<Arc<Snapshot>>,
    writer: Mutex<Writer>,
    compaction_threshold: usize,
}

impl IndexStore {
    /// Opens the store at `dir`, creating an empty one if nothing is there.
    ///
    /// Fails if the directory holds an unreadable or incompatible base image
    /// (the caller is expected to delete it and rebuild) or if another owner
    /// holds the store's lock.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let lock = StoreLock::acquire(&dir.join(LOCK_FILE))?;

        let base: Option<BaseImage> = read_archive_optional(
            &dir.join(BASE_IMAGE_FILE),
            ArtifactKind::IndexImage,
            BASE_IMAGE_SCHEMA_VERSION,
        )?;
        let (epoch, meta, mut snapshot) = match base {
            Some(base) => (base.epoch, base.meta, Snapshot::from_records(base.records)),
            None => (
                0,
                StoreMeta {
                    created_at: now_millis(),
                    ..StoreMeta::default()
                },
                Snapshot::new(),
            ),
        };

        let (mut journal, ops) = Journal::open(&dir.join(JOURNAL_FILE))?;
        let mut ops = ops.into_iter();
        match ops.next() {
            Some(JournalOp::Epoch(found)) if found == epoch => {
                let mut replayed = 0usize;
                for op in ops {
                    match op {
                        JournalOp::Upsert(record) => snapshot.upsert(record),
                        JournalOp::Remove(key) => {
                            snapshot.remove_key(&key);
                        }
                        JournalOp::Epoch(_) => {}
                    }
                    replayed += 1;
                }
                if replayed > 0 {
                    tracing::debug!(
                        target = "quarry.index",
                        dir = %dir.display(),
                        replayed,
                        "replayed journal"
                    );
                }
            }
            first => {
                if first.is_some() {
                    // The base image was rewritten after this journal started.
                    tracing::debug!(
                        target = "quarry.index",
                        path = %journal.path().display(),
                        "discarding journal from a previous base image"
                    );
                }
                journal.reset()?;
                journal.append(&JournalOp::Epoch(epoch))?;
            }
        }

        Ok(Self {
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(Writer {
                files: Some(Files {
                    dir: dir.to_path_buf(),
                    journal,
                    epoch,
                    _lock: lock,
                }),
                meta,
            }),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        })
    }

    /// A store with no on-disk footprint (workspace indexes).
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(Arc::new(Snapshot::new())),
            writer: Mutex::new(Writer {
                files: None,
                meta: StoreMeta {
                    created_at: now_millis(),
                    ..StoreMeta::default()
                },
            }),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }

    /// Whether `dir` holds a persisted base image.
    pub fn exists(dir: &Path) -> bool {
        dir.join(BASE_IMAGE_FILE).is_file()
    }

    /// Deletes a store directory. The store must not be open.
    pub fn delete_files(dir: &Path) -> Result<()> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[must_use]
    pub fn with_compaction_threshold(mut self, frames: usize) -> Self {
        self.compaction_threshold = frames.max(1);
        self
    }

    pub fn location(&self) -> Option<PathBuf> {
        self.writer.lock().files.as_ref().map(|files| files.dir.clone())
    }

    pub fn meta(&self) -> StoreMeta {
        self.writer.lock().meta.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upserts `record` keyed by coordinate and packaging.
    pub fn add_record(&self, record: IndexRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(files) = writer.files.as_mut() {
            files.journal.append(&JournalOp::Upsert(record.clone()))?;
        }
        {
            let mut state = self.state.write();
            Arc::make_mut(&mut state).upsert(record);
        }
        self.maybe_compact(&mut writer)
    }

    /// Removes every record stored under `key`. Returns `false` (and does
    /// nothing) when there is none.
    pub fn remove_record(&self, key: &ArtifactKey) -> Result<bool> {
        let mut writer = self.writer.lock();
        if self.state.read().get(key).is_empty() {
            return Ok(false);
        }
        if let Some(files) = writer.files.as_mut() {
            files.journal.append(&JournalOp::Remove(key.clone()))?;
        }
        {
            let mut state = self.state.write();
            Arc::make_mut(&mut state).remove_key(key);
        }
        self.maybe_compact(&mut writer)?;
        Ok(true)
    }

    /// Evaluates `expr` against a consistent view of the store. Results come
    /// in store order, which is not meaningful to callers.
    pub fn query(&self, expr: &QueryExpr) -> Result<Vec<IndexRecord>> {
        let snapshot = Arc::clone(&self.state.read());
        snapshot.query(expr)
    }

    /// Every record stored under `key` (one per packaging).
    pub fn get(&self, key: &ArtifactKey) -> Vec<IndexRecord> {
        let snapshot = Arc::clone(&self.state.read());
        snapshot.get(key).into_iter().cloned().collect()
    }

    pub fn records(&self) -> Vec<IndexRecord> {
        let snapshot = Arc::clone(&self.state.read());
        snapshot.records().cloned().collect()
    }

    /// Walks a repository and adds each artifact record as it is found.
    ///
    /// Records added before a cancellation stay in the store.
    pub fn scan_repository(&self, root: &Path, ctx: &ScanContext<'_>) -> Result<usize> {
        scan_repository(root, ctx, |record| self.add_record(record))
    }

    /// Replaces the whole store with a fresh scan of `root`.
    ///
    /// The scan fills a staging snapshot; the store only changes once the scan
    /// completes, so a cancelled or failed rebuild leaves the previous
    /// contents untouched.
    pub fn rebuild_from(&self, root: &Path, ctx: &ScanContext<'_>) -> Result<usize> {
        let mut staging = Snapshot::new();
        let count = scan_repository(root, ctx, |record| {
            staging.upsert(record);
            Ok(())
        })?;

        let mut writer = self.writer.lock();
        let meta = StoreMeta {
            created_at: writer.meta.created_at,
            timestamp: Some(now_millis()),
            chain_id: None,
            last_incremental: None,
        };
        self.install(&mut writer, staging, meta)?;
        Ok(count)
    }

    /// Removes every record.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let meta = StoreMeta {
            created_at: writer.meta.created_at,
            ..StoreMeta::default()
        };
        self.install(&mut writer, Snapshot::new(), meta)
    }

    /// Exports every record as a snapshot archive stamped with the current
    /// time.
    pub fn snapshot_to<W: Write>(&self, out: W) -> Result<()> {
        let meta = self.meta();
        let mut manifest = ArchiveManifest::new(now_millis());
        if let (Some(chain_id), Some(incremental)) = (meta.chain_id, meta.last_incremental) {
            manifest = manifest.with_chain(chain_id, incremental);
        }
        self.snapshot_with(out, &manifest)
    }

    /// Exports every record under an explicit manifest.
    pub fn snapshot_with<W: Write>(&self, out: W, manifest: &ArchiveManifest) -> Result<()> {
        let snapshot = Arc::clone(&self.state.read());
        write_archive(out, manifest, snapshot.records())
    }

    /// Discards all records and loads the archive read from `input`.
    ///
    /// The archive is fully decoded and verified before anything changes; a
    /// malformed or interrupted input leaves the store as it was. Returns the
    /// archive's creation timestamp.
    pub fn replace_from<R: Read>(&self, input: R) -> Result<u64> {
        let DecodedArchive { manifest, records } = read_archive(input)?;
        self.install_archive(manifest, records)
    }

    /// Like [`IndexStore::replace_from`], but only installs an archive created
    /// strictly after `than`. Returns `None` (store untouched) otherwise.
    pub fn replace_from_if_newer<R: Read>(&self, input: R, than: Option<u64>) -> Result<Option<u64>> {
        let DecodedArchive { manifest, records } = read_archive(input)?;
        if than.is_some_and(|than| manifest.created_at <= than) {
            tracing::debug!(
                target = "quarry.index",
                created_at = manifest.created_at,
                than = ?than,
                "archive is not newer than the store; skipping replace"
            );
            return Ok(None);
        }
        self.install_archive(manifest, records).map(Some)
    }

    fn install_archive(&self, manifest: ArchiveManifest, records: Vec<IndexRecord>) -> Result<u64> {
        let snapshot = Snapshot::from_records(records);

        let mut writer = self.writer.lock();
        let meta = StoreMeta {
            created_at: writer.meta.created_at,
            timestamp: Some(manifest.created_at),
            chain_id: manifest.chain_id.clone(),
            last_incremental: manifest.incremental,
        };
        self.install(&mut writer, snapshot, meta)?;

        tracing::debug!(
            target = "quarry.index",
            records = manifest.record_count,
            created_at = manifest.created_at,
            "replaced store from archive"
        );
        Ok(manifest.created_at)
    }

    /// Upserts every record of the archive read from `input` into the store.
    /// Returns the archive's creation timestamp.
    pub fn merge_from<R: Read>(&self, input: R) -> Result<u64> {
        let archive = read_archive(input)?;
        self.merge_archives(vec![archive])
    }

    /// Upserts decoded archives in order, later archives winning, and installs
    /// the result once: either every archive is applied or none is. Returns
    /// the creation timestamp of the last archive.
    pub fn merge_archives(&self, archives: Vec<DecodedArchive>) -> Result<u64> {
        let mut writer = self.writer.lock();
        if archives.is_empty() {
            return Ok(writer.meta.timestamp.unwrap_or_default());
        }
        let mut merged = Snapshot::clone(&self.state.read());
        let mut meta = writer.meta.clone();
        let mut latest = meta.timestamp.unwrap_or_default();

        for DecodedArchive { manifest, records } in archives {
            let count = records.len();
            for record in records {
                merged.upsert(record);
            }
            meta.timestamp = meta.timestamp.max(Some(manifest.created_at));
            if manifest.chain_id.is_some() {
                meta.chain_id = manifest.chain_id.clone();
            }
            if manifest.incremental.is_some() {
                meta.last_incremental = manifest.incremental;
            }
            latest = manifest.created_at;

            tracing::debug!(
                target = "quarry.index",
                records = count,
                created_at = manifest.created_at,
                incremental = ?manifest.incremental,
                "merging archive into store"
            );
        }

        self.install(&mut writer, merged, meta)?;
        Ok(latest)
    }

    /// Folds the journal into a fresh base image.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let snapshot = Snapshot::clone(&self.state.read());
        let meta = writer.meta.clone();
        self.install(&mut writer, snapshot, meta)
    }

    fn maybe_compact(&self, writer: &mut Writer) -> Result<()> {
        let due = writer
            .files
            .as_ref()
            .is_some_and(|files| files.journal.frames() > self.compaction_threshold);
        if !due {
            return Ok(());
        }
        let snapshot = Snapshot::clone(&self.state.read());
        let meta = writer.meta.clone();
        self.install(writer, snapshot, meta)
    }

    /// Persists `snapshot` as the new base image (if on disk) and then makes
    /// it visible to readers.
    ///
    /// The image is written under a new epoch before the journal is reset; a
    /// crash in between leaves a journal whose epoch no longer matches, which
    /// `open` discards instead of replaying stale operations.
    fn install(&self, writer: &mut Writer, snapshot: Snapshot, meta: StoreMeta) -> Result<()> {
        if let Some(files) = writer.files.as_mut() {
            let epoch = files.epoch + 1;
            let image = BaseImageRef {
                epoch,
                meta: &meta,
                records: snapshot.records().collect(),
            };
            write_archive_atomic(
                &files.dir.join(BASE_IMAGE_FILE),
                ArtifactKind::IndexImage,
                BASE_IMAGE_SCHEMA_VERSION,
                &image,
            )?;
            files.epoch = epoch;
            files.journal.reset()?;
            files.journal.append(&JournalOp::Epoch(epoch))?;
        }

        *self.state.write() = Arc::new(snapshot);
        writer.meta = meta;
        Ok(())
    }
}

impl Drop for IndexStore {
    fn drop(&mut self) {
        // Leave no stray temp files from an interrupted atomic write.
        if let Some(files) = self.writer.get_mut().files.as_ref() {
            let Ok(entries) = std::fs::read_dir(&files.dir) else {
                return;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().contains(".tmp.") {
                    remove_best_effort(&entry.path());
                }
            }
        }
    }
}
