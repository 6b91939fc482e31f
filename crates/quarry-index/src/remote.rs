//! Publication layout of a remote index.
//!
//! Relative to a remote's update URL:
//! - `quarry-index.properties`: [`RemoteDescriptor`]
//! - `quarry-index.tar.zst`: full snapshot archive
//! - `quarry-index.<n>.tar.zst`: incremental chunk `n`
//!
//! Chunks on one chain are numbered consecutively; a consumer that has applied
//! chunk `k` of the same chain catches up by merging `k+1..=last`. Anything
//! else (different chain, missing chunk, never populated) falls back to the
//! full snapshot.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use quarry_core::IndexRecord;
use quarry_properties::Properties;

use crate::archive::{write_archive, ArchiveManifest};
use crate::error::{IndexError, Result};
use crate::snapshot::StoreMeta;
use crate::store::IndexStore;

pub const DESCRIPTOR_PATH: &str = "quarry-index.properties";
pub const SNAPSHOT_PATH: &str = "quarry-index.tar.zst";

const KEY_TIMESTAMP: &str = "index.timestamp";
const KEY_CHAIN_ID: &str = "index.chain-id";
const KEY_LAST_INCREMENTAL: &str = "index.last-incremental";
const KEY_INCREMENTAL_PREFIX: &str = "index.incremental-";

pub fn chunk_path(number: u32) -> String {
    format!("quarry-index.{number}.tar.zst")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteDescriptor {
    /// Millis since the epoch of the newest publication.
    pub timestamp: u64,
    pub chain_id: String,
    /// Number of the newest chunk (0 when only a full snapshot exists).
    pub last_incremental: u32,
    /// Chunk numbers still available for download, ascending.
    pub incrementals: Vec<u32>,
}

impl RemoteDescriptor {
    pub fn parse(text: &str) -> Result<Self> {
        let props = Properties::parse(text);
        let required = |key: &'static str| {
            props
                .get(key)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| IndexError::malformed(format!("descriptor is missing {key}")))
        };

        let timestamp = required(KEY_TIMESTAMP)?
            .parse::<u64>()
            .map_err(|_| IndexError::malformed(format!("invalid {KEY_TIMESTAMP}")))?;
        let chain_id = required(KEY_CHAIN_ID)?.to_string();
        let last_incremental = match props.get(KEY_LAST_INCREMENTAL).map(str::trim) {
            None | Some("") => 0,
            Some(value) => value
                .parse::<u32>()
                .map_err(|_| IndexError::malformed(format!("invalid {KEY_LAST_INCREMENTAL}")))?,
        };

        let mut incrementals = Vec::new();
        for (key, value) in props.with_prefix(KEY_INCREMENTAL_PREFIX) {
            let number = value
                .trim()
                .parse::<u32>()
                .map_err(|_| IndexError::malformed(format!("invalid {key}")))?;
            incrementals.push(number);
        }
        incrementals.sort_unstable();
        incrementals.dedup();

        Ok(Self {
            timestamp,
            chain_id,
            last_incremental,
            incrementals,
        })
    }

    pub fn render(&self) -> String {
        let mut props = Properties::new();
        props.set(KEY_TIMESTAMP, self.timestamp.to_string());
        props.set(KEY_CHAIN_ID, self.chain_id.clone());
        props.set(KEY_LAST_INCREMENTAL, self.last_incremental.to_string());
        for (slot, number) in self.incrementals.iter().enumerate() {
            props.set(format!("{KEY_INCREMENTAL_PREFIX}{slot}"), number.to_string());
        }
        props.render(Some("Quarry index publication"))
    }

    /// Decides how a store described by `meta` catches up with this
    /// publication.
    pub fn plan_for(&self, meta: &StoreMeta) -> UpdatePlan {
        let (Some(chain_id), Some(applied)) = (meta.chain_id.as_deref(), meta.last_incremental)
        else {
            return UpdatePlan::Full;
        };
        if chain_id != self.chain_id || applied > self.last_incremental {
            return UpdatePlan::Full;
        }
        if applied == self.last_incremental {
            return UpdatePlan::UpToDate;
        }

        let needed: Vec<u32> = (applied + 1..=self.last_incremental).collect();
        if needed
            .iter()
            .all(|number| self.incrementals.binary_search(number).is_ok())
        {
            UpdatePlan::Incremental(needed)
        } else {
            UpdatePlan::Full
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdatePlan {
    UpToDate,
    /// Merge these chunks, in order.
    Incremental(Vec<u32>),
    Full,
}

/// Writes the publication layout into a directory, for hosts that mirror an
/// index and for tests.
#[derive(Debug, Clone)]
pub struct Publisher {
    dir: PathBuf,
    /// How many chunks stay listed in the descriptor.
    retain_chunks: usize,
}

impl Publisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retain_chunks: 30,
        }
    }

    #[must_use]
    pub fn retain_chunks(mut self, count: usize) -> Self {
        self.retain_chunks = count;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn descriptor(&self) -> Result<Option<RemoteDescriptor>> {
        match fs::read_to_string(self.dir.join(DESCRIPTOR_PATH)) {
            Ok(text) => RemoteDescriptor::parse(&text).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Starts a new chain with a full snapshot of `store`.
    pub fn publish_full(
        &self,
        store: &IndexStore,
        chain_id: &str,
        created_at: u64,
    ) -> Result<RemoteDescriptor> {
        let manifest = ArchiveManifest::new(created_at).with_chain(chain_id, 0);
        self.write_file(SNAPSHOT_PATH, |out| store.snapshot_with(out, &manifest))?;

        let descriptor = RemoteDescriptor {
            timestamp: created_at,
            chain_id: chain_id.to_string(),
            last_incremental: 0,
            incrementals: Vec::new(),
        };
        self.write_descriptor(&descriptor)?;
        Ok(descriptor)
    }

    /// Appends chunk `last + 1` containing `delta`, and refreshes the full
    /// snapshot from `store` (which must already contain `delta`).
    pub fn publish_incremental(
        &self,
        store: &IndexStore,
        delta: &[IndexRecord],
        created_at: u64,
    ) -> Result<RemoteDescriptor> {
        let mut descriptor = self
            .descriptor()?
            .ok_or_else(|| IndexError::malformed("no full snapshot has been published"))?;
        let number = descriptor.last_incremental + 1;

        let chunk_manifest =
            ArchiveManifest::new(created_at).with_chain(descriptor.chain_id.clone(), number);
        self.write_file(&chunk_path(number), |out| {
            write_archive(out, &chunk_manifest, delta)
        })?;

        let full_manifest =
            ArchiveManifest::new(created_at).with_chain(descriptor.chain_id.clone(), number);
        self.write_file(SNAPSHOT_PATH, |out| store.snapshot_with(out, &full_manifest))?;

        descriptor.timestamp = created_at;
        descriptor.last_incremental = number;
        descriptor.incrementals.push(number);
        let excess = descriptor
            .incrementals
            .len()
            .saturating_sub(self.retain_chunks);
        for dropped in descriptor.incrementals.drain(..excess) {
            let path = self.dir.join(chunk_path(dropped));
            if let Err(err) = fs::remove_file(&path) {
                tracing::debug!(
                    target = "quarry.index",
                    path = %path.display(),
                    error = %err,
                    "failed to remove expired chunk (best effort)"
                );
            }
        }

        self.write_descriptor(&descriptor)?;
        Ok(descriptor)
    }

    fn write_descriptor(&self, descriptor: &RemoteDescriptor) -> Result<()> {
        let text = descriptor.render();
        self.write_file(DESCRIPTOR_PATH, |out| Ok(out.write_all(text.as_bytes())?))
    }

    /// Writes `name` through a temp file and rename so mirrors never serve a
    /// half-written file.
    fn write_file<F>(&self, name: &str, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<fs::File>) -> Result<()>,
    {
        fs::create_dir_all(&self.dir)?;
        let dest = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp.{}", std::process::id()));

        let result = (|| -> Result<()> {
            let mut out = BufWriter::new(fs::File::create(&tmp)?);
            write(&mut out)?;
            let file = out
                .into_inner()
                .map_err(|err| IndexError::Io(err.into_error()))?;
            file.sync_all()?;
            fs::rename(&tmp, &dest)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}
