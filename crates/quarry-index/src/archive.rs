//! Transportable snapshot archives.
//!
//! An archive is a zstd-compressed tar stream with three entries, in order:
//! - `index.json`: [`ArchiveManifest`]
//! - `checksums.json`: sha256 of each other entry, keyed by entry name
//! - `records.bin`: bincode-encoded record list
//!
//! Readers verify every checksum before handing records out; any parse or
//! checksum failure is a [`IndexError::MalformedArchive`].

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use bincode::Options;
use serde::{Deserialize, Serialize};
use quarry_storage::bincode_options;
use sha2::{Digest, Sha256};

use quarry_core::IndexRecord;

use crate::error::{IndexError, Result};

pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

const MANIFEST_ENTRY: &str = "index.json";
const CHECKSUMS_ENTRY: &str = "checksums.json";
const RECORDS_ENTRY: &str = "records.bin";

const MAX_ENTRY_BYTES: u64 = 1024 * 1024 * 1024;
/// Entry sizes come from the archive's own headers; buffers grow past this
/// only as data actually arrives.
const INITIAL_ENTRY_CAPACITY: u64 = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    /// Millis since the epoch; becomes the importing index's update time.
    pub created_at: u64,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    /// Highest incremental chunk number the archive covers, when it belongs to
    /// a publication chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<u32>,
}

impl ArchiveManifest {
    pub fn new(created_at: u64) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            created_at,
            record_count: 0,
            chain_id: None,
            incremental: None,
        }
    }

    /// Places the archive on a publication chain: a full snapshot covering
    /// every chunk up to `incremental`, or the chunk numbered `incremental`.
    #[must_use]
    pub fn with_chain(mut self, chain_id: impl Into<String>, incremental: u32) -> Self {
        self.chain_id = Some(chain_id.into());
        self.incremental = Some(incremental);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedArchive {
    pub manifest: ArchiveManifest,
    pub records: Vec<IndexRecord>,
}

/// Writes `records` as an archive described by `manifest` (its
/// `record_count` is filled in here).
pub fn write_archive<'a, W, I>(out: W, manifest: &ArchiveManifest, records: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a IndexRecord>,
{
    let records: Vec<&IndexRecord> = records.into_iter().collect();
    let mut manifest = manifest.clone();
    manifest.record_count = records.len() as u64;

    let records_bytes = bincode_options(MAX_ENTRY_BYTES).serialize(&records)?;
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| IndexError::malformed(err.to_string()))?;

    let mut checksums = BTreeMap::new();
    checksums.insert(MANIFEST_ENTRY.to_string(), sha256_hex(&manifest_bytes));
    checksums.insert(RECORDS_ENTRY.to_string(), sha256_hex(&records_bytes));
    let checksums_bytes = serde_json::to_vec_pretty(&checksums)
        .map_err(|err| IndexError::malformed(err.to_string()))?;

    let encoder = zstd::Encoder::new(out, 3)?;
    let mut builder = tar::Builder::new(encoder);
    for (name, bytes) in [
        (MANIFEST_ENTRY, &manifest_bytes),
        (CHECKSUMS_ENTRY, &checksums_bytes),
        (RECORDS_ENTRY, &records_bytes),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(manifest.created_at / 1000);
        header.set_cksum();
        builder.append_data(&mut header, name, Cursor::new(bytes))?;
    }

    let encoder = builder.into_inner()?;
    let mut out = encoder.finish()?;
    out.flush()?;
    Ok(())
}

/// Decodes and verifies an archive.
pub fn read_archive<R: Read>(input: R) -> Result<DecodedArchive> {
    let decoder = zstd::Decoder::new(input).map_err(IndexError::from_archive_io)?;
    let mut archive = tar::Archive::new(decoder);

    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for entry in archive.entries().map_err(IndexError::from_archive_io)? {
        let entry = entry.map_err(IndexError::from_archive_io)?;
        if !entry.header().entry_type().is_file() {
            return Err(IndexError::malformed("unexpected non-file entry"));
        }
        let name = entry
            .path()
            .map_err(IndexError::from_archive_io)?
            .to_string_lossy()
            .into_owned();
        if !matches!(
            name.as_str(),
            MANIFEST_ENTRY | CHECKSUMS_ENTRY | RECORDS_ENTRY
        ) {
            return Err(IndexError::malformed(format!("unexpected entry {name}")));
        }
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(IndexError::malformed(format!("entry {name} is too large")));
        }

        let mut bytes = Vec::with_capacity(entry.size().min(INITIAL_ENTRY_CAPACITY) as usize);
        entry
            .take(MAX_ENTRY_BYTES)
            .read_to_end(&mut bytes)
            .map_err(IndexError::from_archive_io)?;
        entries.insert(name, bytes);
    }

    let checksums_bytes = take_entry(&mut entries, CHECKSUMS_ENTRY)?;
    let checksums: BTreeMap<String, String> = serde_json::from_slice(&checksums_bytes)
        .map_err(|err| IndexError::malformed(format!("{CHECKSUMS_ENTRY}: {err}")))?;

    let manifest_bytes = take_entry(&mut entries, MANIFEST_ENTRY)?;
    verify_checksum(&checksums, MANIFEST_ENTRY, &manifest_bytes)?;
    let records_bytes = take_entry(&mut entries, RECORDS_ENTRY)?;
    verify_checksum(&checksums, RECORDS_ENTRY, &records_bytes)?;

    let manifest: ArchiveManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|err| IndexError::malformed(format!("{MANIFEST_ENTRY}: {err}")))?;
    if manifest.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(IndexError::malformed(format!(
            "unsupported archive format version {}",
            manifest.format_version
        )));
    }

    let records: Vec<IndexRecord> = bincode_options(MAX_ENTRY_BYTES)
        .deserialize(&records_bytes)
        .map_err(|err| IndexError::malformed(format!("{RECORDS_ENTRY}: {err}")))?;
    if records.len() as u64 != manifest.record_count {
        return Err(IndexError::malformed(format!(
            "record count mismatch: manifest says {}, found {}",
            manifest.record_count,
            records.len()
        )));
    }

    Ok(DecodedArchive { manifest, records })
}

fn take_entry(entries: &mut BTreeMap<String, Vec<u8>>, name: &'static str) -> Result<Vec<u8>> {
    entries
        .remove(name)
        .ok_or_else(|| IndexError::malformed(format!("archive is missing {name}")))
}

fn verify_checksum(checksums: &BTreeMap<String, String>, name: &str, bytes: &[u8]) -> Result<()> {
    let expected = checksums
        .get(name)
        .ok_or_else(|| IndexError::malformed(format!("missing checksum for {name}")))?;
    let found = sha256_hex(bytes);
    if &found != expected {
        return Err(IndexError::malformed(format!(
            "checksum mismatch for {name}: expected {expected}, found {found}"
        )));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
