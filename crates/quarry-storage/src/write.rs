use std::borrow::Cow;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::Options;
use serde::Serialize;

use crate::header::{ArtifactKind, Compression, StorageHeader, HEADER_LEN};
use crate::persisted::{bincode_options, content_hash, StorageError, MAX_PAYLOAD_LEN_BYTES};

/// Encoded payloads at least this large are zstd compressed. Store images
/// below it are rewritten often (every compaction) and compress poorly.
pub const COMPRESSION_THRESHOLD: usize = 64 * 1024;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Encodes `value` and atomically replaces `path` with it.
///
/// The file is written and synced under a unique temp name in the same
/// directory, then renamed over `path`, so readers see either the old or the
/// new contents.
pub fn write_archive_atomic<T>(
    path: &Path,
    kind: ArtifactKind,
    schema_version: u32,
    value: &T,
) -> Result<(), StorageError>
where
    T: Serialize,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => return Err(StorageError::InvalidHeader("destination has no parent directory")),
    };
    fs::create_dir_all(dir)?;

    let bytes = encode(kind, schema_version, value)?;
    let (temp, mut file) = create_temp_sibling(path, dir)?;
    let written = file.write_all(&bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written.and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }

    sync_dir_best_effort(dir);
    Ok(())
}

/// Header plus payload, ready to be written.
fn encode<T: Serialize>(kind: ArtifactKind, schema_version: u32, value: &T) -> Result<Vec<u8>, StorageError> {
    let encoded = bincode_options(MAX_PAYLOAD_LEN_BYTES).serialize(value)?;
    let (compression, payload) = if encoded.len() >= COMPRESSION_THRESHOLD {
        let compressed = zstd::bulk::compress(&encoded, 0)
            .map_err(|err| StorageError::Encoding(err.to_string()))?;
        (Compression::Zstd, Cow::Owned(compressed))
    } else {
        (Compression::None, Cow::Borrowed(encoded.as_slice()))
    };

    let header = StorageHeader::new(
        kind,
        schema_version,
        compression,
        payload.len() as u64,
        encoded.len() as u64,
        content_hash(&encoded),
    );
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&header.encode());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    if let Err(err) = fs::File::open(dir).and_then(|dir| dir.sync_all()) {
        tracing::debug!(
            target = "quarry.storage",
            dir = %dir.display(),
            error = %err,
            "failed to sync directory (best effort)"
        );
    }

    #[cfg(not(unix))]
    let _ = dir;
}

/// Creates `<file name>.tmp.<pid>.<n>` next to `dest`, picking the first `n`
/// nobody else has claimed.
fn create_temp_sibling(dest: &Path, dir: &Path) -> io::Result<(PathBuf, fs::File)> {
    let Some(base) = dest.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", dest.display()),
        ));
    };

    loop {
        let mut name = base.to_os_string();
        name.push(format!(
            ".tmp.{}.{}",
            std::process::id(),
            TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        let candidate = dir.join(name);
        match fs::File::options().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
}
