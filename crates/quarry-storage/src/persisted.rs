use std::path::Path;

use bincode::Options;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::header::{ArtifactKind, Compression, StorageHeader, HEADER_LEN};

/// Upper bound on any payload we are willing to decode.
///
/// A corrupted length field must degrade to a rebuild, not an out-of-memory abort.
pub const MAX_PAYLOAD_LEN_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("incompatible artifact kind: expected {expected:?}, found {found:?}")]
    WrongArtifact {
        expected: ArtifactKind,
        found: ArtifactKind,
    },
    #[error("incompatible schema version: expected {expected}, found {found}")]
    WrongSchema { expected: u32, found: u32 },
    #[error("incompatible quarry version: expected {expected}, found {found}")]
    WrongVersion { expected: String, found: String },
    #[error("truncated file: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("unsupported compression tag {0}")]
    UnsupportedCompression(u8),
    #[error("payload size {payload_len} exceeds the storage limit")]
    OversizedPayload { payload_len: u64 },
    #[error("payload hash mismatch: expected {expected}, found {found}")]
    HashMismatch { expected: u64, found: u64 },
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

/// Reads and validates an archive, returning `Ok(None)` when the file does not exist.
pub fn read_archive_optional<T>(
    path: &Path,
    expected_kind: ArtifactKind,
    expected_schema: u32,
) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
{
    match read_archive(path, expected_kind, expected_schema) {
        Ok(value) => Ok(Some(value)),
        Err(StorageError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn read_archive<T>(
    path: &Path,
    expected_kind: ArtifactKind,
    expected_schema: u32,
) -> Result<T, StorageError>
where
    T: DeserializeOwned,
{
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_PAYLOAD_LEN_BYTES.saturating_add(HEADER_LEN as u64) {
        return Err(StorageError::OversizedPayload {
            payload_len: meta.len(),
        });
    }

    let bytes = std::fs::read(path)?;
    if bytes.len() < HEADER_LEN {
        return Err(StorageError::Truncated {
            expected: HEADER_LEN,
            found: bytes.len(),
        });
    }

    let header = StorageHeader::decode(&bytes[..HEADER_LEN])?;
    validate_header(&header, expected_kind, expected_schema)?;

    let payload_len = usize::try_from(header.payload_len).map_err(|_| {
        StorageError::OversizedPayload {
            payload_len: header.payload_len,
        }
    })?;
    let end = HEADER_LEN
        .checked_add(payload_len)
        .ok_or(StorageError::InvalidHeader("payload length overflow"))?;
    if bytes.len() < end {
        return Err(StorageError::Truncated {
            expected: end,
            found: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_LEN..end];
    let decompressed;
    let uncompressed = match header.compression {
        Compression::None => payload,
        Compression::Zstd => {
            decompressed = decompress(payload, header.uncompressed_len)?;
            decompressed.as_slice()
        }
    };

    if uncompressed.len() as u64 != header.uncompressed_len {
        return Err(StorageError::InvalidHeader("uncompressed length mismatch"));
    }
    verify_payload_hash(&header, uncompressed)?;

    Ok(bincode_options(MAX_PAYLOAD_LEN_BYTES).deserialize(uncompressed)?)
}

/// The bincode configuration every Quarry file format uses: fixed-width
/// little-endian integers, refusing to decode more than `limit` bytes.
pub fn bincode_options(limit: u64) -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(limit)
}

fn validate_header(
    header: &StorageHeader,
    expected_kind: ArtifactKind,
    expected_schema: u32,
) -> Result<(), StorageError> {
    if header.kind != expected_kind {
        return Err(StorageError::WrongArtifact {
            expected: expected_kind,
            found: header.kind,
        });
    }

    if header.schema_version != expected_schema {
        return Err(StorageError::WrongSchema {
            expected: expected_schema,
            found: header.schema_version,
        });
    }

    if header.quarry_version != quarry_core::QUARRY_VERSION {
        return Err(StorageError::WrongVersion {
            expected: quarry_core::QUARRY_VERSION.to_string(),
            found: header.quarry_version.clone(),
        });
    }

    if header.uncompressed_len > MAX_PAYLOAD_LEN_BYTES {
        return Err(StorageError::OversizedPayload {
            payload_len: header.uncompressed_len,
        });
    }

    Ok(())
}

fn decompress(payload: &[u8], uncompressed_len: u64) -> Result<Vec<u8>, StorageError> {
    let len: usize = uncompressed_len
        .try_into()
        .map_err(|_| StorageError::OversizedPayload {
            payload_len: uncompressed_len,
        })?;
    zstd::bulk::decompress(payload, len).map_err(|e| StorageError::Decompression(e.to_string()))
}

fn verify_payload_hash(header: &StorageHeader, payload: &[u8]) -> Result<(), StorageError> {
    let found = content_hash(payload);
    if found != header.content_hash {
        return Err(StorageError::HashMismatch {
            expected: header.content_hash,
            found,
        });
    }
    Ok(())
}

/// First eight bytes of the payload's blake3 hash.
pub fn content_hash(payload: &[u8]) -> u64 {
    let hash = blake3::hash(payload);
    let mut first = [0u8; 8];
    first.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(first)
}
