//! Checksummed, versioned single-file archives for Quarry's on-disk state.
//!
//! ## Format
//! Each persisted artifact is stored as:
//! - a fixed-size header (64 bytes, little-endian)
//! - a payload containing a `bincode`-encoded value
//!
//! The header embeds:
//! - magic bytes and header layout version
//! - artifact kind and schema version
//! - the Quarry version that wrote the file
//! - compression flag (whole-payload zstd, used from [`COMPRESSION_THRESHOLD`]
//!   encoded bytes up, or none)
//! - payload lengths and a `blake3` content hash of the uncompressed payload
//!
//! Writers always go through a temp file in the destination directory followed
//! by a rename, so readers observe either the previous file or the new one.
//! Any mismatch (kind, schema, version, length, hash) is reported as an error
//! and callers treat the artifact as absent and rebuild it.

mod header;
mod persisted;
mod write;

pub use header::{ArtifactKind, Compression, StorageHeader, HEADER_LEN};
pub use persisted::{
    bincode_options, content_hash, read_archive, read_archive_optional, StorageError,
    MAX_PAYLOAD_LEN_BYTES,
};
pub use write::{write_archive_atomic, COMPRESSION_THRESHOLD};
