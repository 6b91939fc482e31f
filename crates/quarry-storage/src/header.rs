use byteorder::{ByteOrder, LittleEndian};

use crate::persisted::StorageError;

pub const HEADER_LEN: usize = 64;

const MAGIC: &[u8; 8] = b"QRYSTOR\0";
const HEADER_LAYOUT_VERSION: u16 = 1;
const VERSION_FIELD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArtifactKind {
    /// Base image of one index store (all records + store metadata).
    IndexImage = 1,
}

impl ArtifactKind {
    fn from_u16(value: u16) -> Result<Self, StorageError> {
        match value {
            1 => Ok(ArtifactKind::IndexImage),
            _ => Err(StorageError::InvalidHeader("unknown artifact kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Zstd = 1,
}

impl Compression {
    fn from_u8(value: u8) -> Result<Self, StorageError> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            other => Err(StorageError::UnsupportedCompression(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    pub kind: ArtifactKind,
    pub schema_version: u32,
    pub quarry_version: String,
    pub compression: Compression,
    pub payload_len: u64,
    pub uncompressed_len: u64,
    pub content_hash: u64,
}

impl StorageHeader {
    pub fn new(
        kind: ArtifactKind,
        schema_version: u32,
        compression: Compression,
        payload_len: u64,
        uncompressed_len: u64,
        content_hash: u64,
    ) -> Self {
        Self {
            kind,
            schema_version,
            quarry_version: quarry_core::QUARRY_VERSION.to_string(),
            compression,
            payload_len,
            uncompressed_len,
            content_hash,
        }
    }

    // Layout:
    //  0..8   magic
    //  8..10  header layout version
    // 10..12  artifact kind
    // 12..16  schema version
    // 16      compression
    // 17..24  reserved
    // 24..32  payload length (bytes on disk)
    // 32..40  uncompressed payload length
    // 40..48  content hash
    // 48..64  writer version, NUL padded
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(MAGIC);
        LittleEndian::write_u16(&mut buf[8..10], HEADER_LAYOUT_VERSION);
        LittleEndian::write_u16(&mut buf[10..12], self.kind as u16);
        LittleEndian::write_u32(&mut buf[12..16], self.schema_version);
        buf[16] = self.compression as u8;
        LittleEndian::write_u64(&mut buf[24..32], self.payload_len);
        LittleEndian::write_u64(&mut buf[32..40], self.uncompressed_len);
        LittleEndian::write_u64(&mut buf[40..48], self.content_hash);

        let version = self.quarry_version.as_bytes();
        let len = version.len().min(VERSION_FIELD_LEN);
        buf[48..48 + len].copy_from_slice(&version[..len]);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        if &bytes[0..8] != MAGIC {
            return Err(StorageError::InvalidHeader("bad magic"));
        }
        if LittleEndian::read_u16(&bytes[8..10]) != HEADER_LAYOUT_VERSION {
            return Err(StorageError::InvalidHeader("unsupported header layout"));
        }

        let kind = ArtifactKind::from_u16(LittleEndian::read_u16(&bytes[10..12]))?;
        let schema_version = LittleEndian::read_u32(&bytes[12..16]);
        let compression = Compression::from_u8(bytes[16])?;
        let payload_len = LittleEndian::read_u64(&bytes[24..32]);
        let uncompressed_len = LittleEndian::read_u64(&bytes[32..40]);
        let content_hash = LittleEndian::read_u64(&bytes[40..48]);

        let version_field = &bytes[48..48 + VERSION_FIELD_LEN];
        let end = version_field
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(VERSION_FIELD_LEN);
        let quarry_version = std::str::from_utf8(&version_field[..end])
            .map_err(|_| StorageError::InvalidHeader("writer version is not utf-8"))?
            .to_string();

        Ok(Self {
            kind,
            schema_version,
            quarry_version,
            compression,
            payload_len,
            uncompressed_len,
            content_hash,
        })
    }
}
