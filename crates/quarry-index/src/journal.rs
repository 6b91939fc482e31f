//! Append-only log of store mutations made since the last base image.
//!
//! Frame layout (little-endian): `len: u32`, `hash: u64` (first 8 bytes of the
//! blake3 hash of the payload), `payload: [u8; len]` (bincode [`JournalOp`]).
//! Every append is followed by `sync_data`, so a mutation is durable once the
//! call returns. A crash can only leave a torn *last* frame; replay stops at
//! the first frame that is short or fails its hash, and the file is truncated
//! back to the last good frame.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use serde::{Deserialize, Serialize};

use quarry_core::{ArtifactKey, IndexRecord};
use quarry_storage::{bincode_options, content_hash};

use crate::error::Result;

const FRAME_HEADER_LEN: usize = 12;
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum JournalOp {
    Upsert(IndexRecord),
    Remove(ArtifactKey),
    /// First frame of every journal; must match the base image's epoch for
    /// the remaining frames to apply.
    Epoch(u64),
}


#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    frames: usize,
}

impl Journal {
    /// Opens (creating if needed) the journal at `path` and returns it along
    /// with every intact operation it contains, in append order.
    pub(crate) fn open(path: &Path) -> Result<(Self, Vec<JournalOp>)> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (ops, good_len) = decode_frames(&bytes);
        if good_len < bytes.len() {
            tracing::warn!(
                target = "quarry.index",
                path = %path.display(),
                dropped_bytes = bytes.len() - good_len,
                "ignoring torn journal tail"
            );
            file.set_len(good_len as u64)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::End(0))?;

        let frames = ops.len();
        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                frames,
            },
            ops,
        ))
    }

    pub(crate) fn append(&mut self, op: &JournalOp) -> Result<()> {
        self.append_all(std::slice::from_ref(op))
    }

    /// Appends `ops` and syncs once.
    pub(crate) fn append_all(&mut self, ops: &[JournalOp]) -> Result<()> {
        let mut buf = Vec::new();
        for op in ops {
            let payload = bincode_options(MAX_FRAME_LEN as u64).serialize(op)?;
            let len = u32::try_from(payload.len())
                .ok()
                .filter(|len| *len <= MAX_FRAME_LEN)
                .ok_or_else(|| io::Error::other("journal frame too large"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(&content_hash(&payload).to_le_bytes());
            buf.extend_from_slice(&payload);
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.frames += ops.len();
        Ok(())
    }

    pub(crate) fn frames(&self) -> usize {
        self.frames
    }

    /// Discards every frame. Called once their effects are in the base image.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_data()?;
        self.frames = 0;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Decodes frames until the first invalid one. Returns the operations and the
/// byte length of the valid prefix.
fn decode_frames(bytes: &[u8]) -> (Vec<JournalOp>, usize) {
    let mut ops = Vec::new();
    let mut offset = 0usize;

    while bytes.len() - offset >= FRAME_HEADER_LEN {
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[offset..offset + 4]);
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_FRAME_LEN {
            break;
        }
        let mut hash_bytes = [0u8; 8];
        hash_bytes.copy_from_slice(&bytes[offset + 4..offset + FRAME_HEADER_LEN]);
        let expected = u64::from_le_bytes(hash_bytes);

        let start = offset + FRAME_HEADER_LEN;
        let end = start + len as usize;
        if end > bytes.len() {
            break;
        }
        let payload = &bytes[start..end];
        if content_hash(payload) != expected {
            break;
        }
        let Ok(op) = bincode_options(MAX_FRAME_LEN as u64).deserialize::<JournalOp>(payload) else {
            break;
        };
        ops.push(op);
        offset = end;
    }

    (ops, offset)
}

pub(crate) fn remove_best_effort(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target = "quarry.index",
                path = %path.display(),
                error = %err,
                "failed to remove file (best effort)"
            );
        }
    }
}
