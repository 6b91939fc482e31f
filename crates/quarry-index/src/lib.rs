//! The Index Store: durable, queryable storage for one index context.
//!
//! ## Layout on disk
//! A store directory contains:
//! - `records.idx`: base image (`quarry-storage` archive of every record plus
//!   [`StoreMeta`])
//! - `journal.log`: mutations since the base image, synced per write
//! - `.lock`: held exclusively by the owning [`IndexStore`]
//!
//! In memory the store is an inverted index (one term dictionary per
//! [`Field`]) behind an `Arc` that readers clone, so queries never observe a
//! half-applied replace.
//!
//! The crate also owns the transport-independent pieces of index exchange:
//! snapshot archives ([`archive`]) and the remote publication layout
//! ([`remote`]).

pub mod archive;
mod error;
mod journal;
mod lock;
mod query;
pub mod remote;
mod scan;
mod snapshot;
mod store;

pub use archive::{ArchiveManifest, DecodedArchive, ARCHIVE_FORMAT_VERSION};
pub use error::{IndexError, Result};
pub use query::{package_name, simple_name, Field, Glob, QueryExpr};
pub use remote::{Publisher, RemoteDescriptor, UpdatePlan};
pub use scan::{parse_layout_path, record_for_file, scan_repository, sha1_for_file, LayoutPath, ScanContext};
pub use snapshot::StoreMeta;
pub use store::{IndexStore, BASE_IMAGE_FILE, JOURNAL_FILE, LOCK_FILE};
