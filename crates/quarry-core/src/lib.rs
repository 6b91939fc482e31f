//! Shared vocabulary for the Quarry artifact index engine.
//!
//! Every other crate in the workspace speaks in terms of the types defined here:
//! - [`IndexInfo`] / [`IndexKind`]: identity and configuration of one index context
//! - [`IndexRecord`] / [`ArtifactKey`]: the atomic unit stored in an index
//! - [`IndexedArtifact`]: the query-time aggregate handed to consumers
//! - [`UpdateCommand`]: queued unit of background maintenance work
//!
//! It also hosts the small cross-cutting pieces (cancellation, console sink,
//! progress sink, clock) that lower layers need without depending on the
//! scheduler or the manager.

mod cancel;
mod console;
mod model;
mod progress;
mod time;

pub use cancel::{io_error_is_cancelled, CancellationExt, CancellationToken, Cancelled};
pub use console::{Console, TracingConsole};
pub use model::{
    ArtifactKey, Availability, IndexInfo, IndexKind, IndexRecord, IndexedArtifact, UpdateCommand,
    PLUGIN_PACKAGING,
};
pub use progress::{NoProgress, ProgressSink, ThrottledProgress};
pub use time::now_millis;

/// Version string embedded into persisted artifacts.
pub const QUARRY_VERSION: &str = env!("CARGO_PKG_VERSION");
