use std::path::PathBuf;
use std::sync::Arc;

use quarry_core::IndexInfo;

/// Change notifications published by the [`crate::IndexRegistry`].
///
/// Listeners run synchronously on the thread that performed the mutation,
/// after the registry's locks are released. They must not block; queue work
/// elsewhere instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexEvent {
    Registered(IndexInfo),
    Unregistered(IndexInfo),
    /// `last_update_time` / `is_fresh` changed after a completed update.
    Updated(IndexInfo),
    /// Every local and remote context was torn down and re-created, against
    /// `local_repository` when it changed.
    Invalidated { local_repository: Option<PathBuf> },
}

pub type IndexEventListener = Arc<dyn Fn(&IndexEvent) + Send + Sync>;
