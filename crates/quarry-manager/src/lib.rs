//! Index registry, query federation and update execution.
//!
//! [`IndexManager`] is the facade: it owns an [`IndexRegistry`] (name to
//! store mapping, persisted in `indexes.properties`), a [`CompositeIndex`]
//! running searches across every registered store, and an update scheduler
//! whose commands are executed by [`UpdateExecutor`].
//!
//! ```no_run
//! # fn main() -> quarry_manager::Result<()> {
//! use quarry_manager::{IndexManager, SearchType};
//!
//! let (config, _) = quarry_config::load()?;
//! let manager = IndexManager::open(&config)?;
//! for (key, artifact) in manager.search(SearchType::ByClassName, "Widget") {
//!     println!("{key}: {} files", artifact.files.len());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod events;
mod executor;
mod manager;
mod registry;
mod registry_file;
mod search;

pub use error::{ManagerError, Result};
pub use events::{IndexEvent, IndexEventListener};
pub use executor::{FetchSettings, UpdateExecutor};
pub use manager::{IndexManager, LOCAL_INDEX, WORKSPACE_INDEX};
pub use registry::IndexRegistry;
pub use registry_file::REGISTRY_FILE;
pub use search::{CompositeIndex, SearchPlan, SearchType, MIN_CLASS_NAME_TERM_LEN};
