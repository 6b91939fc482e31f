use std::path::PathBuf;

use quarry_core::{Cancelled, IndexKind};
use quarry_fetch::FetchError;
use quarry_index::IndexError;

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] quarry_config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("no index named `{name}` is registered")]
    UnknownIndex { name: String },

    #[error("index `{name}` is already registered as {existing}, not {requested}")]
    KindMismatch {
        name: String,
        existing: IndexKind,
        requested: IndexKind,
    },

    #[error("invalid index name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("index `{name}` cannot be updated: {reason}")]
    NotUpdatable { name: String, reason: &'static str },

    #[error("failed to write index registry {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManagerError {
    pub(crate) fn unknown(name: &str) -> Self {
        ManagerError::UnknownIndex {
            name: name.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ManagerError::Index(err) => err.is_cancelled(),
            ManagerError::Fetch(FetchError::Cancelled(_)) | ManagerError::Cancelled(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::Fetch(err) if err.is_not_found())
    }
}
