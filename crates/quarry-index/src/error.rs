use std::path::PathBuf;

use quarry_core::{io_error_is_cancelled, Cancelled};

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] quarry_storage::StorageError),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("index store at {path} is locked by another owner")]
    Locked { path: PathBuf },

    #[error("failed to read artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    #[error("malformed archive: {reason}")]
    MalformedArchive { reason: String },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: &'static str },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl IndexError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        IndexError::MalformedArchive {
            reason: reason.into(),
        }
    }

    /// Classifies an I/O failure raised while decoding an archive stream.
    ///
    /// Transports surface cancellation as an `io::Error` wrapping
    /// [`Cancelled`]. Everything else that is not a plain OS failure is
    /// treated as a malformed archive.
    pub(crate) fn from_archive_io(err: std::io::Error) -> Self {
        if io_error_is_cancelled(&err) {
            return IndexError::Cancelled(Cancelled);
        }
        match err.kind() {
            std::io::ErrorKind::InvalidData
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::Other => IndexError::malformed(err.to_string()),
            _ => IndexError::Io(err),
        }
    }

    pub(crate) fn artifact(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        IndexError::Artifact {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Cancelled(_))
    }
}
