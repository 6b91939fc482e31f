use quarry_core::Cancelled;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Errors never include credentials: every URL is passed through
/// [`crate::sanitize_url`] before it lands in a message.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("unsupported endpoint {url}")]
    Unsupported { url: String },

    #[error("fetcher is not connected")]
    Disconnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl FetchError {
    /// Maps a read failure from a [`crate::FetchStream`] back to the fetch
    /// taxonomy.
    pub fn from_read(err: std::io::Error) -> Self {
        if quarry_core::io_error_is_cancelled(&err) {
            FetchError::Cancelled(Cancelled)
        } else {
            FetchError::Transport {
                message: err.to_string(),
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}
