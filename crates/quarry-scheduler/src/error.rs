use quarry_core::Cancelled;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a command that did not complete successfully.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("command cancelled")]
    Cancelled,

    #[error("command panicked")]
    Panicked,

    #[error("{0}")]
    Failed(#[source] BoxError),
}

impl TaskError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        TaskError::Failed(err.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}
