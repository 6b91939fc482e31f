pub use tokio_util::sync::CancellationToken;

/// Returned by cooperative checkpoints once a [`CancellationToken`] has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

pub trait CancellationExt {
    /// Returns `Err(Cancelled)` when the token has been cancelled.
    fn check(&self) -> Result<(), Cancelled>;
}

impl CancellationExt for CancellationToken {
    fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Cancelled {
    /// Wraps the marker in an `io::Error` so it can cross `Read` boundaries.
    pub fn into_io_error(self) -> std::io::Error {
        std::io::Error::other(self)
    }
}

/// Returns `true` when `err` (or anything it wraps) is a [`Cancelled`] marker.
///
/// Decoders layered over a cancelled stream may wrap its error again, so the
/// whole source chain is inspected.
pub fn io_error_is_cancelled(err: &std::io::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = err.get_ref().map(|e| e as _);
    while let Some(inner) = current {
        if inner.is::<Cancelled>() {
            return true;
        }
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            current = io.get_ref().map(|e| e as _);
            continue;
        }
        current = inner.source();
    }
    false
}
