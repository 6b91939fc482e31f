use std::fmt;
use std::io::{self, Read};

use quarry_core::{CancellationToken, Cancelled};

/// A lazily-read remote resource.
///
/// The cancellation token is checked before every chunk is handed to the
/// caller. Once it fires the underlying reader (and with it the connection)
/// is dropped and every further read fails with an `io::Error` wrapping
/// [`Cancelled`].
pub struct FetchStream {
    inner: Option<Box<dyn Read + Send>>,
    cancel: CancellationToken,
    resource: String,
    bytes_read: u64,
    cancelled: bool,
}

impl FetchStream {
    pub(crate) fn new(
        inner: Box<dyn Read + Send>,
        cancel: CancellationToken,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            inner: Some(inner),
            cancel,
            resource: resource.into(),
            bytes_read: 0,
            cancelled: false,
        }
    }

    /// Sanitized description of the resource being read.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn tear_down(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(
                target = "quarry.fetch",
                resource = %self.resource,
                bytes_read = self.bytes_read,
                "fetch cancelled; closing stream"
            );
        }
        self.cancelled = true;
    }
}

impl Read for FetchStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancelled || self.cancel.is_cancelled() {
            self.tear_down();
            return Err(Cancelled.into_io_error());
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let n = inner.read(buf)?;
        if n == 0 {
            // Release the connection as soon as the body is exhausted.
            self.inner = None;
        }
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl fmt::Debug for FetchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchStream")
            .field("resource", &self.resource)
            .field("bytes_read", &self.bytes_read)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
