use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Receives free-form progress messages from long-running operations.
///
/// Implementations must never block the caller; the scheduler's implementation
/// publishes onto a bounded broadcast channel and drops updates nobody reads.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _message: &str) {}
}

/// Rate-limits another sink so at most one message per `interval` gets through.
///
/// Repository scans touch hundreds of thousands of files; forwarding every path
/// would flood whatever renders progress.
pub struct ThrottledProgress<'a> {
    inner: &'a dyn ProgressSink,
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a dyn ProgressSink, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn per_second(inner: &'a dyn ProgressSink) -> Self {
        Self::new(inner, Duration::from_secs(1))
    }
}

impl ProgressSink for ThrottledProgress<'_> {
    fn report(&self, message: &str) {
        let now = Instant::now();
        {
            let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match *last {
                Some(previous) if now.duration_since(previous) < self.interval => return,
                _ => *last = Some(now),
            }
        }
        self.inner.report(message);
    }
}
