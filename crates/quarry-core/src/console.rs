/// Human-readable sink for progress and failure messages.
///
/// The engine never reads anything back from the console; hosts typically route
/// it to an output panel. Implementations must not block.
pub trait Console: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards console messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn info(&self, message: &str) {
        tracing::info!(target = "quarry.console", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target = "quarry.console", "{message}");
    }
}
