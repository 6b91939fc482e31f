//! Background maintenance machinery for the index engine.
//!
//! [`UpdateScheduler`] is a single-worker, strictly serial command processor:
//! commands are appended to a FIFO queue, the idle-to-running transition is
//! debounced, and the queue is drained one command at a time on a dedicated
//! background thread. Cancelling the in-flight command clears the whole queue.
//!
//! Progress of the active command is broadcast as [`ProgressEvent`]s; slow
//! subscribers lose events rather than stalling the worker.

mod error;
mod progress;
mod worker;

pub use error::TaskError;
pub use progress::{Progress, ProgressEvent, ProgressId, ProgressReceiver, ProgressSender};
pub use quarry_core::{CancellationToken, Cancelled};
pub use worker::{CommandContext, CommandHandler, SchedulerConfig, UpdateScheduler};
