use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use quarry_core::{CancellationExt, CancellationToken, Cancelled, Console, TracingConsole};
use rayon::ThreadPool;
use tokio::runtime::{Handle, Runtime};

use crate::{Progress, ProgressReceiver, ProgressSender, TaskError};

/// Executes one queued command on the background worker.
///
/// Handlers run strictly one at a time. They should check
/// [`CommandContext::check`] between discrete units of work and return
/// [`TaskError::Cancelled`] once it fails.
pub trait CommandHandler<C>: Send + Sync {
    fn execute(&self, command: &C, ctx: &CommandContext) -> Result<(), TaskError>;
}

impl<C, F> CommandHandler<C> for F
where
    F: Fn(&C, &CommandContext) -> Result<(), TaskError> + Send + Sync,
{
    fn execute(&self, command: &C, ctx: &CommandContext) -> Result<(), TaskError> {
        self(command, ctx)
    }
}

/// Everything the active command gets from the worker.
pub struct CommandContext {
    token: CancellationToken,
    progress: Progress,
    console: Arc<dyn Console>,
}

impl CommandContext {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        self.token.check()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub progress_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            progress_channel_capacity: 256,
        }
    }
}

enum WorkerPool {
    Rayon(ThreadPool),
    Inline,
}

impl WorkerPool {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            WorkerPool::Rayon(pool) => pool.spawn(job),
            WorkerPool::Inline => job(),
        }
    }
}

fn build_worker_pool() -> WorkerPool {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .thread_name(|_| "quarry-update".to_string())
        .build()
    {
        Ok(pool) => WorkerPool::Rayon(pool),
        Err(err) => {
            // Commands then run on the timer thread, which stays correct but
            // delays other debounce timers while a command runs.
            tracing::warn!(
                target = "quarry.scheduler",
                error = %err,
                "failed to start update worker thread; running commands inline"
            );
            WorkerPool::Inline
        }
    }
}

fn build_timer_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .thread_name("quarry-timer")
        .build()
}

struct QueueState<C> {
    pending: VecDeque<C>,
    running: Option<String>,
    draining: bool,
    /// Token handed to commands; replaced after every `cancel`.
    generation: CancellationToken,
    timer: Option<(u64, CancellationToken)>,
    next_timer_id: u64,
}

impl<C> QueueState<C> {
    fn is_idle(&self) -> bool {
        !self.draining && self.pending.is_empty()
    }
}

struct Shared<C> {
    state: Mutex<QueueState<C>>,
    idle: Condvar,
    handler: Arc<dyn CommandHandler<C>>,
    console: Arc<dyn Console>,
    progress: ProgressSender,
    worker: WorkerPool,
    timers: Handle,
}

struct Inner<C> {
    shared: Arc<Shared<C>>,
    runtime: Option<Runtime>,
}

/// Single-worker FIFO command processor with a debounced start.
///
/// States: idle (nothing pending or only a timer armed), running (the worker
/// is draining the queue). `enqueue` while running appends to the queue being
/// drained; the timer only governs the idle-to-running transition.
pub struct UpdateScheduler<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for UpdateScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> UpdateScheduler<C>
where
    C: fmt::Display + Send + 'static,
{
    pub fn new(
        config: SchedulerConfig,
        handler: Arc<dyn CommandHandler<C>>,
    ) -> std::io::Result<Self> {
        let runtime = build_timer_runtime()?;
        let timers = runtime.handle().clone();
        Ok(Self::build(config, handler, timers, Some(runtime)))
    }

    /// Builds a scheduler whose debounce timers run on an existing Tokio
    /// runtime instead of a private one.
    pub fn new_with_timer_handle(
        config: SchedulerConfig,
        handler: Arc<dyn CommandHandler<C>>,
        timers: Handle,
    ) -> Self {
        Self::build(config, handler, timers, None)
    }

    fn build(
        config: SchedulerConfig,
        handler: Arc<dyn CommandHandler<C>>,
        timers: Handle,
        runtime: Option<Runtime>,
    ) -> Self {
        let shared = Shared {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: None,
                draining: false,
                generation: CancellationToken::new(),
                timer: None,
                next_timer_id: 1,
            }),
            idle: Condvar::new(),
            handler,
            console: Arc::new(TracingConsole),
            progress: ProgressSender::new(config.progress_channel_capacity),
            worker: build_worker_pool(),
            timers,
        };
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(shared),
                runtime,
            }),
        }
    }

    /// Routes command failure and cancellation messages to `console`.
    ///
    /// Only valid before the scheduler is cloned or used.
    #[must_use]
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            if let Some(shared) = Arc::get_mut(&mut inner.shared) {
                shared.console = console;
            }
        }
        self
    }

    /// Appends `command` to the queue and (re)arms the debounce timer.
    pub fn enqueue(&self, command: C, delay: Duration) {
        let shared = &self.inner.shared;
        let mut state = shared.state.lock();
        tracing::debug!(
            target = "quarry.scheduler",
            command = %command,
            pending = state.pending.len() + 1,
            delay_ms = delay.as_millis() as u64,
            "command queued"
        );
        state.pending.push_back(command);
        if state.draining {
            return;
        }

        if let Some((_, previous)) = state.timer.take() {
            previous.cancel();
        }
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let timer = CancellationToken::new();
        state.timer = Some((id, timer.clone()));
        drop(state);

        let shared = Arc::clone(shared);
        self.inner.shared.timers.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => Shared::start_drain(&shared, id),
            }
        });
    }

    /// Cancels the in-flight command and drops everything still queued.
    ///
    /// Returns the number of queued commands that were dropped.
    pub fn cancel(&self) -> usize {
        let shared = &self.inner.shared;
        let mut state = shared.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if let Some((_, timer)) = state.timer.take() {
            timer.cancel();
        }
        state.generation.cancel();
        state.generation = CancellationToken::new();
        if state.is_idle() {
            shared.idle.notify_all();
        }
        tracing::info!(
            target = "quarry.scheduler",
            dropped,
            running = state.running.as_deref().unwrap_or("-"),
            "update queue cancelled"
        );
        dropped
    }

    pub fn is_idle(&self) -> bool {
        self.inner.shared.state.lock().is_idle()
    }

    pub fn pending(&self) -> usize {
        self.inner.shared.state.lock().pending.len()
    }

    /// Description of the command currently executing, if any.
    pub fn running(&self) -> Option<String> {
        self.inner.shared.state.lock().running.clone()
    }

    /// Blocks until the queue is empty and the worker has stopped, or until
    /// `timeout` passes. Returns whether the scheduler is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.inner.shared;
        let deadline = Instant::now() + timeout;
        let mut state = shared.state.lock();
        while !state.is_idle() {
            if shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    pub fn progress(&self) -> ProgressSender {
        self.inner.shared.progress.clone()
    }

    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.inner.shared.progress.subscribe()
    }
}

impl<C> Shared<C>
where
    C: fmt::Display + Send + 'static,
{
    fn start_drain(this: &Arc<Self>, timer_id: u64) {
        {
            let mut state = this.state.lock();
            // A later enqueue re-armed the timer; that timer owns the transition.
            match &state.timer {
                Some((id, _)) if *id == timer_id => state.timer = None,
                _ => return,
            }
            if state.draining || state.pending.is_empty() {
                return;
            }
            state.draining = true;
        }

        let shared = Arc::clone(this);
        this.worker.spawn(move || shared.drain());
    }

    fn drain(&self) {
        tracing::debug!(target = "quarry.scheduler", "update worker started");
        loop {
            let (command, token) = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(command) => {
                        state.running = Some(command.to_string());
                        (command, state.generation.clone())
                    }
                    None => {
                        state.draining = false;
                        state.running = None;
                        self.idle.notify_all();
                        tracing::debug!(target = "quarry.scheduler", "update worker idle");
                        return;
                    }
                }
            };

            self.run_one(&command, &token);
            self.state.lock().running = None;
        }
    }

    fn run_one(&self, command: &C, token: &CancellationToken) {
        let title = command.to_string();
        let progress = self.progress.start(title.clone());
        let ctx = CommandContext {
            token: token.clone(),
            progress: progress.clone(),
            console: Arc::clone(&self.console),
        };

        let started = Instant::now();
        let result = if token.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            match std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.handler.execute(command, &ctx)
            })) {
                Ok(result) => result,
                Err(panic) => {
                    tracing::error!(
                        target = "quarry.scheduler",
                        command = %title,
                        panic = %panic_message(&*panic),
                        "command panicked"
                    );
                    Err(TaskError::Panicked)
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => {
                tracing::info!(
                    target = "quarry.scheduler",
                    command = %title,
                    outcome = "ok",
                    elapsed_ms,
                    "command finished"
                );
                progress.finish(Some("done".to_string()));
            }
            Err(TaskError::Cancelled) => {
                tracing::info!(
                    target = "quarry.scheduler",
                    command = %title,
                    outcome = "cancelled",
                    elapsed_ms,
                    "command finished"
                );
                self.console.info(&format!("{title}: cancelled"));
                progress.finish(Some("cancelled".to_string()));
                if !token.is_cancelled() {
                    // The handler gave up on its own; cancellation is still a full stop.
                    self.clear_pending();
                }
            }
            Err(err) => {
                tracing::warn!(
                    target = "quarry.scheduler",
                    command = %title,
                    outcome = "failed",
                    elapsed_ms,
                    error = %err,
                    "command finished"
                );
                self.console.error(&format!("{title} failed: {err}"));
                progress.finish(Some("failed".to_string()));
            }
        }
    }

    fn clear_pending(&self) {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if dropped > 0 {
            tracing::info!(target = "quarry.scheduler", dropped, "dropped queued commands after cancellation");
        }
    }
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.pending.clear();
            if let Some((_, timer)) = state.timer.take() {
                timer.cancel();
            }
            state.generation.cancel();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
