use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quarry_core::Console;
use quarry_scheduler::{CommandContext, CommandHandler, SchedulerConfig, TaskError, UpdateScheduler};

/// Test commands: a name plus what the handler should do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Ok(&'static str),
    Fail(&'static str),
    Panic(&'static str),
    /// Signals `started`, then polls the token until cancelled.
    Block(&'static str),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Ok(name) | Step::Fail(name) | Step::Panic(name) | Step::Block(name) => name,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(&'static str),
    End(&'static str),
}

pub struct Recorder {
    pub events: Mutex<Vec<Event>>,
    started: Mutex<mpsc::Sender<&'static str>>,
}

impl CommandHandler<Step> for Recorder {
    fn execute(&self, step: &Step, ctx: &CommandContext) -> Result<(), TaskError> {
        self.events.lock().push(Event::Start(step.name()));
        let _ = self.started.lock().send(step.name());
        let result = match step {
            Step::Ok(_) => {
                std::thread::sleep(Duration::from_millis(20));
                Ok(())
            }
            Step::Fail(name) => Err(TaskError::failed(format!("{name} exploded"))),
            Step::Panic(name) => panic!("{name} panicked"),
            Step::Block(_) => loop {
                ctx.check()?;
                std::thread::sleep(Duration::from_millis(5));
            },
        };
        if result.is_ok() {
            self.events.lock().push(Event::End(step.name()));
        }
        result
    }
}

#[derive(Default)]
pub struct CollectingConsole {
    pub errors: Mutex<Vec<String>>,
}

impl Console for CollectingConsole {
    fn info(&self, _message: &str) {}

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

pub struct Harness {
    pub scheduler: UpdateScheduler<Step>,
    pub recorder: Arc<Recorder>,
    pub console: Arc<CollectingConsole>,
    pub started: mpsc::Receiver<&'static str>,
}

impl Harness {
    pub fn new() -> Self {
        let (tx, started) = mpsc::channel();
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
            started: Mutex::new(tx),
        });
        let console = Arc::new(CollectingConsole::default());
        let handler: Arc<dyn CommandHandler<Step>> = recorder.clone();
        let scheduler = UpdateScheduler::new(SchedulerConfig::default(), handler)
            .unwrap()
            .with_console(console.clone());
        Self {
            scheduler,
            recorder,
            console,
            started,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.recorder.events.lock().clone()
    }

    pub fn wait_started(&self, name: &str) {
        loop {
            let started = self
                .started
                .recv_timeout(Duration::from_secs(10))
                .expect("command never started");
            if started == name {
                return;
            }
        }
    }
}
