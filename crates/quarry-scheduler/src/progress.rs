use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use quarry_core::ProgressSink;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin {
        id: ProgressId,
        title: String,
    },
    Report {
        id: ProgressId,
        message: String,
    },
    End {
        id: ProgressId,
        message: Option<String>,
    },
}

impl ProgressEvent {
    pub fn id(&self) -> ProgressId {
        match self {
            ProgressEvent::Begin { id, .. }
            | ProgressEvent::Report { id, .. }
            | ProgressEvent::End { id, .. } => *id,
        }
    }
}

pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

#[derive(Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
    next_id: Arc<AtomicU64>,
}

impl ProgressSender {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    pub fn start(&self, title: impl Into<String>) -> Progress {
        let id = ProgressId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // A send only fails when nobody is subscribed.
        let _ = self.tx.send(ProgressEvent::Begin {
            id,
            title: title.into(),
        });
        Progress {
            id,
            tx: self.tx.clone(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Handle for one running command's progress.
///
/// `End` is sent exactly once: explicitly through [`Progress::finish`] or on
/// drop.
#[derive(Clone)]
pub struct Progress {
    id: ProgressId,
    tx: broadcast::Sender<ProgressEvent>,
    finished: Arc<AtomicBool>,
}

impl Progress {
    pub fn id(&self) -> ProgressId {
        self.id
    }

    pub fn finish(&self, message: impl Into<Option<String>>) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.tx.send(ProgressEvent::End {
                id: self.id,
                message: message.into(),
            });
        }
    }
}

impl ProgressSink for Progress {
    fn report(&self, message: &str) {
        if self.finished.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.tx.send(ProgressEvent::Report {
            id: self.id,
            message: message.to_string(),
        });
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        // Clones share `finished`; only the last handle gets here with work left.
        if Arc::strong_count(&self.finished) == 1 {
            self.finish(None);
        }
    }
}
