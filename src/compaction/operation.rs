//! compaction/operation — компактация в отдельном потоке с каналом прогресса.

use std::io;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use crate::cancel::CancellationToken;

use super::error::CompactionError;
use super::progress::CompactionProgress;
use super::task::{CompactDatabaseTask, CompactionResult};

type Outcome = Result<CompactionResult, CompactionError>;

/// A running compaction. Progress events arrive on `progress()`; `join()` returns the outcome.
pub struct CompactionOperation {
    database: String,
    cancel: CancellationToken,
    progress: Receiver<CompactionProgress>,
    handle: Option<JoinHandle<Outcome>>,
}

impl CompactionOperation {
    pub fn spawn(task: CompactDatabaseTask) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let database = task.database_name().to_string();
        let cancel = task.cancellation_token().clone();

        let handle = thread::Builder::new()
            .name(format!("compact-{}", database))
            .spawn(move || {
                let mut forward = |p: &CompactionProgress| {
                    // получатель мог уйти
                    let _ = tx.send(p.clone());
                };
                task.execute(Some(&mut forward))
            })?;

        Ok(Self {
            database,
            cancel,
            progress: rx,
            handle: Some(handle),
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn progress(&self) -> &Receiver<CompactionProgress> {
        &self.progress
    }

    /// Events received so far, without blocking.
    pub fn drain_progress(&self) -> Vec<CompactionProgress> {
        self.progress.try_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    pub fn join(mut self) -> Outcome {
        let database = self.database.clone();
        match self.handle.take() {
            Some(h) => h.join().unwrap_or_else(|_| {
                Err(CompactionError::Execution {
                    database,
                    source: "compaction thread panicked".into(),
                })
            }),
            None => Err(CompactionError::Execution {
                database,
                source: "compaction already joined".into(),
            }),
        }
    }
}

impl std::fmt::Debug for CompactionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionOperation")
            .field("database", &self.database)
            .field("finished", &self.is_finished())
            .finish()
    }
}
