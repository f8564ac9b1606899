//! compaction/progress — прогресс компактора и его ретрансляция наблюдателю.
//!
//! Relay синхронный: каждое событие перезаписывает поля одного `CompactionProgress` и тут же
//! вызывает наблюдателя в потоке компактации. Истории нет.

use serde::Serialize;

/// Tree-level progress emitted by a compactor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageCompactionProgress {
    pub global_progress: u64,
    pub global_total: u64,
    pub tree_progress: u64,
    pub tree_total: u64,
    pub tree_name: String,
    pub message: String,
}

/// What the caller's observer sees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionProgress {
    pub message: String,
    pub processed: u64,
    pub total: u64,
    pub tree_name: Option<String>,
    pub tree_progress: u64,
    pub tree_total: u64,
}

pub struct ProgressRelay<'a> {
    progress: CompactionProgress,
    observer: Option<&'a mut dyn FnMut(&CompactionProgress)>,
}

impl<'a> ProgressRelay<'a> {
    pub fn new(observer: Option<&'a mut dyn FnMut(&CompactionProgress)>) -> Self {
        Self {
            progress: CompactionProgress::default(),
            observer,
        }
    }

    pub fn current(&self) -> &CompactionProgress {
        &self.progress
    }

    /// Update only the message; counters keep their last values.
    pub fn message(&mut self, message: impl Into<String>) {
        self.progress.message = message.into();
        self.emit();
    }

    pub fn relay(&mut self, p: &StorageCompactionProgress) {
        self.progress.message = p.message.clone();
        self.progress.processed = p.global_progress;
        self.progress.total = p.global_total;
        self.progress.tree_name = Some(p.tree_name.clone());
        self.progress.tree_progress = p.tree_progress;
        self.progress.tree_total = p.tree_total;
        self.emit();
    }

    fn emit(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.progress);
        }
    }
}
