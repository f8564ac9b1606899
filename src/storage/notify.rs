//! storage/notify — IO change notifications and the catastrophic-failure hook.

use log::error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoChange {
    JournalCreated(PathBuf),
    JournalRemoved(PathBuf),
    DataFileSynced(PathBuf),
    DataFileTruncated { path: PathBuf, len: u64 },
}

type Subscriber = Box<dyn Fn(&IoChange) + Send + Sync>;

/// Fan-out of file-level IO events for anyone watching an environment (monitoring, tests).
#[derive(Default)]
pub struct IoChangesNotifications {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl IoChangesNotifications {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&IoChange) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(f));
    }

    pub fn notify(&self, change: IoChange) {
        let subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        for s in subs.iter() {
            s(&change);
        }
    }
}

impl fmt::Debug for IoChangesNotifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self
            .subscribers
            .lock()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("IoChangesNotifications")
            .field("subscribers", &n)
            .finish()
    }
}

type CatastrophicHandler = dyn Fn(&Path, &str) + Send + Sync;

/// Hook invoked when an environment detects structural corruption.
///
/// The default policy terminates the process: continuing would operate on corrupted state.
/// The hook runs before `open` returns its error, so a non-terminating handler (tests,
/// embedding hosts) still sees the failure as an error afterwards.
#[derive(Clone)]
pub struct CatastrophicFailureNotification {
    handler: Arc<CatastrophicHandler>,
}

impl CatastrophicFailureNotification {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Path, &str) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(f),
        }
    }

    /// Log and abort the process.
    pub fn abort_process() -> Self {
        Self::new(|path, message| {
            error!(
                "catastrophic storage failure in {}: {}; aborting",
                path.display(),
                message
            );
            std::process::abort();
        })
    }

    pub fn raise(&self, path: &Path, message: &str) {
        (self.handler)(path, message)
    }
}

impl Default for CatastrophicFailureNotification {
    fn default() -> Self {
        Self::abort_process()
    }
}

impl fmt::Debug for CatastrophicFailureNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CatastrophicFailureNotification")
    }
}
