//! Cooperative cancellation shared by the storage engine and the compaction orchestrator.
//!
//! `CancellationToken` is a cloneable flag; every clone observes the same state.
//! Checks happen only at explicit checkpoints, cancellation never interrupts an in-flight
//! write or rename.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Returned when an operation observes a cancelled token, or when a read snapshot
/// cannot be acquired because the environment is shutting down.
#[derive(Debug, Clone, Copy, Default, Error, PartialEq, Eq)]
#[error("operation was cancelled")]
pub struct OperationCancelled;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: Err(OperationCancelled) once cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<(), OperationCancelled> {
        if self.is_cancelled() {
            Err(OperationCancelled)
        } else {
            Ok(())
        }
    }
}
