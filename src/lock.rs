//! File-based locking for storage environments.
//!
//! Cross-platform (fs2) advisory locks on `<env>/LOCK`:
//! - Exclusive: read-write environment; at most one per directory.
//! - Shared: read-only environments (compaction source, tooling). Blocks writers.
//!
//! Lock is released on Drop or explicitly via `release()`.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct LockGuard {
    file: Option<std::fs::File>,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    fn new(file: std::fs::File, path: PathBuf, mode: LockMode) -> Self {
        Self {
            file: Some(file),
            path,
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Idempotent: второй вызов ничего не делает.
    pub fn release(&mut self) {
        if let Some(f) = self.file.take() {
            // fs2 unlock errors are ignored; closing the descriptor drops the lock anyway.
            let _ = f.unlock();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn lock_file_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

fn open_lock_file(root: &Path) -> Result<std::fs::File> {
    let path = lock_file_path(root);
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Try to acquire a lock in the requested mode. Returns Err if it is held incompatibly.
///
/// Environments never wait on the file lock: in-process exclusion is the landlord's job,
/// a conflict here means another process (or a leaked handle) owns the directory.
pub fn try_acquire_lock(root: &Path, mode: LockMode) -> Result<LockGuard> {
    let file = open_lock_file(root)?;
    let path = lock_file_path(root);
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => file
            .try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(LockGuard::new(file, path, mode))
}
