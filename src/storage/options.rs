//! storage/options — how to open one storage environment (mode + path + tunables).

use std::path::{Path, PathBuf};

use crate::config::DatabaseConfig;
use crate::consts::DEFAULT_JOURNAL_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Shared lock, never modifies files. The directory must already hold an environment.
    ReadOnly,
    /// Exclusive lock; creates the environment when the directory is empty or missing.
    ReadWrite,
}

#[derive(Debug, Clone)]
pub struct StorageEnvironmentOptions {
    pub path: PathBuf,
    pub mode: OpenMode,
    pub journal_size: u64,
    pub journal_fsync: bool,
    pub data_fsync: bool,
}

impl StorageEnvironmentOptions {
    pub fn for_path<P: Into<PathBuf>>(path: P, mode: OpenMode) -> Self {
        Self {
            path: path.into(),
            mode,
            journal_size: DEFAULT_JOURNAL_SIZE,
            journal_fsync: true,
            data_fsync: true,
        }
    }

    /// Documents environment of a database (lives directly in `data_directory`).
    pub fn from_configuration(cfg: &DatabaseConfig, mode: OpenMode) -> Self {
        Self::for_path(cfg.data_directory.clone(), mode).with_tunables(cfg)
    }

    /// Environment of one index (`indexes_directory/<index>`).
    pub fn for_index(cfg: &DatabaseConfig, index: &str, mode: OpenMode) -> Self {
        Self::for_path(cfg.indexes_directory.join(index), mode).with_tunables(cfg)
    }

    fn with_tunables(mut self, cfg: &DatabaseConfig) -> Self {
        self.journal_size = cfg.journal_size;
        self.journal_fsync = cfg.journal_fsync;
        self.data_fsync = cfg.data_fsync;
        self
    }

    pub fn with_journal_size(mut self, bytes: u64) -> Self {
        self.journal_size = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }
}
