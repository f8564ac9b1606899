//! Centralized configuration for the document store.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - `ServerConfig::from_env()` reads the `DV_*` variables; fluent setters override them.
//! - `ServerConfig::resolve(name)` is the configuration provider for one database: it validates
//!   the name and derives the per-database directories.
//!
//! Layout under `data_root`:
//! - `Databases/<name>`      — documents storage environment (the compaction target)
//! - `Indexes/<name>/<index>` — one storage environment per index

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;

use crate::consts::{
    COMPACTING_SUFFIX, DATABASES_DIR, DEFAULT_COMPACT_BATCH, DEFAULT_JOURNAL_SIZE, INDEXES_DIR,
    OLD_SUFFIX,
};

/// Server-wide configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Root directory holding all databases.
    /// Env: DV_DATA_DIR (default "./data")
    pub data_root: PathBuf,

    /// Preallocated size of every journal file in bytes.
    /// Env: DV_JOURNAL_SIZE (default 1 MiB)
    pub journal_size: u64,

    /// fsync journals after every write batch.
    /// Env: DV_JOURNAL_FSYNC (default true; "0|false|off|no" => false)
    pub journal_fsync: bool,

    /// fsync the data file after every bulk import batch (checkpoints always fsync).
    /// Env: DV_DATA_FSYNC (default true)
    pub data_fsync: bool,

    /// Entries copied per destination batch during compaction.
    /// Env: DV_COMPACT_BATCH (default 1024)
    pub compact_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            journal_size: DEFAULT_JOURNAL_SIZE,
            journal_fsync: true,
            data_fsync: true,
            compact_batch: DEFAULT_COMPACT_BATCH,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        !(s == "0" || s == "false" || s == "off" || s == "no")
    })
}

impl ServerConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("DV_DATA_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.data_root = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("DV_JOURNAL_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.journal_size = n;
            }
        }

        if let Some(on) = env_flag("DV_JOURNAL_FSYNC") {
            cfg.journal_fsync = on;
        }

        if let Some(on) = env_flag("DV_DATA_FSYNC") {
            cfg.data_fsync = on;
        }

        if let Ok(v) = std::env::var("DV_COMPACT_BATCH") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.compact_batch = n;
                }
            }
        }

        cfg
    }

    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn with_data_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.data_root = root.into();
        self
    }

    pub fn with_journal_size(mut self, bytes: u64) -> Self {
        self.journal_size = bytes;
        self
    }

    pub fn with_journal_fsync(mut self, on: bool) -> Self {
        self.journal_fsync = on;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }

    pub fn with_compact_batch(mut self, entries: usize) -> Self {
        self.compact_batch = entries.max(1);
        self
    }

    /// Resolve the per-database configuration (data and index directories).
    pub fn resolve(&self, name: &str) -> Result<DatabaseConfig> {
        validate_database_name(name)?;
        Ok(DatabaseConfig {
            name: name.to_string(),
            data_directory: self.data_root.join(DATABASES_DIR).join(name),
            indexes_directory: self.data_root.join(INDEXES_DIR).join(name),
            journal_size: self.journal_size,
            journal_fsync: self.journal_fsync,
            data_fsync: self.data_fsync,
        })
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerConfig {{ data_root: {}, journal_size: {}, journal_fsync: {}, data_fsync: {}, compact_batch: {} }}",
            self.data_root.display(),
            self.journal_size,
            self.journal_fsync,
            self.data_fsync,
            self.compact_batch,
        )
    }
}

/// Per-database configuration produced by [`ServerConfig::resolve`].
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub name: String,
    pub data_directory: PathBuf,
    pub indexes_directory: PathBuf,
    pub journal_size: u64,
    pub journal_fsync: bool,
    pub data_fsync: bool,
}

impl DatabaseConfig {
    /// Same configuration pointed at another data directory (compaction destination).
    pub fn with_data_directory<P: Into<PathBuf>>(&self, dir: P) -> Self {
        let mut cfg = self.clone();
        cfg.data_directory = dir.into();
        cfg
    }
}

/// Reject names that would escape `Databases/` or collide with compaction siblings.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("database name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(anyhow!("database name '{}' is reserved", name));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(anyhow!(
            "database name '{}' must not contain path separators",
            name
        ));
    }
    if name.ends_with(COMPACTING_SUFFIX) || name.ends_with(OLD_SUFFIX) {
        return Err(anyhow!(
            "database name '{}' ends with a reserved compaction suffix",
            name
        ));
    }
    Ok(())
}

/// Builder that produces a [`ServerConfig`], starting from env.
#[derive(Clone, Debug)]
pub struct ServerConfigBuilder {
    cfg: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            cfg: ServerConfig::from_env(),
        }
    }
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: ServerConfig::default(),
        }
    }

    pub fn data_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.cfg.data_root = root.into();
        self
    }

    pub fn journal_size(mut self, bytes: u64) -> Self {
        self.cfg.journal_size = bytes;
        self
    }

    pub fn journal_fsync(mut self, on: bool) -> Self {
        self.cfg.journal_fsync = on;
        self
    }

    pub fn data_fsync(mut self, on: bool) -> Self {
        self.cfg.data_fsync = on;
        self
    }

    pub fn compact_batch(mut self, entries: usize) -> Self {
        self.cfg.compact_batch = entries.max(1);
        self
    }

    pub fn build(self) -> ServerConfig {
        self.cfg
    }
}
