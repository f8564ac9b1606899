//! compaction/task — оркестратор компактации одной базы.
//!
//! Состояния: Init → Locking → Preparing → Compacting → Swapping → Cleanup → Done,
//! Failed достижим из Preparing / Compacting / Swapping.
//!
//! Каталоги (соседи live):
//! - `<live>-Compacting` — куда компактор строит новую копию;
//! - `<live>-old`        — куда уезжает live перед подменой.
//!
//! Swap — два отдельных rename (live → -old, -Compacting → live). Краш между ними оставляет
//! единственную копию в `-old`; автоматического восстановления нет. Поэтому запуск при
//! отсутствующем live и существующем `-old` отказывается работать (`Unavailable`), чтобы
//! Preparing не удалил эту копию.
//!
//! Точки отмены: перед Preparing, перед Compacting, внутри компактора, перед Swapping.
//! Cleanup выполняется всегда, когда каталоги были определены (в том числе после сбоя
//! удаления stale-каталогов в Preparing); ошибка cleanup отдаётся вызывающему только если до
//! неё не было основной ошибки.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::DatabaseConfig;
use crate::consts::{COMPACTING_SUFFIX, OLD_SUFFIX};
use crate::dirs::{delete_dir, dir_exists, move_dir};
use crate::landlord::{DatabasesLandlord, LandlordError};
use crate::metrics::{
    record_compaction_cancelled, record_compaction_completed, record_compaction_failed,
    record_compaction_started,
};
use crate::storage::{
    CatastrophicFailureNotification, OpenMode, StorageCorruption, StorageEnvironment,
    StorageEnvironmentOptions,
};
use crate::BoxError;

use super::compactor::{Compactor, StorageCompactor};
use super::error::{CompactionError, CompactorError, EngineRole};
use super::progress::{CompactionProgress, ProgressRelay, StorageCompactionProgress};
use super::size::{bytes_to_mb, database_size_in_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactionResult {
    pub size_before_mb: u64,
    pub size_after_mb: u64,
}

impl CompactionResult {
    pub fn from_bytes(before: u64, after: u64) -> Self {
        Self {
            size_before_mb: bytes_to_mb(before),
            size_after_mb: bytes_to_mb(after),
        }
    }
}

impl fmt::Display for CompactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MB -> {} MB", self.size_before_mb, self.size_after_mb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompactionState {
    Init,
    Locking,
    Preparing,
    Compacting,
    Swapping,
    Cleanup,
    Done,
    Failed,
}

/// Live directory and its two compaction siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTriple {
    pub live: PathBuf,
    pub compacting: PathBuf,
    pub old: PathBuf,
}

impl DirectoryTriple {
    pub fn for_live<P: Into<PathBuf>>(live: P) -> Self {
        let live = live.into();
        Self {
            compacting: sibling(&live, COMPACTING_SUFFIX),
            old: sibling(&live, OLD_SUFFIX),
            live,
        }
    }
}

fn sibling(live: &Path, suffix: &str) -> PathBuf {
    let mut name = live
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    live.with_file_name(name)
}

pub struct CompactDatabaseTask {
    landlord: Arc<DatabasesLandlord>,
    database: String,
    cancel: CancellationToken,
    compactor: Arc<dyn Compactor>,
    catastrophic: CatastrophicFailureNotification,
    state: CompactionState,
}

impl CompactDatabaseTask {
    pub fn new(
        landlord: Arc<DatabasesLandlord>,
        database: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        let compactor = Arc::new(StorageCompactor::new(landlord.config().compact_batch));
        let catastrophic = landlord.catastrophic().clone();
        Self {
            landlord,
            database: database.into(),
            cancel,
            compactor,
            catastrophic,
            state: CompactionState::Init,
        }
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = compactor;
        self
    }

    /// Policy for structural corruption found while opening source or destination.
    pub fn with_catastrophic_handler(mut self, handler: CatastrophicFailureNotification) -> Self {
        self.catastrophic = handler;
        self
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> CompactionState {
        self.state
    }

    /// Run the whole compaction on the calling thread.
    pub fn execute(
        mut self,
        on_progress: Option<&mut dyn FnMut(&CompactionProgress)>,
    ) -> Result<CompactionResult, CompactionError> {
        let mut relay = ProgressRelay::new(on_progress);
        record_compaction_started();

        match self.run(&mut relay) {
            Ok((before, after)) => {
                record_compaction_completed(before, after);
                let result = CompactionResult::from_bytes(before, after);
                relay.message(format!(
                    "Compaction for {} finished: {}",
                    self.database, result
                ));
                info!("compaction[{}]: done, {}", self.database, result);
                Ok(result)
            }
            Err(e) => {
                if e.is_cancelled() {
                    record_compaction_cancelled();
                    info!("compaction[{}]: cancelled in {:?}", self.database, self.state);
                } else {
                    record_compaction_failed();
                    error!("compaction[{}]: {}", self.database, e);
                }
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: CompactionState) {
        debug!(
            "compaction[{}]: {:?} -> {:?}",
            self.database, self.state, next
        );
        self.state = next;
    }

    fn run(&mut self, relay: &mut ProgressRelay<'_>) -> Result<(u64, u64), CompactionError> {
        relay.message(format!("Started compaction for {}", self.database));
        let before = self.measure().map_err(|e| self.unavailable(e))?;

        self.transition(CompactionState::Locking);
        let mut guard = self
            .landlord
            .unload_and_lock(&self.database)
            .map_err(|e| self.unavailable(e))?;
        // До этой точки на диске ничего не менялось.
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }

        self.transition(CompactionState::Preparing);
        let (config, dirs) = match self.resolve_dirs() {
            Ok(v) => v,
            Err(e) => {
                self.transition(CompactionState::Failed);
                return Err(e);
            }
        };

        // С этого момента каталоги известны: любая ошибка идёт через cleanup.
        let mut keep_old = false;
        let mut primary = self.remove_stale(&dirs);
        if primary.is_ok() {
            primary = self.compact(&config, &dirs, relay);
        }
        if primary.is_ok() {
            primary = self.swap(&dirs, &mut keep_old);
        }
        if primary.is_err() {
            self.transition(CompactionState::Failed);
        }

        self.transition(CompactionState::Cleanup);
        let cleanup = self.cleanup(&dirs, keep_old);
        guard.release();

        match (primary, cleanup) {
            (Err(e), cleanup) => {
                if let Err(c) = cleanup {
                    warn!(
                        "compaction[{}]: cleanup after failure also failed: {}",
                        self.database, c
                    );
                }
                return Err(e);
            }
            (Ok(()), Err(c)) => {
                self.transition(CompactionState::Failed);
                return Err(CompactionError::Cleanup {
                    database: self.database.clone(),
                    source: c.into(),
                });
            }
            (Ok(()), Ok(())) => {}
        }

        let after = match self.measure() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "compaction[{}]: cannot measure size after compaction: {}",
                    self.database, e
                );
                0
            }
        };
        self.transition(CompactionState::Done);
        Ok((before, after))
    }

    /// Size of the loaded database; waits while another compaction holds the name.
    fn measure(&self) -> Result<u64, LandlordError> {
        loop {
            match self.landlord.try_get_or_create(&self.database) {
                Ok(Some(db)) => return Ok(database_size_in_bytes(&db)),
                Ok(None) => return Err(LandlordError::NotFound(self.database.clone())),
                Err(LandlordError::Locked(_)) => {
                    debug!(
                        "compaction[{}]: waiting for a running compaction to finish",
                        self.database
                    );
                    self.landlord.wait_until_unlocked(&self.database);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve the directory triple. Nothing on disk is touched here.
    fn resolve_dirs(&self) -> Result<(DatabaseConfig, DirectoryTriple), CompactionError> {
        let config = self
            .landlord
            .config()
            .resolve(&self.database)
            .map_err(|e| self.unavailable(e))?;
        let dirs = DirectoryTriple::for_live(config.data_directory.clone());

        if !dir_exists(&dirs.live) {
            let why = if dir_exists(&dirs.old) {
                format!(
                    "live directory {} is missing and {} holds the only copy; restore it manually",
                    dirs.live.display(),
                    dirs.old.display()
                )
            } else {
                format!("live directory {} is missing", dirs.live.display())
            };
            return Err(self.unavailable(why));
        }
        Ok((config, dirs))
    }

    /// Leftovers of a crashed run.
    fn remove_stale(&self, dirs: &DirectoryTriple) -> Result<(), CompactionError> {
        for stale in [&dirs.compacting, &dirs.old] {
            if dir_exists(stale) {
                warn!(
                    "compaction[{}]: removing stale {}",
                    self.database,
                    stale.display()
                );
                delete_dir(stale).map_err(|e| CompactionError::Prepare {
                    database: self.database.clone(),
                    source: e.into(),
                })?;
            }
        }
        Ok(())
    }

    fn compact(
        &mut self,
        config: &DatabaseConfig,
        dirs: &DirectoryTriple,
        relay: &mut ProgressRelay<'_>,
    ) -> Result<(), CompactionError> {
        self.transition(CompactionState::Compacting);
        self.checkpoint()?;

        let src_opts = StorageEnvironmentOptions::from_configuration(config, OpenMode::ReadOnly);
        let dst_opts = StorageEnvironmentOptions::from_configuration(
            &config.with_data_directory(dirs.compacting.clone()),
            OpenMode::ReadWrite,
        );
        let notifications = self.landlord.notifications().clone();

        let src = StorageEnvironment::open(src_opts, notifications.clone(), self.catastrophic.clone())
            .map_err(|e| self.open_failed(EngineRole::Source, e))?;
        let dst = StorageEnvironment::open(dst_opts, notifications, self.catastrophic.clone())
            .map_err(|e| self.open_failed(EngineRole::Destination, e))?;

        let mut forward = |p: &StorageCompactionProgress| relay.relay(p);
        let outcome = self
            .compactor
            .execute(&src, &dst, &mut forward, &self.cancel);

        // Оба хэндла закрываются до любых операций с каталогами.
        let closed = src.close().and_then(|()| dst.close());
        drop(src);
        drop(dst);

        match outcome {
            Ok(()) => {}
            Err(CompactorError::Cancelled) => return Err(self.cancelled()),
            Err(CompactorError::Failed(cause)) => {
                return Err(CompactionError::Execution {
                    database: self.database.clone(),
                    source: cause,
                })
            }
        }
        closed.map_err(|e| CompactionError::Execution {
            database: self.database.clone(),
            source: e.into(),
        })
    }

    fn swap(&mut self, dirs: &DirectoryTriple, keep_old: &mut bool) -> Result<(), CompactionError> {
        self.transition(CompactionState::Swapping);
        self.checkpoint()?;

        info!(
            "compaction[{}]: moving {} -> {}",
            self.database,
            dirs.live.display(),
            dirs.old.display()
        );
        move_dir(&dirs.live, &dirs.old).map_err(|e| self.swap_failed(e))?;

        info!(
            "compaction[{}]: moving {} -> {}",
            self.database,
            dirs.compacting.display(),
            dirs.live.display()
        );
        if let Err(e) = move_dir(&dirs.compacting, &dirs.live) {
            // live уже в -old: возвращаем его на место, иначе cleanup удалил бы единственную копию.
            match move_dir(&dirs.old, &dirs.live) {
                Ok(()) => warn!(
                    "compaction[{}]: second rename failed, original restored",
                    self.database
                ),
                Err(back) => {
                    *keep_old = true;
                    error!(
                        "compaction[{}]: cannot restore {} from {}: {:#}",
                        self.database,
                        dirs.live.display(),
                        dirs.old.display(),
                        back
                    );
                }
            }
            return Err(self.swap_failed(e));
        }
        Ok(())
    }

    /// Best effort: every step is attempted, the first error is returned.
    fn cleanup(&self, dirs: &DirectoryTriple, keep_old: bool) -> std::io::Result<()> {
        let mut first = None;
        let mut targets = vec![&dirs.compacting];
        if !keep_old {
            targets.push(&dirs.old);
        }
        for dir in targets {
            if let Err(e) = delete_dir(dir) {
                warn!(
                    "compaction[{}]: cannot delete {}: {}",
                    self.database,
                    dir.display(),
                    e
                );
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn checkpoint(&self) -> Result<(), CompactionError> {
        self.cancel.check().map_err(|_| self.cancelled())
    }

    fn cancelled(&self) -> CompactionError {
        CompactionError::Cancelled {
            database: self.database.clone(),
        }
    }

    fn unavailable<E: Into<BoxError>>(&self, e: E) -> CompactionError {
        CompactionError::Unavailable {
            database: self.database.clone(),
            source: e.into(),
        }
    }

    fn swap_failed(&self, e: anyhow::Error) -> CompactionError {
        CompactionError::Swap {
            database: self.database.clone(),
            source: e.into(),
        }
    }

    fn open_failed(&self, role: EngineRole, e: anyhow::Error) -> CompactionError {
        if let Some(corruption) = e.downcast_ref::<StorageCorruption>() {
            return CompactionError::Catastrophic {
                database: self.database.clone(),
                detail: corruption.to_string(),
            };
        }
        CompactionError::EngineOpen {
            database: self.database.clone(),
            role,
            source: e.into(),
        }
    }
}

impl fmt::Debug for CompactDatabaseTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactDatabaseTask")
            .field("database", &self.database)
            .field("state", &self.state)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
