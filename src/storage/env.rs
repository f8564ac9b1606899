//! storage/env — StorageEnvironment: открытие, запись через журнал, чекпоинт, снапшоты, отчёт.
//!
//! Жизненный цикл:
//! - open(RW): создаёт окружение при отсутствии meta, берёт эксклюзивный LOCK, читает data file,
//!   проигрывает журналы (LSN > последнего LSN data file), сразу переносит их в data file,
//!   отрезает оборванный хвост data file и помечает meta как unclean.
//! - open(RO): shared LOCK, ничего не пишет; журналы проигрываются только в память.
//! - write_batch: запись в активный журнал (+fsync по настройке) → применение в памяти.
//! - flush: pending → data file → fsync → удаление журналов → meta.last_lsn.
//! - close: flush + meta.clean_shutdown=true + освобождение LOCK. Идемпотентен; вызывается из Drop.
//!
//! Полная запись с неверным CRC в data file, мусор после нулевого маркера конца или обрыв
//! раньше meta.last_lsn — структурное повреждение: вызывается catastrophic handler, затем
//! open возвращает ошибку StorageCorruption. Ничего не отрезается.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::cancel::OperationCancelled;
use crate::consts::JOURNAL_HDR_SIZE;
use crate::dirs::fsync_dir;
use crate::lock::{try_acquire_lock, LockGuard, LockMode};
use crate::metrics::record_journal_checkpoint;

use super::datafile::{create_data_file, data_file_path, scan_data_file, DataFileWriter};
use super::journal::{journals_dir, list_journals, replay_journal, JournalWriter};
use super::meta::{meta_exists, read_meta, write_meta_new, write_meta_overwrite, EnvMeta};
use super::notify::{CatastrophicFailureNotification, IoChange, IoChangesNotifications};
use super::options::{OpenMode, StorageEnvironmentOptions};
use super::record::{encode_into, WriteOp};
use super::report::{DataFileReport, JournalReport, StorageReport, TreeReport};
use super::tx::{ReadTransaction, TreeState};
use super::StorageCorruption;

struct WriterState {
    data: DataFileWriter,
    journal: Option<JournalWriter>,
    next_journal: u64,
    /// Закодированные записи, уже лежащие в журналах, но ещё не в data file.
    pending: Vec<u8>,
    next_lsn: u64,
    meta: EnvMeta,
}

pub struct StorageEnvironment {
    options: StorageEnvironmentOptions,
    env_id: u64,
    state: RwLock<Arc<TreeState>>,
    writer: Mutex<Option<WriterState>>,
    lock: Mutex<Option<LockGuard>>,
    closing: AtomicBool,
    notifications: Arc<IoChangesNotifications>,
}

impl StorageEnvironment {
    pub fn open(
        options: StorageEnvironmentOptions,
        notifications: Arc<IoChangesNotifications>,
        catastrophic: CatastrophicFailureNotification,
    ) -> Result<Self> {
        let root = options.path.clone();
        let read_only = options.mode == OpenMode::ReadOnly;

        if read_only {
            if !meta_exists(&root) {
                return Err(anyhow!("no storage environment at {}", root.display()));
            }
        } else {
            fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        }

        let lock_mode = if read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        let lock = try_acquire_lock(&root, lock_mode)?;

        let mut meta = if meta_exists(&root) {
            read_meta(&root)?
        } else {
            // meta пишется последней: её наличие означает, что окружение создано целиком.
            let m = EnvMeta::new(rand::random::<u64>());
            let _ = fs::remove_file(data_file_path(&root));
            create_data_file(&root, m.env_id)?;
            write_meta_new(&root, &m)?;
            info!(
                "env: created storage environment {} (env_id={:016x})",
                root.display(),
                m.env_id
            );
            m
        };

        let mut state = TreeState::default();
        let scan = scan_data_file(&root, meta.env_id, meta.last_lsn, |op, lsn| {
            state.apply(op, lsn)
        })?;
        if let Some(why) = scan.corruption.clone() {
            catastrophic.raise(&root, &why);
            return Err(anyhow::Error::new(StorageCorruption {
                path: root,
                detail: why,
            }));
        }

        let data_lsn = state.last_lsn();
        let journals = list_journals(&root)?;
        let mut pending = Vec::new();
        let mut replayed = 0usize;
        for (_, path) in &journals {
            for (op, lsn) in replay_journal(path, meta.env_id)? {
                if lsn <= data_lsn {
                    continue;
                }
                encode_into(&mut pending, &op, lsn)?;
                state.apply(op, lsn);
                replayed += 1;
            }
        }
        if replayed > 0 {
            debug!(
                "env: replayed {} journal record(s) from {} journal(s) in {}",
                replayed,
                journals.len(),
                root.display()
            );
        }

        let next_lsn = state.last_lsn().max(meta.last_lsn) + 1;
        let next_journal = journals.last().map(|(n, _)| n + 1).unwrap_or(1);

        let writer = if read_only {
            None
        } else {
            let data = DataFileWriter::open(&root, scan.valid_len)?;
            if scan.has_torn_tail() {
                warn!(
                    "env: truncated torn tail of {} ({} -> {} bytes)",
                    data.path().display(),
                    scan.file_len,
                    scan.valid_len
                );
                notifications.notify(IoChange::DataFileTruncated {
                    path: data.path().to_path_buf(),
                    len: scan.valid_len,
                });
            }
            meta.clean_shutdown = false;
            write_meta_overwrite(&root, &meta)?;
            Some(WriterState {
                data,
                journal: None,
                next_journal,
                pending,
                next_lsn,
                meta: meta.clone(),
            })
        };

        let env = Self {
            options,
            env_id: meta.env_id,
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(writer),
            lock: Mutex::new(Some(lock)),
            closing: AtomicBool::new(false),
            notifications,
        };

        // Проигранные журналы сразу переносим в data file.
        if replayed > 0 && !read_only {
            env.flush()?;
        }

        Ok(env)
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn options(&self) -> &StorageEnvironmentOptions {
        &self.options
    }

    pub fn env_id(&self) -> u64 {
        self.env_id
    }

    pub fn is_read_only(&self) -> bool {
        self.options.mode == OpenMode::ReadOnly
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> &Arc<IoChangesNotifications> {
        &self.notifications
    }

    pub fn last_lsn(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_lsn()
    }

    fn ensure_writable(&self, op: &str) -> Result<()> {
        if self.is_closed() {
            return Err(anyhow!("{}: environment {} is closed", op, self.path().display()));
        }
        if self.is_read_only() {
            return Err(anyhow!(
                "{}: environment {} is read-only",
                op,
                self.path().display()
            ));
        }
        Ok(())
    }

    fn apply_to_state(&self, ops: &[WriteOp], first_lsn: u64) {
        let mut st = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let s = Arc::make_mut(&mut *st);
        for (i, op) in ops.iter().enumerate() {
            s.apply(op.clone(), first_lsn + i as u64);
        }
    }

    // -------- writes --------

    /// Durable batch write: journal first, then the in-memory state. Returns the last LSN.
    pub fn write_batch(&self, ops: &[WriteOp]) -> Result<u64> {
        self.ensure_writable("write_batch")?;
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let w = guard
            .as_mut()
            .ok_or_else(|| anyhow!("write_batch: writer is gone"))?;
        if ops.is_empty() {
            return Ok(w.next_lsn - 1);
        }

        let first = w.next_lsn;
        let mut buf = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            encode_into(&mut buf, op, first + i as u64)?;
        }

        self.ensure_journal_room(w, buf.len() as u64)?;
        let journal = w
            .journal
            .as_mut()
            .ok_or_else(|| anyhow!("write_batch: no active journal"))?;
        journal.append(&buf)?;
        if self.options.journal_fsync {
            journal.sync()?;
        }

        w.pending.extend_from_slice(&buf);
        w.next_lsn = first + ops.len() as u64;
        self.apply_to_state(ops, first);
        Ok(w.next_lsn - 1)
    }

    pub fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<u64> {
        self.write_batch(&[WriteOp::put(tree, key, value)])
    }

    pub fn delete(&self, tree: &str, key: &[u8]) -> Result<u64> {
        self.write_batch(&[WriteOp::delete(tree, key)])
    }

    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tx = self.read_transaction()?;
        Ok(tx.get(tree, key).map(|v| v.to_vec()))
    }

    /// Bulk load straight into the data file, bypassing the journal.
    /// With `data_fsync` off the batch is durable only after `sync_data()`.
    pub fn import_batch(&self, ops: &[WriteOp]) -> Result<u64> {
        self.ensure_writable("import_batch")?;
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let w = guard
            .as_mut()
            .ok_or_else(|| anyhow!("import_batch: writer is gone"))?;
        if ops.is_empty() {
            return Ok(w.next_lsn - 1);
        }
        // Data file должен оставаться упорядоченным по LSN.
        if !w.pending.is_empty() {
            self.checkpoint_locked(w)?;
        }

        let first = w.next_lsn;
        let mut buf = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            encode_into(&mut buf, op, first + i as u64)?;
        }
        w.data.append(&buf)?;
        if self.options.data_fsync {
            w.data.sync()?;
        }
        w.next_lsn = first + ops.len() as u64;
        self.apply_to_state(ops, first);
        Ok(w.next_lsn - 1)
    }

    pub fn sync_data(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(w) = guard.as_mut() {
            w.data.sync()?;
            self.notifications
                .notify(IoChange::DataFileSynced(w.data.path().to_path_buf()));
        }
        Ok(())
    }

    fn ensure_journal_room(&self, w: &mut WriterState, need: u64) -> Result<()> {
        let fits = w
            .journal
            .as_ref()
            .map(|j| j.remaining() >= need)
            .unwrap_or(false);
        if fits {
            return Ok(());
        }
        if let Some(mut old) = w.journal.take() {
            old.sync()?;
            debug!("env: journal {} is full, rotating", old.path.display());
        }
        let capacity = self
            .options
            .journal_size
            .max(JOURNAL_HDR_SIZE as u64 + need);
        let j = JournalWriter::create(self.path(), w.next_journal, self.env_id, capacity)?;
        w.next_journal += 1;
        self.notifications
            .notify(IoChange::JournalCreated(j.path.clone()));
        w.journal = Some(j);
        Ok(())
    }

    // -------- checkpoint / close --------

    /// Move journaled writes into the data file and delete the journals.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(w) => self.checkpoint_locked(w),
            None => Ok(()),
        }
    }

    fn checkpoint_locked(&self, w: &mut WriterState) -> Result<()> {
        let root = self.options.path.clone();
        let journals = list_journals(&root)?;
        if w.pending.is_empty() && journals.is_empty() {
            return Ok(());
        }

        if !w.pending.is_empty() {
            w.data.append(&w.pending)?;
            w.pending.clear();
        }
        // Журналы удаляются и meta.last_lsn продвигается только после fsync data file.
        w.data.sync()?;
        self.notifications
            .notify(IoChange::DataFileSynced(w.data.path().to_path_buf()));

        w.journal = None;
        for (_, p) in &journals {
            fs::remove_file(p).with_context(|| format!("remove journal {}", p.display()))?;
            self.notifications.notify(IoChange::JournalRemoved(p.clone()));
        }
        let _ = fsync_dir(&journals_dir(&root));

        w.meta.last_lsn = w.next_lsn - 1;
        write_meta_overwrite(&root, &w.meta)?;
        record_journal_checkpoint();
        debug!(
            "env: checkpoint {} (last_lsn={}, journals removed={})",
            root.display(),
            w.meta.last_lsn,
            journals.len()
        );
        Ok(())
    }

    /// Checkpoint, mark clean shutdown and release the directory lock. Idempotent.
    ///
    /// After close, `read_transaction()` fails with `OperationCancelled` and
    /// `generate_report()` returns `None`.
    pub fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = (|| -> Result<()> {
            let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(mut w) = guard.take() {
                self.checkpoint_locked(&mut w)?;
                // импорт без data_fsync мог не попасть на диск
                w.data.sync()?;
                w.meta.clean_shutdown = true;
                w.meta.last_lsn = w.next_lsn - 1;
                write_meta_overwrite(self.path(), &w.meta)?;
            }
            Ok(())
        })();

        if let Some(mut l) = self
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            l.release();
        }
        debug!("env: closed {}", self.path().display());
        result
    }

    // -------- reads --------

    pub fn read_transaction(&self) -> Result<ReadTransaction> {
        if self.is_closed() {
            return Err(OperationCancelled.into());
        }
        let st = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(ReadTransaction::new(st, self.options.path.clone()))
    }

    /// Structural report as seen by `tx`. `None` if the environment is closed or its files
    /// cannot be inspected right now.
    pub fn generate_report(&self, tx: &ReadTransaction) -> Option<StorageReport> {
        if self.is_closed() {
            return None;
        }
        let root = self.path();
        let data_len = fs::metadata(data_file_path(root)).ok()?.len();

        let mut journals = Vec::new();
        for (number, path) in list_journals(root).ok()? {
            let len = fs::metadata(&path).ok()?.len();
            journals.push(JournalReport {
                number,
                allocated_space_in_bytes: len,
            });
        }

        let trees: Vec<TreeReport> = tx
            .tree_names()
            .into_iter()
            .map(|name| TreeReport {
                entries: tx.tree_len(&name),
                payload_bytes: tx.tree_bytes(&name),
                name,
            })
            .collect();
        let live: u64 = trees.iter().map(|t| t.payload_bytes).sum();

        Some(StorageReport {
            data_file: DataFileReport {
                allocated_space_in_bytes: data_len,
                live_payload_bytes: live,
            },
            journals,
            trees,
        })
    }
}

impl Drop for StorageEnvironment {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("env: close on drop failed for {}: {:#}", self.path().display(), e);
        }
    }
}

impl std::fmt::Debug for StorageEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEnvironment")
            .field("path", &self.options.path)
            .field("mode", &self.options.mode)
            .field("env_id", &format_args!("{:016x}", self.env_id))
            .field("closed", &self.is_closed())
            .finish()
    }
}
