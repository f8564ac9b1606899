//! compaction/compactor — копирование всех деревьев из source в destination.
//!
//! `Compactor` — шов для подмены алгоритма (тесты, другие движки). `StorageCompactor`
//! пишет живые записи пачками прямо в data file назначения, минуя журнал: в результате
//! остаются только живые ключи, мёртвые записи source не переносятся.

use log::debug;

use crate::cancel::CancellationToken;
use crate::consts::DEFAULT_COMPACT_BATCH;
use crate::metrics::record_compaction_tree_copied;
use crate::storage::{StorageEnvironment, WriteOp};

use super::error::CompactorError;
use super::progress::StorageCompactionProgress;

pub trait Compactor: Send + Sync {
    /// Copy every tree of `source` into `destination`. Must check `cancel` cooperatively
    /// and return `CompactorError::Cancelled` when it stops because of it.
    fn execute(
        &self,
        source: &StorageEnvironment,
        destination: &StorageEnvironment,
        on_progress: &mut dyn FnMut(&StorageCompactionProgress),
        cancel: &CancellationToken,
    ) -> Result<(), CompactorError>;
}

#[derive(Debug, Clone)]
pub struct StorageCompactor {
    batch_size: usize,
}

impl StorageCompactor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for StorageCompactor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPACT_BATCH)
    }
}

impl Compactor for StorageCompactor {
    fn execute(
        &self,
        source: &StorageEnvironment,
        destination: &StorageEnvironment,
        on_progress: &mut dyn FnMut(&StorageCompactionProgress),
        cancel: &CancellationToken,
    ) -> Result<(), CompactorError> {
        let tx = source.read_transaction().map_err(CompactorError::failed)?;
        let trees = tx.tree_names();
        let global_total = tx.total_entries();
        let mut global_progress = 0u64;

        debug!(
            "compactor: {} -> {} ({} tree(s), {} entries)",
            source.path().display(),
            destination.path().display(),
            trees.len(),
            global_total
        );

        for tree_name in trees {
            cancel.check()?;
            let tree_total = tx.tree_len(&tree_name);
            if tree_total == 0 {
                continue;
            }

            let mut tree_progress = 0u64;
            let mut batch: Vec<WriteOp> = Vec::with_capacity(self.batch_size);
            let mut entries = tx.iter_tree(&tree_name).peekable();
            while let Some((k, v)) = entries.next() {
                batch.push(WriteOp::put(tree_name.as_str(), k, v));
                if batch.len() < self.batch_size && entries.peek().is_some() {
                    continue;
                }

                cancel.check()?;
                destination
                    .import_batch(&batch)
                    .map_err(CompactorError::failed)?;
                tree_progress += batch.len() as u64;
                global_progress += batch.len() as u64;
                batch.clear();

                on_progress(&StorageCompactionProgress {
                    global_progress,
                    global_total,
                    tree_progress,
                    tree_total,
                    tree_name: tree_name.clone(),
                    message: format!(
                        "Copied {} of {} entries of tree '{}'",
                        tree_progress, tree_total, tree_name
                    ),
                });
            }

            record_compaction_tree_copied(tree_total);
            on_progress(&StorageCompactionProgress {
                global_progress,
                global_total,
                tree_progress,
                tree_total,
                tree_name: tree_name.clone(),
                message: format!("Copied tree '{}'", tree_name),
            });
        }

        destination.sync_data().map_err(CompactorError::failed)?;
        Ok(())
    }
}
