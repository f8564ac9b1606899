//! storage/tx — in-memory tree state and read snapshots.
//!
//! Writers mutate the state through `Arc::make_mut`: a reader that still holds the previous
//! `Arc` keeps an untouched copy, so snapshots never block writers and never see a torn batch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::metrics::{record_read_tx_begin, record_read_tx_end};

use super::record::WriteOp;

pub type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default, Clone)]
pub struct TreeState {
    trees: BTreeMap<String, Tree>,
    last_lsn: u64,
}

impl TreeState {
    pub(crate) fn apply(&mut self, op: WriteOp, lsn: u64) {
        match op {
            WriteOp::Put { tree, key, value } => {
                self.trees.entry(tree).or_default().insert(key, value);
            }
            WriteOp::Delete { tree, key } => {
                let emptied = match self.trees.get_mut(&tree) {
                    Some(t) => {
                        t.remove(&key);
                        t.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.trees.remove(&tree);
                }
            }
        }
        if lsn > self.last_lsn {
            self.last_lsn = lsn;
        }
    }

    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }
}

/// Isolated read view of an environment at the moment it was opened.
pub struct ReadTransaction {
    state: Arc<TreeState>,
    env_path: PathBuf,
}

impl ReadTransaction {
    pub(crate) fn new(state: Arc<TreeState>, env_path: PathBuf) -> Self {
        record_read_tx_begin();
        Self { state, env_path }
    }

    pub fn env_path(&self) -> &Path {
        &self.env_path
    }

    pub fn last_lsn(&self) -> u64 {
        self.state.last_lsn
    }

    pub fn get(&self, tree: &str, key: &[u8]) -> Option<&[u8]> {
        self.state
            .trees
            .get(tree)
            .and_then(|t| t.get(key))
            .map(|v| v.as_slice())
    }

    /// Tree names in ascending order.
    pub fn tree_names(&self) -> Vec<String> {
        self.state.trees.keys().cloned().collect()
    }

    pub fn tree_len(&self, tree: &str) -> u64 {
        self.state.trees.get(tree).map(|t| t.len() as u64).unwrap_or(0)
    }

    pub fn total_entries(&self) -> u64 {
        self.state.trees.values().map(|t| t.len() as u64).sum()
    }

    /// Entries of one tree in key order (empty iterator for an unknown tree).
    pub fn iter_tree<'a>(&'a self, tree: &str) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.state
            .trees
            .get(tree)
            .into_iter()
            .flat_map(|t| t.iter().map(|(k, v)| (k.as_slice(), v.as_slice())))
    }

    /// Live payload bytes of one tree (keys + values).
    pub fn tree_bytes(&self, tree: &str) -> u64 {
        self.state
            .trees
            .get(tree)
            .map(|t| t.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
            .unwrap_or(0)
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        record_read_tx_end();
    }
}
