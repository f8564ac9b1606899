//! compaction/error — outcome kinds of a compaction request.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::cancel::OperationCancelled;
use crate::BoxError;

/// Which storage handle failed to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineRole {
    Source,
    Destination,
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineRole::Source => f.write_str("source"),
            EngineRole::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("compaction of database '{database}' was cancelled")]
    Cancelled { database: String },

    /// Nothing on disk was touched: the database could not be found, loaded or locked.
    #[error("database '{database}' is unavailable for compaction: {source}")]
    Unavailable {
        database: String,
        #[source]
        source: BoxError,
    },

    /// Stale `-Compacting` / `-old` siblings could not be removed; they may be partly gone.
    #[error("failed to prepare compaction of database '{database}': {source}")]
    Prepare {
        database: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to open {role} storage of database '{database}': {source}")]
    EngineOpen {
        database: String,
        role: EngineRole,
        #[source]
        source: BoxError,
    },

    #[error("compaction of database '{database}' failed: {source}")]
    Execution {
        database: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to swap compacted storage of database '{database}': {source}")]
    Swap {
        database: String,
        #[source]
        source: BoxError,
    },

    #[error("storage of database '{database}' is corrupted: {detail}")]
    Catastrophic { database: String, detail: String },

    /// Only reported when no earlier failure happened in the same run.
    #[error("cleanup after compaction of database '{database}' failed: {source}")]
    Cleanup {
        database: String,
        #[source]
        source: BoxError,
    },
}

impl CompactionError {
    pub fn database(&self) -> &str {
        match self {
            CompactionError::Cancelled { database }
            | CompactionError::Unavailable { database, .. }
            | CompactionError::Prepare { database, .. }
            | CompactionError::EngineOpen { database, .. }
            | CompactionError::Execution { database, .. }
            | CompactionError::Swap { database, .. }
            | CompactionError::Catastrophic { database, .. }
            | CompactionError::Cleanup { database, .. } => database,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompactionError::Cancelled { .. })
    }
}

/// Error returned by a [`Compactor`](super::Compactor).
#[derive(Debug, Error)]
pub enum CompactorError {
    #[error("compaction cancelled")]
    Cancelled,

    #[error("compaction failed: {0}")]
    Failed(#[source] BoxError),
}

impl CompactorError {
    pub fn failed<E: Into<BoxError>>(e: E) -> Self {
        CompactorError::Failed(e.into())
    }
}

impl From<OperationCancelled> for CompactorError {
    fn from(_: OperationCancelled) -> Self {
        CompactorError::Cancelled
    }
}
