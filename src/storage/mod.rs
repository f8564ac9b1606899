//! storage — one storage environment per directory.
//!
//! Файлы окружения:
//! - `meta`                        — env_id, last_lsn, флаг clean shutdown (tmp+rename).
//! - `LOCK`                        — advisory lock (fs2): shared для RO, exclusive для RW.
//! - `data.dvs`                    — append-only лог записей; мёртвые записи копятся до компактации.
//! - `Journals/journal-NNNNNN.log` — преаллоцированные журналы записей до чекпоинта.

use std::path::PathBuf;
use thiserror::Error;

pub mod datafile;
pub mod env;
pub mod journal;
pub mod meta;
pub mod notify;
pub mod options;
pub mod record;
pub mod report;
pub mod tx;

pub use env::StorageEnvironment;
pub use notify::{CatastrophicFailureNotification, IoChange, IoChangesNotifications};
pub use options::{OpenMode, StorageEnvironmentOptions};
pub use record::WriteOp;
pub use report::{DataFileReport, JournalReport, StorageReport, TreeReport};
pub use tx::ReadTransaction;

/// A complete record in the data file failed validation.
#[derive(Debug, Error)]
#[error("storage corruption in {}: {}", .path.display(), .detail)]
pub struct StorageCorruption {
    pub path: PathBuf,
    pub detail: String,
}
