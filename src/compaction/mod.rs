//! compaction — пересборка хранилища базы в свежую плотную копию с атомарной подменой.
//!
//! - task.rs      — `CompactDatabaseTask`: машина состояний, каталоги, cleanup.
//! - compactor.rs — `Compactor` (шов) и `StorageCompactor` (копирование деревьев).
//! - progress.rs  — события прогресса и синхронная ретрансляция наблюдателю.
//! - size.rs      — размер базы до/после.
//! - operation.rs — запуск в отдельном потоке с mpsc-каналом прогресса.
//! - error.rs     — `CompactionError` / `CompactorError`.

pub mod compactor;
pub mod error;
pub mod operation;
pub mod progress;
pub mod size;
pub mod task;

pub use compactor::{Compactor, StorageCompactor};
pub use error::{CompactionError, CompactorError, EngineRole};
pub use operation::CompactionOperation;
pub use progress::{CompactionProgress, ProgressRelay, StorageCompactionProgress};
pub use size::{bytes_to_mb, calculate_storage_size_in_bytes, database_size_in_bytes};
pub use task::{CompactDatabaseTask, CompactionResult, CompactionState, DirectoryTriple};
