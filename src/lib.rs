// Базовые модули
pub mod cancel;
pub mod config;
pub mod consts;
pub mod dirs;
pub mod lock;
pub mod metrics;

// Движок хранения: окружения, журналы, снапшоты
pub mod storage; // src/storage/{mod,env,journal,datafile,record,meta,tx,report,notify,options}.rs

// Загруженные базы и блокировки имён
pub mod landlord; // src/landlord/{mod,database,guard}.rs

// Компактация
pub mod compaction; // src/compaction/{mod,task,compactor,progress,size,operation,error}.rs

/// Boxed cause carried by the public error enums.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Удобные реэкспорты
pub use cancel::{CancellationToken, OperationCancelled};
pub use compaction::{
    CompactDatabaseTask, CompactionError, CompactionOperation, CompactionProgress,
    CompactionResult, Compactor, CompactorError, StorageCompactor,
};
pub use config::{DatabaseConfig, ServerConfig, ServerConfigBuilder};
pub use landlord::{DatabaseLockGuard, DatabasesLandlord, DocumentDatabase, LandlordError};
pub use storage::{
    CatastrophicFailureNotification, IoChange, IoChangesNotifications, OpenMode, ReadTransaction,
    StorageEnvironment, StorageEnvironmentOptions, StorageReport, WriteOp,
};
