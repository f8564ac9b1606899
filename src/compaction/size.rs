//! compaction/size — размер базы на диске: data file + журналы каждого окружения.

use log::{debug, warn};
use std::sync::Arc;

use crate::cancel::OperationCancelled;
use crate::consts::BYTES_PER_MB;
use crate::landlord::DocumentDatabase;
use crate::storage::StorageEnvironment;

/// Sum of allocated bytes over `envs`. An environment whose snapshot or report is
/// unavailable is skipped; this never fails.
pub fn calculate_storage_size_in_bytes(envs: &[Arc<StorageEnvironment>]) -> u64 {
    let mut total = 0u64;
    for env in envs {
        let tx = match env.read_transaction() {
            Ok(tx) => tx,
            Err(e) if e.is::<OperationCancelled>() => {
                debug!("size: skipping {} (closing)", env.path().display());
                continue;
            }
            Err(e) => {
                warn!("size: skipping {}: {:#}", env.path().display(), e);
                continue;
            }
        };
        match env.generate_report(&tx) {
            Some(report) => total += report.allocated_bytes(),
            None => debug!("size: no report for {}", env.path().display()),
        }
    }
    total
}

pub fn database_size_in_bytes(db: &DocumentDatabase) -> u64 {
    calculate_storage_size_in_bytes(&db.get_all_storage_environments())
}

/// Whole megabytes, truncated.
#[inline]
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / BYTES_PER_MB
}
