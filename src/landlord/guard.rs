//! landlord/guard — эксклюзивная блокировка имени базы на время компактации.

use log::debug;
use std::sync::Arc;

use super::Registry;

/// Held while a compaction owns a database name. Loads of that name fail with
/// `LandlordError::Locked` and other `unload_and_lock` calls block until release.
///
/// Release happens exactly once: either through `release()` or on drop.
#[must_use = "the database is unlocked as soon as the guard is dropped"]
pub struct DatabaseLockGuard {
    name: String,
    registry: Option<Arc<Registry>>,
}

impl DatabaseLockGuard {
    pub(super) fn new(name: String, registry: Arc<Registry>) -> Self {
        Self {
            name,
            registry: Some(registry),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.registry.is_none()
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.unlock(&self.name);
            debug!("landlord: released lock on '{}'", self.name);
        }
    }
}

impl Drop for DatabaseLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DatabaseLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseLockGuard")
            .field("name", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}
