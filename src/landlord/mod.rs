//! landlord — реестр загруженных баз и эксклюзивные блокировки имён для компактации.
//!
//! Инварианты:
//! - Имя, удерживаемое `DatabaseLockGuard`, нельзя загрузить (`LandlordError::Locked`).
//! - Два `unload_and_lock` одного имени строго упорядочены: второй ждёт release первого.
//! - Разные имена независимы.

use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::config::{DatabaseConfig, ServerConfig};
use crate::dirs::dir_exists;
use crate::metrics::{record_database_load, record_database_unload};
use crate::storage::{CatastrophicFailureNotification, IoChangesNotifications};
use crate::BoxError;

pub mod database;
pub mod guard;

pub use database::DocumentDatabase;
pub use guard::DatabaseLockGuard;

#[derive(Debug, Error)]
pub enum LandlordError {
    #[error("invalid database name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("database '{0}' does not exist")]
    NotFound(String),

    #[error("database '{0}' is locked by a running compaction")]
    Locked(String),

    #[error("failed to load database '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to unload database '{name}': {source}")]
    Unload {
        name: String,
        #[source]
        source: BoxError,
    },
}

#[derive(Default)]
struct RegistryState {
    loaded: HashMap<String, Arc<DocumentDatabase>>,
    locked: HashSet<String>,
}

pub(crate) struct Registry {
    state: Mutex<RegistryState>,
    released: Condvar,
}

impl Registry {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn unlock(&self, name: &str) {
        let mut st = self.state();
        st.locked.remove(name);
        drop(st);
        self.released.notify_all();
    }
}

pub struct DatabasesLandlord {
    config: ServerConfig,
    notifications: Arc<IoChangesNotifications>,
    catastrophic: CatastrophicFailureNotification,
    registry: Arc<Registry>,
}

impl DatabasesLandlord {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_notifications(
            config,
            IoChangesNotifications::new(),
            CatastrophicFailureNotification::default(),
        )
    }

    pub fn with_notifications(
        config: ServerConfig,
        notifications: Arc<IoChangesNotifications>,
        catastrophic: CatastrophicFailureNotification,
    ) -> Self {
        Self {
            config,
            notifications,
            catastrophic,
            registry: Arc::new(Registry {
                state: Mutex::new(RegistryState::default()),
                released: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn notifications(&self) -> &Arc<IoChangesNotifications> {
        &self.notifications
    }

    pub fn catastrophic(&self) -> &CatastrophicFailureNotification {
        &self.catastrophic
    }

    fn resolve(&self, name: &str) -> Result<DatabaseConfig, LandlordError> {
        self.config
            .resolve(name)
            .map_err(|e| LandlordError::InvalidName {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn load_locked(
        &self,
        st: &mut RegistryState,
        cfg: DatabaseConfig,
    ) -> Result<Arc<DocumentDatabase>, LandlordError> {
        let name = cfg.name.clone();
        let db = DocumentDatabase::open(cfg, self.notifications.clone(), self.catastrophic.clone())
            .map_err(|e| LandlordError::Load {
                name: name.clone(),
                source: e.into(),
            })?;
        let db = Arc::new(db);
        st.loaded.insert(name.clone(), db.clone());
        record_database_load();
        info!("landlord: loaded database '{}'", name);
        Ok(db)
    }

    /// Loaded database, loading it on first use. `Ok(None)` if its directory does not exist.
    pub fn try_get_or_create(
        &self,
        name: &str,
    ) -> Result<Option<Arc<DocumentDatabase>>, LandlordError> {
        let cfg = self.resolve(name)?;
        let mut st = self.registry.state();
        if st.locked.contains(name) {
            return Err(LandlordError::Locked(name.to_string()));
        }
        if let Some(db) = st.loaded.get(name) {
            return Ok(Some(db.clone()));
        }
        if !dir_exists(&cfg.data_directory) {
            return Ok(None);
        }
        self.load_locked(&mut st, cfg).map(Some)
    }

    /// Like `try_get_or_create`, but creates the database directory when missing.
    pub fn create_database(&self, name: &str) -> Result<Arc<DocumentDatabase>, LandlordError> {
        let cfg = self.resolve(name)?;
        let mut st = self.registry.state();
        if st.locked.contains(name) {
            return Err(LandlordError::Locked(name.to_string()));
        }
        if let Some(db) = st.loaded.get(name) {
            return Ok(db.clone());
        }
        self.load_locked(&mut st, cfg)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry.state().loaded.contains_key(name)
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.registry.state().locked.contains(name)
    }

    /// Close and forget a loaded database. Returns false if it was not loaded.
    pub fn unload(&self, name: &str) -> Result<bool, LandlordError> {
        let db = self.registry.state().loaded.remove(name);
        match db {
            Some(db) => {
                close_database(&db)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Block until no other guard holds `name`, lock it, then unload the database so its
    /// files can be relocated.
    pub fn unload_and_lock(&self, name: &str) -> Result<DatabaseLockGuard, LandlordError> {
        self.resolve(name)?;
        let db = {
            let mut st = self.registry.state();
            while st.locked.contains(name) {
                debug!("landlord: waiting for lock on '{}'", name);
                st = self
                    .registry
                    .released
                    .wait(st)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            st.locked.insert(name.to_string());
            st.loaded.remove(name)
        };
        let guard = DatabaseLockGuard::new(name.to_string(), self.registry.clone());
        info!("landlord: locked database '{}'", name);

        if let Some(db) = db {
            // при ошибке guard снимается на выходе
            close_database(&db)?;
        }
        Ok(guard)
    }

    /// Block until `name` is not held by any guard.
    pub fn wait_until_unlocked(&self, name: &str) {
        let mut st = self.registry.state();
        while st.locked.contains(name) {
            st = self
                .registry
                .released
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close every loaded database.
    pub fn shutdown(&self) -> Result<(), LandlordError> {
        let all: Vec<Arc<DocumentDatabase>> = self
            .registry
            .state()
            .loaded
            .drain()
            .map(|(_, db)| db)
            .collect();
        let mut first = None;
        for db in all {
            if let Err(e) = close_database(&db) {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn close_database(db: &DocumentDatabase) -> Result<(), LandlordError> {
    db.close().map_err(|e| LandlordError::Unload {
        name: db.name().to_string(),
        source: e.into(),
    })?;
    record_database_unload();
    info!("landlord: unloaded database '{}'", db.name());
    Ok(())
}

impl Drop for DatabasesLandlord {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for DatabasesLandlord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.registry.state();
        let mut loaded: Vec<&String> = st.loaded.keys().collect();
        loaded.sort();
        f.debug_struct("DatabasesLandlord")
            .field("data_root", &self.config.data_root)
            .field("loaded", &loaded)
            .field("locked", &st.locked.len())
            .finish()
    }
}
